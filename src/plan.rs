use crate::expression::{Expr, fmt_list};
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("{op} node {node} has {actual} children, expected {expected}")]
    WrongChildCount {
        node: NodeId,
        op: &'static str,
        expected: &'static str,
        actual: usize,
    },
    #[error("cannot splice out node {0}: it has several children and no parent")]
    SpliceMultiChildRoot(NodeId),
    #[error("node {0} is still attached to the tree")]
    NodeAttached(NodeId),
    #[error("node {parent} has no child slot {index}")]
    ChildIndexOutOfRange { parent: NodeId, index: usize },
    #[error("node {child} is not among the children of its parent {parent}")]
    BrokenLink { parent: NodeId, child: NodeId },
    #[error("plan tree has no root")]
    EmptyTree,
}

pub type PlanResult<T> = Result<T, PlanError>;

/// stable handle of a node inside one `PlanTree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Cross,
    Left,
    Right,
    Full,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            JoinKind::Inner => "Inner",
            JoinKind::Cross => "Cross",
            JoinKind::Left => "Left",
            JoinKind::Right => "Right",
            JoinKind::Full => "Full",
        };
        f.write_str(kind)
    }
}

/// name of a table source. a derived table has no base name, only its alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub base: Option<String>,
    pub alias: Option<String>,
}

impl TableName {
    pub fn base(name: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            base: Some(name.into()),
            alias,
        }
    }

    pub fn derived(alias: impl Into<String>) -> Self {
        Self {
            base: None,
            alias: Some(alias.into()),
        }
    }

    /// the name columns of this source are qualified with
    pub fn visible_name(&self) -> &str {
        self.alias
            .as_deref()
            .or(self.base.as_deref())
            .unwrap_or_default()
    }

    pub fn is_derived(&self) -> bool {
        self.base.is_none()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.base, &self.alias) {
            (Some(base), Some(alias)) if base != alias => write!(f, "{} AS {}", base, alias),
            (Some(base), _) => f.write_str(base),
            (None, Some(alias)) => write!(f, "Subquery: {}", alias),
            (None, None) => f.write_str("Subquery"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub descending: bool,
}

impl fmt::Display for OrderByItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} DESC", self.expr)
        } else {
            write!(f, "{}", self.expr)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    Project { columns: Vec<Expr> },
    Join { kind: JoinKind, on: Vec<Expr> },
    Table { table: TableName },
    GroupBy { keys: Vec<Expr> },
    Aggregate { projection: Vec<Expr>, group_keys: Vec<Expr> },
    HavingFilter { predicates: Vec<Expr> },
    Filter { predicates: Vec<Expr> },
    OrderBy { items: Vec<OrderByItem> },
    Limit { count: Expr, offset: Option<Expr> },
}

impl PlanNode {
    pub fn name(&self) -> &'static str {
        match self {
            PlanNode::Project { .. } => "Project",
            PlanNode::Join { .. } => "Join",
            PlanNode::Table { .. } => "Table",
            PlanNode::GroupBy { .. } => "GroupBy",
            PlanNode::Aggregate { .. } => "Aggregate",
            PlanNode::HavingFilter { .. } => "HavingFilter",
            PlanNode::Filter { .. } => "Filter",
            PlanNode::OrderBy { .. } => "OrderBy",
            PlanNode::Limit { .. } => "Limit",
        }
    }

    /// number of children this operator may have
    pub fn child_count_range(&self) -> RangeInclusive<usize> {
        match self {
            PlanNode::Table { .. } => 0..=1,
            PlanNode::Join { .. } => 1..=2,
            _ => 1..=1,
        }
    }

    fn expected_children(&self) -> &'static str {
        match self {
            PlanNode::Table { .. } => "0 or 1",
            PlanNode::Join { .. } => "1 or 2",
            _ => "exactly 1",
        }
    }

    pub fn is_filter(&self) -> bool {
        matches!(self, PlanNode::Filter { .. })
    }

    pub fn filter_predicates(&self) -> Option<&[Expr]> {
        match self {
            PlanNode::Filter { predicates } => Some(predicates),
            _ => None,
        }
    }

    pub fn filter_predicates_mut(&mut self) -> Option<&mut Vec<Expr>> {
        match self {
            PlanNode::Filter { predicates } => Some(predicates),
            _ => None,
        }
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanNode::Project { columns } => {
                f.write_str("Project (Output: ")?;
                fmt_list(f, columns, ", ")?;
                f.write_str(")")
            }
            PlanNode::Join { kind, on } if on.is_empty() => write!(f, "Join ({})", kind),
            PlanNode::Join { kind, on } => {
                write!(f, "Join ({}, On: ", kind)?;
                fmt_list(f, on, " AND ")?;
                f.write_str(")")
            }
            PlanNode::Table { table } => write!(f, "Table ({})", table),
            PlanNode::GroupBy { keys } => {
                f.write_str("GroupBy (Keys: ")?;
                fmt_list(f, keys, ", ")?;
                f.write_str(")")
            }
            PlanNode::Aggregate {
                projection,
                group_keys,
            } => {
                f.write_str("Aggregate (Output: ")?;
                fmt_list(f, projection, ", ")?;
                if !group_keys.is_empty() {
                    f.write_str(", Group: ")?;
                    fmt_list(f, group_keys, ", ")?;
                }
                f.write_str(")")
            }
            PlanNode::HavingFilter { predicates } => {
                f.write_str("HavingFilter (Condition: ")?;
                fmt_list(f, predicates, " AND ")?;
                f.write_str(")")
            }
            PlanNode::Filter { predicates } => {
                f.write_str("Filter (Condition: ")?;
                fmt_list(f, predicates, " AND ")?;
                f.write_str(")")
            }
            PlanNode::OrderBy { items } => {
                let keys: Vec<String> = items.iter().map(|item| item.to_string()).collect();
                write!(f, "OrderBy (Keys: {})", keys.join(", "))
            }
            PlanNode::Limit { count, offset } => match offset {
                Some(offset) => write!(f, "Limit (LIMIT {} OFFSET {})", count, offset),
                None => write!(f, "Limit (LIMIT {})", count),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    node: PlanNode,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// arena of plan nodes. nodes are never freed; a node removed from the tree
/// stays addressable (detached) until the tree is dropped.
#[derive(Debug, Clone, Default)]
pub struct PlanTree {
    slots: Vec<Slot>,
    root: Option<NodeId>,
}

impl PlanTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// add a detached, childless node
    pub fn add_node(&mut self, node: PlanNode) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            node,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// append a parentless subtree as the last child of `parent`
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> PlanResult<()> {
        if self.slots[child.0].parent.is_some()
            || self.root == Some(child)
            || self.find_root(parent) == child
        {
            return Err(PlanError::NodeAttached(child));
        }
        let count = self.slots[parent.0].children.len() + 1;
        self.check_child_count(parent, count)?;
        self.slots[parent.0].children.push(child);
        self.slots[child.0].parent = Some(parent);
        Ok(())
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// ids are only minted by `add_node`; indexing with a foreign id panics
    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.slots[id.0].node
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PlanNode {
        &mut self.slots[id.0].node
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.0].parent
    }

    /// the child of `id` if it has exactly one
    pub fn only_child(&self, id: NodeId) -> Option<NodeId> {
        match self.slots[id.0].children.as_slice() {
            [child] => Some(*child),
            _ => None,
        }
    }

    /// `new_node` takes over all children of `node` and becomes its only child
    pub fn insert_above_children(&mut self, node: NodeId, new_node: NodeId) -> PlanResult<()> {
        self.ensure_detached(new_node)?;
        if new_node == node {
            return Err(PlanError::NodeAttached(new_node));
        }
        let moved = self.slots[node.0].children.len();
        self.check_child_count(new_node, moved)?;
        self.check_child_count(node, 1)?;

        let children = std::mem::replace(&mut self.slots[node.0].children, vec![new_node]);
        for &child in &children {
            self.slots[child.0].parent = Some(new_node);
        }
        self.slots[new_node.0].children = children;
        self.slots[new_node.0].parent = Some(node);
        Ok(())
    }

    /// remove `node`, hanging its children on its parent at the same position.
    /// removing the root promotes its only child to root.
    pub fn delete_splice(&mut self, node: NodeId) -> PlanResult<()> {
        let children = self.slots[node.0].children.clone();
        match self.slots[node.0].parent {
            None => {
                if children.len() >= 2 {
                    return Err(PlanError::SpliceMultiChildRoot(node));
                }
                if self.root == Some(node) {
                    self.root = children.first().copied();
                }
                for &child in &children {
                    self.slots[child.0].parent = None;
                }
            }
            Some(parent) => {
                let position = self.slots[parent.0]
                    .children
                    .iter()
                    .position(|&c| c == node)
                    .ok_or(PlanError::BrokenLink {
                        parent,
                        child: node,
                    })?;
                let count = self.slots[parent.0].children.len() - 1 + children.len();
                self.check_child_count(parent, count)?;

                self.slots[parent.0]
                    .children
                    .splice(position..=position, children.iter().copied());
                for &child in &children {
                    self.slots[child.0].parent = Some(parent);
                }
            }
        }
        self.slots[node.0].children.clear();
        self.slots[node.0].parent = None;
        Ok(())
    }

    /// replace child slot `index` of `parent` with `new_node`, hanging the old child under it
    pub fn wrap_child(&mut self, parent: NodeId, index: usize, new_node: NodeId) -> PlanResult<()> {
        self.ensure_detached(new_node)?;
        if new_node == parent {
            return Err(PlanError::NodeAttached(new_node));
        }
        let old = *self.slots[parent.0]
            .children
            .get(index)
            .ok_or(PlanError::ChildIndexOutOfRange { parent, index })?;
        self.check_child_count(new_node, 1)?;

        self.slots[parent.0].children[index] = new_node;
        self.slots[new_node.0].parent = Some(parent);
        self.slots[new_node.0].children = vec![old];
        self.slots[old.0].parent = Some(new_node);
        Ok(())
    }

    pub fn find_root(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let Some(parent) = self.slots[current.0].parent {
            current = parent;
        }
        current
    }

    /// walk down from `start` through single-child nodes and return the first
    /// node matching `target`. stops at a node that is neither the target nor
    /// passable, or that does not have exactly one child.
    pub fn find_in_single_chain<T, P>(&self, start: NodeId, target: T, passable: P) -> Option<NodeId>
    where
        T: Fn(&PlanNode) -> bool,
        P: Fn(&PlanNode) -> bool,
    {
        let mut current = self.only_child(start)?;
        loop {
            let node = self.node(current);
            if target(node) {
                return Some(current);
            }
            if !passable(node) {
                return None;
            }
            current = self.only_child(current)?;
        }
    }

    /// check child counts and parent links of every node reachable from the root
    pub fn validate(&self) -> PlanResult<()> {
        let root = self.root.ok_or(PlanError::EmptyTree)?;
        if let Some(parent) = self.slots[root.0].parent {
            return Err(PlanError::BrokenLink {
                parent,
                child: root,
            });
        }
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let children = &self.slots[id.0].children;
            self.check_child_count(id, children.len())?;
            for &child in children {
                if self.slots[child.0].parent != Some(id) {
                    return Err(PlanError::BrokenLink { parent: id, child });
                }
                stack.push(child);
            }
        }
        Ok(())
    }

    /// reachable node ids, parents before children, left before right
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.slots[id.0].children.iter().rev());
        }
        order
    }

    pub fn explain(&self) -> String {
        self.to_string()
    }

    fn ensure_detached(&self, id: NodeId) -> PlanResult<()> {
        let slot = &self.slots[id.0];
        if slot.parent.is_some() || !slot.children.is_empty() || self.root == Some(id) {
            return Err(PlanError::NodeAttached(id));
        }
        Ok(())
    }

    fn check_child_count(&self, id: NodeId, count: usize) -> PlanResult<()> {
        let node = &self.slots[id.0].node;
        if node.child_count_range().contains(&count) {
            Ok(())
        } else {
            Err(PlanError::WrongChildCount {
                node: id,
                op: node.name(),
                expected: node.expected_children(),
                actual: count,
            })
        }
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, indent: usize) -> fmt::Result {
        let indent_str = if indent > 0 {
            " ".repeat(indent) + "└── "
        } else {
            String::new()
        };
        writeln!(f, "{}{}", indent_str, self.node(id))?;
        for &child in self.children(id) {
            self.fmt_node(f, child, indent + 2)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            Some(root) => self.fmt_node(f, root, 0),
            None => writeln!(f, "(empty plan)"),
        }
    }
}
