//! rule-based rewriting of logical plans.
//!
//! the driver runs `CombineFilters` once, then repeats passes of
//! non-join predicate pushdown, join predicate pushdown and limit pushdown
//! until a pass changes nothing or `max_passes` is reached.

mod combine_filters;
mod join_pushdown;
mod limit_pushdown;
mod predicate_pushdown;
pub mod rewrite;

pub use combine_filters::CombineFilters;
pub use join_pushdown::PredicatePushDownThroughJoin;
pub use limit_pushdown::LimitPushDown;
pub use predicate_pushdown::PredicatePushDownThroughNonJoin;

use crate::config::OptimizerConfig;
use crate::plan::{PlanResult, PlanTree};
use tracing::{debug, trace, warn};

/// a rewrite over the whole tree
pub trait RewriteRule {
    fn name(&self) -> &'static str;

    /// rewrite every applicable site; returns whether the tree changed
    fn apply(&self, tree: &mut PlanTree) -> PlanResult<bool>;
}

/// one rule application, as seen by a `DiagnosticsSink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTrace {
    pub rule: &'static str,
    /// 0 for the initial filter combination, then 1, 2, ...
    pub pass: usize,
    pub changed: bool,
    /// rendered plans, present when plan capture is enabled
    pub before: Option<String>,
    pub after: Option<String>,
}

pub trait DiagnosticsSink {
    fn record(&mut self, trace: RuleTrace);
}

impl DiagnosticsSink for Vec<RuleTrace> {
    fn record(&mut self, trace: RuleTrace) {
        self.push(trace);
    }
}

/// sink that drops every trace
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardDiagnostics;

impl DiagnosticsSink for DiscardDiagnostics {
    fn record(&mut self, _trace: RuleTrace) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptimizeOutcome {
    /// whether any rule changed the tree
    pub changed: bool,
    /// pushdown passes run
    pub passes: usize,
    /// false when `max_passes` stopped the loop
    pub converged: bool,
    /// rule applications that changed the tree
    pub rules_applied: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    CombineFilters,
    PushNonJoin,
    PushJoin,
    PushLimit,
    Converged,
}

impl DriverState {
    /// `pass_changed` is whether any pushdown rule changed the tree in the current pass
    pub fn next(self, pass_changed: bool) -> DriverState {
        match self {
            DriverState::CombineFilters => DriverState::PushNonJoin,
            DriverState::PushNonJoin => DriverState::PushJoin,
            DriverState::PushJoin => DriverState::PushLimit,
            DriverState::PushLimit if pass_changed => DriverState::PushNonJoin,
            DriverState::PushLimit | DriverState::Converged => DriverState::Converged,
        }
    }
}

pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::with_config(OptimizerConfig::default())
    }

    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn optimize(&self, tree: &mut PlanTree) -> PlanResult<OptimizeOutcome> {
        self.optimize_with(tree, &mut DiscardDiagnostics)
    }

    pub fn optimize_with(
        &self,
        tree: &mut PlanTree,
        sink: &mut dyn DiagnosticsSink,
    ) -> PlanResult<OptimizeOutcome> {
        let mut outcome = OptimizeOutcome::default();
        let mut state = DriverState::CombineFilters;
        let mut pass_changed = false;

        loop {
            if state == DriverState::Converged {
                outcome.converged = true;
                break;
            }
            if state == DriverState::PushNonJoin {
                outcome.passes += 1;
                pass_changed = false;
            }

            if let Some(rule) = self.rule_for(state) {
                if self.run_rule(rule, tree, outcome.passes, sink)? {
                    outcome.changed = true;
                    outcome.rules_applied += 1;
                    if state != DriverState::CombineFilters {
                        pass_changed = true;
                    }
                }
            }

            if state == DriverState::PushLimit
                && pass_changed
                && outcome.passes >= self.config.max_passes
            {
                warn!(
                    max_passes = self.config.max_passes,
                    "optimizer stopped before reaching a fixpoint"
                );
                break;
            }
            state = state.next(pass_changed);
        }

        tree.validate()?;
        debug!(
            passes = outcome.passes,
            rules_applied = outcome.rules_applied,
            converged = outcome.converged,
            "optimization finished"
        );
        Ok(outcome)
    }

    fn rule_for(&self, state: DriverState) -> Option<&'static dyn RewriteRule> {
        let (enabled, rule): (bool, &'static dyn RewriteRule) = match state {
            DriverState::CombineFilters => (self.config.combine_filters, &CombineFilters),
            DriverState::PushNonJoin => {
                (self.config.predicate_pushdown, &PredicatePushDownThroughNonJoin)
            }
            DriverState::PushJoin => (self.config.predicate_pushdown, &PredicatePushDownThroughJoin),
            DriverState::PushLimit => (self.config.limit_pushdown, &LimitPushDown),
            DriverState::Converged => return None,
        };
        enabled.then_some(rule)
    }

    fn run_rule(
        &self,
        rule: &dyn RewriteRule,
        tree: &mut PlanTree,
        pass: usize,
        sink: &mut dyn DiagnosticsSink,
    ) -> PlanResult<bool> {
        let before = self.config.capture_plans.then(|| tree.explain());
        let changed = rule.apply(tree)?;
        if changed {
            debug!(rule = rule.name(), pass, "rule rewrote the plan");
        } else {
            trace!(rule = rule.name(), pass, "rule made no change");
        }
        sink.record(RuleTrace {
            rule: rule.name(),
            pass,
            changed,
            before,
            after: self.config.capture_plans.then(|| tree.explain()),
        });
        Ok(changed)
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}
