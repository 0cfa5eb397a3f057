/// optimizer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizerConfig {
    /// upper bound on pushdown passes after the initial filter combination
    pub max_passes: usize,
    /// record the plan before and after every rule application
    pub capture_plans: bool,
    pub combine_filters: bool,
    /// covers both the non-join and the join predicate pushdown rules
    pub predicate_pushdown: bool,
    pub limit_pushdown: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_passes: 32,
            capture_plans: false,
            combine_filters: true,
            predicate_pushdown: true,
            limit_pushdown: true,
        }
    }
}

impl OptimizerConfig {
    pub fn with_max_passes(mut self, max: usize) -> Self {
        self.max_passes = max;
        self
    }

    pub fn with_plan_capture(mut self, enable: bool) -> Self {
        self.capture_plans = enable;
        self
    }

    pub fn with_combine_filters(mut self, enable: bool) -> Self {
        self.combine_filters = enable;
        self
    }

    pub fn with_predicate_pushdown(mut self, enable: bool) -> Self {
        self.predicate_pushdown = enable;
        self
    }

    pub fn with_limit_pushdown(mut self, enable: bool) -> Self {
        self.limit_pushdown = enable;
        self
    }
}
