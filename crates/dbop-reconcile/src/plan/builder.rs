//! Plan builder combinators
//!
//! A fragment is a pure function of a [`PlanInput`] returning a (possibly
//! empty) [`Plan`]. Fragments are plain `fn` pointers so composition can never
//! capture hidden state.

use crate::drift::DriftDetector;
use crate::error::Result;
use crate::guard::CoordinationView;
use crate::inspector::Inspector;
use chrono::{DateTime, Utc};
use dbop_types::{DeploymentId, DeploymentSpec, DeploymentStatus, Plan};

/// Read-only view a fragment plans against
pub struct PlanInput<'a> {
    pub deployment_id: &'a DeploymentId,
    pub deployment_name: &'a str,
    pub spec: &'a DeploymentSpec,
    pub status: &'a DeploymentStatus,
    pub inspector: &'a dyn Inspector,
    pub coordination: &'a CoordinationView,
    pub drift: DriftDetector<'a>,
    /// Timestamp stamped on every created action
    pub now: DateTime<Utc>,
}

/// Produces part of a plan
pub type Fragment = fn(&PlanInput<'_>) -> Result<Plan>;

/// Decides whether a fragment runs
pub type Predicate = fn(&PlanInput<'_>) -> bool;

/// Combines the plans of several child fragments
pub type SubPlan = fn(&PlanBuilder<'_>, &[Fragment]) -> Result<Plan>;

pub struct PlanBuilder<'a> {
    input: &'a PlanInput<'a>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(input: &'a PlanInput<'a>) -> Self {
        Self { input }
    }

    pub fn input(&self) -> &PlanInput<'a> {
        self.input
    }

    /// Run one fragment and return its plan verbatim.
    pub fn apply(&self, fragment: Fragment) -> Result<Plan> {
        fragment(self.input)
    }

    /// Run `fragment` only when `predicate` holds.
    pub fn apply_with_condition(&self, predicate: Predicate, fragment: Fragment) -> Result<Plan> {
        if !predicate(self.input) {
            return Ok(Plan::new());
        }
        self.apply(fragment)
    }

    /// Let `combinator` decide how the children's plans are combined.
    pub fn apply_sub_plan(&self, combinator: SubPlan, fragments: &[Fragment]) -> Result<Plan> {
        combinator(self, fragments)
    }
}

/// The first non-empty child plan. Later children are not run.
pub fn first_non_empty(builder: &PlanBuilder<'_>, fragments: &[Fragment]) -> Result<Plan> {
    for fragment in fragments {
        let plan = builder.apply(*fragment)?;
        if !plan.is_empty() {
            return Ok(plan);
        }
    }
    Ok(Plan::new())
}

/// All child plans, concatenated in order.
pub fn concat_all(builder: &PlanBuilder<'_>, fragments: &[Fragment]) -> Result<Plan> {
    let mut plan = Plan::new();
    for fragment in fragments {
        plan.extend(builder.apply(*fragment)?);
    }
    Ok(plan)
}
