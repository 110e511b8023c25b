//! Plan construction
//!
//! Plans are built from composable fragments against a read-only snapshot.
//! Building a plan never touches the outside world: coordination state is
//! prefetched into a [`CoordinationView`](crate::guard::CoordinationView)
//! before the fragments run.

mod builder;
mod fragments;

pub use builder::{
    concat_all, first_non_empty, Fragment, PlanBuilder, PlanInput, Predicate, SubPlan,
};
pub use fragments::{
    create_plan, image_upgrade_plan, rotate_member_plan, rotation_plan, scale_plan,
    upgrade_requested,
};
