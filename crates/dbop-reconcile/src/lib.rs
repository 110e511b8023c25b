//! dbop Reconcile - Reconciliation engine for clustered database deployments
//!
//! Each tick compares a deployment's desired spec with what is running and
//! moves it one step closer:
//!
//! - [`drift`]: fingerprints each member's rendered runtime configuration
//! - [`guard`]: refuses coordination reads while the agency has no quorum
//! - [`plan`]: composes an ordered remediation plan from pure fragments
//! - [`executor`]: advances the head action of the plan by one step
//! - [`controller`]: ties the above together with the deployment store
//!
//! Everything outside the process is reached through the traits in
//! [`context`]; [`cluster`] and [`state`] provide in-memory implementations.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod action;
pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod context;
pub mod controller;
pub mod drift;
pub mod error;
pub mod events;
pub mod executor;
pub mod guard;
pub mod inspector;
pub mod plan;
pub mod render;
pub mod resources;
pub mod state;

#[cfg(test)]
mod testing;

pub use cleanup::{remove_deployment_resources, CleanupReport};
pub use cluster::{InMemoryClusterStore, StaticCoordinationReader, StaticMemberClient};
pub use config::{ActionTimeouts, ReconcileConfig};
pub use context::{
    ClusterStateStore, CoordinationReader, JobStatus, MemberClient, ReconcileContext,
    ResourceChange, ResourceKind,
};
pub use controller::{Reconciler, TickReport};
pub use drift::{DriftDetector, DriftPolicy};
pub use error::{ReconcileError, Result, StoreError, StoreResult};
pub use events::{BroadcastEventSink, EventBuffer, EventSink};
pub use executor::{execute_head, StepOutcome};
pub use guard::{check_quorum, CoordinationView, Quorum};
pub use inspector::{ClusterSnapshot, Inspector};
pub use plan::{create_plan, PlanInput};
pub use render::{ConfigRenderer, DefaultRenderer, RenderInput};
pub use state::{DeploymentStore, InMemoryDeploymentStore};
