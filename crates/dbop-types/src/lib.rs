//! dbop Types - Core types for the cluster-member lifecycle controller
//!
//! The controller converges a clustered database deployment from its observed
//! state to its desired configuration by running ordered remediation plans.
//!
//! ## Key Concepts
//!
//! - **Deployment**: desired Spec (user-owned) plus observed Status (controller-owned)
//! - **Member**: one database process, classified by its [`ServerGroup`]
//! - **ServerGroup**: closed set of roles with a static policy table
//! - **Plan**: ordered list of [`Action`]s persisted in the Status
//! - **Fingerprint**: digest of a member's rendered runtime configuration
//! - **Events**: human-relevant notifications emitted by the controller

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod condition;
pub mod coordination;
pub mod deployment;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod group;
pub mod ids;
pub mod image;
pub mod member;
pub mod plan;
pub mod runtime;

// Re-export main types
pub use condition::{Condition, ConditionList, ConditionType};
pub use coordination::{CollectionListing, CollectionShards, ShardServers};
pub use deployment::{
    AuthenticationSpec, Deployment, DeploymentMode, DeploymentSpec, DeploymentStatus,
    InitContainerMode, ServerGroupSpec, SyncSpec, TlsSpec, UpgradeSpec,
};
pub use error::{ModelError, ModelResult};
pub use events::{ClusterEvent, EventEnvelope, EventSeverity};
pub use fingerprint::Fingerprint;
pub use group::{FailureTolerance, GroupPolicy, ProbeKind, ServerGroup, Tolerance};
pub use ids::{DeploymentId, MemberId};
pub use image::{ImageInfo, ImageList};
pub use member::{Member, MemberList, MemberPhase};
pub use plan::{Action, ActionType, Plan};
pub use runtime::{
    ContainerSpec, ProbeSpec, RuntimeUnit, RuntimeUnitSpec, Secret, VolumeClaim, VolumeMount,
    VolumeSource, VolumeSpec,
};
