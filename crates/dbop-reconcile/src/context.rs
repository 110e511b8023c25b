//! External collaborators of the reconciliation engine
//!
//! The engine decides what to do; everything that touches the outside world
//! goes through one of the traits below. [`ReconcileContext`] bundles them for
//! one controller instance.

use crate::config::ReconcileConfig;
use crate::error::{StoreError, StoreResult};
use crate::events::EventSink;
use crate::inspector::ClusterSnapshot;
use crate::render::ConfigRenderer;
use async_trait::async_trait;
use dbop_types::{CollectionListing, DeploymentId, MemberId, RuntimeUnit, Secret, VolumeClaim};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Kind of a cluster-managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    RuntimeUnit,
    VolumeClaim,
    Secret,
}

/// Notification published by [`ClusterStateStore::watch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub kind: ResourceKind,
    pub name: String,
    /// Value of the deployment label, if the resource carries one
    pub deployment: Option<String>,
}

/// CRUD, list and watch over cluster-managed resources
///
/// Callers wrap every call in [`with_deadline`].
#[async_trait]
pub trait ClusterStateStore: Send + Sync {
    /// List everything labelled with the deployment.
    async fn snapshot(&self, deployment: &DeploymentId) -> StoreResult<ClusterSnapshot>;

    /// Create a runtime unit. The returned copy carries the assigned UID.
    async fn create_runtime_unit(&self, unit: RuntimeUnit) -> StoreResult<RuntimeUnit>;

    async fn get_runtime_unit(&self, name: &str) -> StoreResult<RuntimeUnit>;

    /// Request deletion. Units with finalizers stay behind as terminating.
    async fn delete_runtime_unit(&self, name: &str) -> StoreResult<()>;

    async fn remove_runtime_unit_finalizers(
        &self,
        name: &str,
        finalizers: &[String],
    ) -> StoreResult<()>;

    async fn create_volume_claim(&self, claim: VolumeClaim) -> StoreResult<()>;

    async fn delete_volume_claim(&self, name: &str) -> StoreResult<()>;

    async fn remove_volume_claim_finalizers(
        &self,
        name: &str,
        finalizers: &[String],
    ) -> StoreResult<()>;

    async fn create_secret(&self, secret: Secret) -> StoreResult<()>;

    async fn delete_secret(&self, name: &str) -> StoreResult<()>;

    /// Subscribe to resource changes.
    fn watch(&self) -> broadcast::Receiver<ResourceChange>;
}

/// Reads the coordination layer's collection listing
///
/// Only ever called behind the consensus guard.
#[async_trait]
pub trait CoordinationReader: Send + Sync {
    async fn collections(&self, deployment: &DeploymentId) -> StoreResult<CollectionListing>;
}

/// State of a server-side job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Finished,
    Failed(String),
}

/// Calls against the database members themselves
#[async_trait]
pub trait MemberClient: Send + Sync {
    /// Ask the cluster to move leadership off `member`. Returns a job ID.
    async fn resign_leadership(
        &self,
        deployment: &DeploymentId,
        member: &MemberId,
    ) -> StoreResult<String>;

    async fn job_status(&self, deployment: &DeploymentId, job_id: &str) -> StoreResult<JobStatus>;
}

/// Run a store call under a deadline. Elapsing is a [`StoreError::Timeout`].
pub async fn with_deadline<T, F>(operation: &str, deadline: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(operation.to_string())),
    }
}

/// Treat "not found" as success. Used for delete-style operations.
pub fn ignore_not_found(result: StoreResult<()>) -> StoreResult<()> {
    match result {
        Err(StoreError::NotFound(_)) => Ok(()),
        other => other,
    }
}

/// Collaborators and settings of one controller
#[derive(Clone)]
pub struct ReconcileContext {
    pub cluster: Arc<dyn ClusterStateStore>,
    pub coordination: Arc<dyn CoordinationReader>,
    pub members: Arc<dyn MemberClient>,
    pub renderer: Arc<dyn ConfigRenderer>,
    pub events: Arc<dyn EventSink>,
    pub config: ReconcileConfig,
}

impl ReconcileContext {
    pub fn new(
        cluster: Arc<dyn ClusterStateStore>,
        coordination: Arc<dyn CoordinationReader>,
        members: Arc<dyn MemberClient>,
        renderer: Arc<dyn ConfigRenderer>,
        events: Arc<dyn EventSink>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            cluster,
            coordination,
            members,
            renderer,
            events,
            config,
        }
    }
}
