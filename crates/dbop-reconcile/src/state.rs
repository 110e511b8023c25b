//! Deployment persistence

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dbop_types::{Deployment, DeploymentId, DeploymentSpec, DeploymentStatus};

/// Store for deployments
///
/// Status writes are compare-and-swap on [`Deployment::version`]; a write
/// against a stale version fails with [`StoreError::Conflict`].
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn get(&self, id: &DeploymentId) -> StoreResult<Deployment>;

    async fn list(&self) -> StoreResult<Vec<Deployment>>;

    /// Store a new deployment.
    async fn create(&self, deployment: Deployment) -> StoreResult<()>;

    /// Replace the user-owned spec. Leaves the status and its version alone.
    async fn update_spec(&self, id: &DeploymentId, spec: DeploymentSpec) -> StoreResult<()>;

    /// Write the status if the stored version is still `expected_version`.
    ///
    /// Returns the new version.
    async fn update_status(
        &self,
        id: &DeploymentId,
        expected_version: u64,
        status: DeploymentStatus,
    ) -> StoreResult<u64>;

    /// Flag the deployment for removal.
    async fn mark_deleted(&self, id: &DeploymentId) -> StoreResult<()>;

    /// Forget the deployment.
    async fn delete(&self, id: &DeploymentId) -> StoreResult<()>;
}

/// In-memory implementation for development
#[derive(Default)]
pub struct InMemoryDeploymentStore {
    deployments: DashMap<DeploymentId, Deployment>,
}

impl InMemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for InMemoryDeploymentStore {
    async fn get(&self, id: &DeploymentId) -> StoreResult<Deployment> {
        self.deployments
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> StoreResult<Vec<Deployment>> {
        let mut all: Vec<_> = self.deployments.iter().map(|d| d.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn create(&self, deployment: Deployment) -> StoreResult<()> {
        if self.deployments.contains_key(&deployment.id) {
            return Err(StoreError::AlreadyExists(deployment.id.to_string()));
        }
        self.deployments.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn update_spec(&self, id: &DeploymentId, spec: DeploymentSpec) -> StoreResult<()> {
        let mut d = self
            .deployments
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        d.spec = spec;
        d.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(
        &self,
        id: &DeploymentId,
        expected_version: u64,
        status: DeploymentStatus,
    ) -> StoreResult<u64> {
        let mut d = self
            .deployments
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if d.version != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                actual: d.version,
            });
        }
        d.status = status;
        d.version += 1;
        d.updated_at = Utc::now();
        Ok(d.version)
    }

    async fn mark_deleted(&self, id: &DeploymentId) -> StoreResult<()> {
        let mut d = self
            .deployments
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        d.deleted_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    async fn delete(&self, id: &DeploymentId) -> StoreResult<()> {
        self.deployments
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
