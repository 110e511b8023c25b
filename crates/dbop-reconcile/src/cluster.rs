//! In-memory collaborators for development and tests

use crate::context::{
    ClusterStateStore, CoordinationReader, JobStatus, MemberClient, ResourceChange, ResourceKind,
};
use crate::error::{StoreError, StoreResult};
use crate::inspector::ClusterSnapshot;
use crate::render::LABEL_DEPLOYMENT;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use dbop_types::{CollectionListing, DeploymentId, MemberId, RuntimeUnit, Secret, VolumeClaim};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

fn labelled(labels: &BTreeMap<String, String>, deployment: &str) -> bool {
    labels.get(LABEL_DEPLOYMENT).map(String::as_str) == Some(deployment)
}

/// Cluster state store backed by concurrent maps
///
/// Units come up ready unless [`InMemoryClusterStore::with_auto_ready`] says
/// otherwise; deleting a resource with finalizers leaves it terminating until
/// they are removed.
pub struct InMemoryClusterStore {
    units: DashMap<String, RuntimeUnit>,
    claims: DashMap<String, VolumeClaim>,
    terminating_claims: DashSet<String>,
    secrets: DashMap<String, Secret>,
    next_uid: AtomicU64,
    auto_ready: AtomicBool,
    unavailable: AtomicBool,
    changes: broadcast::Sender<ResourceChange>,
}

impl InMemoryClusterStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            units: DashMap::new(),
            claims: DashMap::new(),
            terminating_claims: DashSet::new(),
            secrets: DashMap::new(),
            next_uid: AtomicU64::new(1),
            auto_ready: AtomicBool::new(true),
            unavailable: AtomicBool::new(false),
            changes,
        }
    }

    pub fn with_auto_ready(self, ready: bool) -> Self {
        self.auto_ready.store(ready, Ordering::SeqCst);
        self
    }

    /// Make every call fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_ready(&self, name: &str, ready: bool) -> bool {
        match self.units.get_mut(name) {
            Some(mut unit) => {
                unit.ready = ready;
                drop(unit);
                self.notify(ResourceKind::RuntimeUnit, name, None);
                true
            }
            None => false,
        }
    }

    /// Load resources as they are, UIDs included.
    pub fn restore(&self, snapshot: &ClusterSnapshot) {
        for (name, unit) in &snapshot.runtime_units {
            self.units.insert(name.clone(), unit.clone());
        }
        for (name, claim) in &snapshot.volume_claims {
            self.claims.insert(name.clone(), claim.clone());
        }
        for (name, secret) in &snapshot.secrets {
            self.secrets.insert(name.clone(), secret.clone());
        }
    }

    pub fn runtime_unit(&self, name: &str) -> Option<RuntimeUnit> {
        self.units.get(name).map(|u| u.clone())
    }

    pub fn runtime_unit_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.units.iter().map(|u| u.key().clone()).collect();
        names.sort();
        names
    }

    pub fn volume_claim(&self, name: &str) -> Option<VolumeClaim> {
        self.claims.get(name).map(|c| c.clone())
    }

    pub fn has_secret(&self, name: &str) -> bool {
        self.secrets.contains_key(name)
    }

    fn available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("cluster state store unavailable".into()));
        }
        Ok(())
    }

    fn notify(&self, kind: ResourceKind, name: &str, deployment: Option<String>) {
        // Nobody watching is fine
        let _ = self.changes.send(ResourceChange {
            kind,
            name: name.to_string(),
            deployment,
        });
    }
}

impl Default for InMemoryClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterStateStore for InMemoryClusterStore {
    async fn snapshot(&self, deployment: &DeploymentId) -> StoreResult<ClusterSnapshot> {
        self.available()?;
        let key = deployment.to_string();
        let mut snapshot = ClusterSnapshot::new();
        for unit in self.units.iter().filter(|u| labelled(&u.labels, &key)) {
            snapshot
                .runtime_units
                .insert(unit.key().clone(), unit.value().clone());
        }
        for claim in self.claims.iter().filter(|c| labelled(&c.labels, &key)) {
            snapshot
                .volume_claims
                .insert(claim.key().clone(), claim.value().clone());
        }
        for secret in self.secrets.iter().filter(|s| labelled(&s.labels, &key)) {
            snapshot
                .secrets
                .insert(secret.key().clone(), secret.value().clone());
        }
        Ok(snapshot)
    }

    async fn create_runtime_unit(&self, mut unit: RuntimeUnit) -> StoreResult<RuntimeUnit> {
        self.available()?;
        if self.units.contains_key(&unit.name) {
            return Err(StoreError::AlreadyExists(unit.name));
        }
        unit.uid = format!("unit-{}", self.next_uid.fetch_add(1, Ordering::SeqCst));
        unit.ready = self.auto_ready.load(Ordering::SeqCst);
        unit.terminating = false;
        debug!(name = %unit.name, uid = %unit.uid, "Runtime unit created");
        self.units.insert(unit.name.clone(), unit.clone());
        self.notify(
            ResourceKind::RuntimeUnit,
            &unit.name,
            unit.labels.get(LABEL_DEPLOYMENT).cloned(),
        );
        Ok(unit)
    }

    async fn get_runtime_unit(&self, name: &str) -> StoreResult<RuntimeUnit> {
        self.available()?;
        self.runtime_unit(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn delete_runtime_unit(&self, name: &str) -> StoreResult<()> {
        self.available()?;
        let blocked = match self.units.get_mut(name) {
            None => return Err(StoreError::NotFound(name.to_string())),
            Some(mut unit) if !unit.finalizers.is_empty() => {
                unit.terminating = true;
                unit.ready = false;
                true
            }
            Some(_) => false,
        };
        if !blocked {
            self.units.remove(name);
        }
        self.notify(ResourceKind::RuntimeUnit, name, None);
        Ok(())
    }

    async fn remove_runtime_unit_finalizers(
        &self,
        name: &str,
        finalizers: &[String],
    ) -> StoreResult<()> {
        self.available()?;
        let gone = match self.units.get_mut(name) {
            None => return Err(StoreError::NotFound(name.to_string())),
            Some(mut unit) => {
                unit.finalizers.retain(|f| !finalizers.contains(f));
                unit.terminating && unit.finalizers.is_empty()
            }
        };
        if gone {
            self.units.remove(name);
        }
        self.notify(ResourceKind::RuntimeUnit, name, None);
        Ok(())
    }

    async fn create_volume_claim(&self, claim: VolumeClaim) -> StoreResult<()> {
        self.available()?;
        if self.claims.contains_key(&claim.name) {
            return Err(StoreError::AlreadyExists(claim.name));
        }
        let name = claim.name.clone();
        let deployment = claim.labels.get(LABEL_DEPLOYMENT).cloned();
        self.claims.insert(name.clone(), claim);
        self.notify(ResourceKind::VolumeClaim, &name, deployment);
        Ok(())
    }

    async fn delete_volume_claim(&self, name: &str) -> StoreResult<()> {
        self.available()?;
        let blocked = match self.claims.get(name) {
            None => return Err(StoreError::NotFound(name.to_string())),
            Some(claim) => !claim.finalizers.is_empty(),
        };
        if blocked {
            self.terminating_claims.insert(name.to_string());
        } else {
            self.claims.remove(name);
        }
        self.notify(ResourceKind::VolumeClaim, name, None);
        Ok(())
    }

    async fn remove_volume_claim_finalizers(
        &self,
        name: &str,
        finalizers: &[String],
    ) -> StoreResult<()> {
        self.available()?;
        let empty = match self.claims.get_mut(name) {
            None => return Err(StoreError::NotFound(name.to_string())),
            Some(mut claim) => {
                claim.finalizers.retain(|f| !finalizers.contains(f));
                claim.finalizers.is_empty()
            }
        };
        if empty && self.terminating_claims.remove(name).is_some() {
            self.claims.remove(name);
        }
        self.notify(ResourceKind::VolumeClaim, name, None);
        Ok(())
    }

    async fn create_secret(&self, secret: Secret) -> StoreResult<()> {
        self.available()?;
        if self.secrets.contains_key(&secret.name) {
            return Err(StoreError::AlreadyExists(secret.name));
        }
        let name = secret.name.clone();
        let deployment = secret.labels.get(LABEL_DEPLOYMENT).cloned();
        self.secrets.insert(name.clone(), secret);
        self.notify(ResourceKind::Secret, &name, deployment);
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> StoreResult<()> {
        self.available()?;
        self.secrets
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        self.notify(ResourceKind::Secret, name, None);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<ResourceChange> {
        self.changes.subscribe()
    }
}

/// Coordination reader serving listings set by the caller
#[derive(Default)]
pub struct StaticCoordinationReader {
    listings: DashMap<DeploymentId, CollectionListing>,
    failing: AtomicBool,
    reads: AtomicUsize,
}

impl StaticCoordinationReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listing(&self, deployment: DeploymentId, listing: CollectionListing) {
        self.listings.insert(deployment, listing);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of listings requested so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationReader for StaticCoordinationReader {
    async fn collections(&self, deployment: &DeploymentId) -> StoreResult<CollectionListing> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("coordination layer unreachable".into()));
        }
        Ok(self
            .listings
            .get(deployment)
            .map(|l| l.clone())
            .unwrap_or_default())
    }
}

/// Member client whose jobs finish on demand
pub struct StaticMemberClient {
    jobs: DashMap<String, JobStatus>,
    resigned: DashMap<MemberId, String>,
    next_job: AtomicU64,
    auto_complete: AtomicBool,
}

impl StaticMemberClient {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            resigned: DashMap::new(),
            next_job: AtomicU64::new(1),
            auto_complete: AtomicBool::new(true),
        }
    }

    /// Jobs stay pending until [`StaticMemberClient::complete_job`].
    pub fn with_manual_jobs(self) -> Self {
        self.auto_complete.store(false, Ordering::SeqCst);
        self
    }

    pub fn complete_job(&self, job_id: &str, status: JobStatus) -> bool {
        match self.jobs.get_mut(job_id) {
            Some(mut job) => {
                *job = status;
                true
            }
            None => false,
        }
    }

    /// Job started for `member`, if leadership was resigned.
    pub fn job_for(&self, member: &MemberId) -> Option<String> {
        self.resigned.get(member).map(|j| j.clone())
    }

    pub fn resign_count(&self) -> usize {
        self.jobs.len()
    }
}

impl Default for StaticMemberClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemberClient for StaticMemberClient {
    async fn resign_leadership(
        &self,
        _deployment: &DeploymentId,
        member: &MemberId,
    ) -> StoreResult<String> {
        let job_id = format!("job-{}", self.next_job.fetch_add(1, Ordering::SeqCst));
        let status = if self.auto_complete.load(Ordering::SeqCst) {
            JobStatus::Finished
        } else {
            JobStatus::Pending
        };
        self.jobs.insert(job_id.clone(), status);
        self.resigned.insert(member.clone(), job_id.clone());
        Ok(job_id)
    }

    async fn job_status(&self, _deployment: &DeploymentId, job_id: &str) -> StoreResult<JobStatus> {
        self.jobs
            .get(job_id)
            .map(|j| j.clone())
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbop_types::{RuntimeUnitSpec, ServerGroup};

    fn unit(name: &str, deployment: &DeploymentId, finalizers: &[&str]) -> RuntimeUnit {
        RuntimeUnit {
            name: name.into(),
            uid: String::new(),
            member_id: MemberId::new("PRMR-1"),
            group: ServerGroup::DbServers,
            labels: BTreeMap::from([(LABEL_DEPLOYMENT.to_string(), deployment.to_string())]),
            spec: RuntimeUnitSpec::default(),
            ready: false,
            finalizers: finalizers.iter().map(|f| f.to_string()).collect(),
            terminating: false,
        }
    }

    #[tokio::test]
    async fn test_uid_assigned_and_duplicate_rejected() {
        let store = InMemoryClusterStore::new();
        let id = DeploymentId::generate();
        let first = store.create_runtime_unit(unit("a", &id, &[])).await.unwrap();
        assert!(!first.uid.is_empty());
        assert!(first.ready);
        assert!(store
            .create_runtime_unit(unit("a", &id, &[]))
            .await
            .unwrap_err()
            .is_already_exists());
    }

    #[tokio::test]
    async fn test_finalizers_block_deletion() {
        let store = InMemoryClusterStore::new();
        let id = DeploymentId::generate();
        store
            .create_runtime_unit(unit("a", &id, &["drain"]))
            .await
            .unwrap();

        store.delete_runtime_unit("a").await.unwrap();
        assert!(store.runtime_unit("a").unwrap().terminating);

        store
            .remove_runtime_unit_finalizers("a", &["drain".to_string()])
            .await
            .unwrap();
        assert!(store.runtime_unit("a").is_none());
        assert!(store.delete_runtime_unit("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_snapshot_filters_by_deployment() {
        let store = InMemoryClusterStore::new();
        let mine = DeploymentId::generate();
        let other = DeploymentId::generate();
        store.create_runtime_unit(unit("a", &mine, &[])).await.unwrap();
        store.create_runtime_unit(unit("b", &other, &[])).await.unwrap();

        let snapshot = store.snapshot(&mine).await.unwrap();
        assert_eq!(snapshot.runtime_units.len(), 1);
        assert!(snapshot.runtime_units.contains_key("a"));
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let store = InMemoryClusterStore::new();
        let mut rx = store.watch();
        let id = DeploymentId::generate();
        store.create_runtime_unit(unit("a", &id, &[])).await.unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ResourceKind::RuntimeUnit);
        assert_eq!(change.deployment, Some(id.to_string()));
    }

    #[tokio::test]
    async fn test_manual_jobs() {
        let client = StaticMemberClient::new().with_manual_jobs();
        let id = DeploymentId::generate();
        let member = MemberId::new("PRMR-1");
        let job = client.resign_leadership(&id, &member).await.unwrap();
        assert_eq!(client.job_status(&id, &job).await.unwrap(), JobStatus::Pending);

        assert!(client.complete_job(&job, JobStatus::Finished));
        assert_eq!(client.job_status(&id, &job).await.unwrap(), JobStatus::Finished);
        assert_eq!(client.job_for(&member), Some(job));
    }
}
