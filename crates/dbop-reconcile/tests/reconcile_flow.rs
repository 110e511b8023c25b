//! End-to-end ticks against the in-memory backends.
//!
//! Covers:
//! - configuration drift rotates members one at a time
//! - no agent quorum blocks planning without touching anything
//! - an image change waits for its metadata before committing
//! - a lost status race leaves no events behind

use async_trait::async_trait;
use dbop_reconcile::{
    BroadcastEventSink, DefaultRenderer, DeploymentStore, InMemoryClusterStore,
    InMemoryDeploymentStore, ReconcileConfig, ReconcileContext, ReconcileError, Reconciler,
    StaticCoordinationReader, StaticMemberClient, StepOutcome, StoreResult, TickReport,
};
use dbop_types::{
    ActionType, ClusterEvent, Deployment, DeploymentId, DeploymentMode, DeploymentSpec,
    DeploymentStatus, EventEnvelope, ImageInfo, Member, ServerGroup,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MAX_TICKS: usize = 200;

fn image(reference: &str, minor: u64) -> ImageInfo {
    ImageInfo {
        image: reference.into(),
        image_id: format!("sha256:{minor:04}"),
        version: semver::Version::new(3, minor, 0),
        enterprise: false,
    }
}

struct Env {
    reconciler: Reconciler,
    store: Arc<dyn DeploymentStore>,
    cluster: Arc<InMemoryClusterStore>,
    events: broadcast::Receiver<EventEnvelope>,
    id: DeploymentId,
}

impl Env {
    async fn new() -> Self {
        Self::with_store(Arc::new(InMemoryDeploymentStore::new())).await
    }

    async fn with_store(store: Arc<dyn DeploymentStore>) -> Self {
        let cluster = Arc::new(InMemoryClusterStore::new());
        let sink = Arc::new(BroadcastEventSink::default());
        let events = sink.subscribe();
        let ctx = ReconcileContext::new(
            cluster.clone(),
            Arc::new(StaticCoordinationReader::new()),
            Arc::new(StaticMemberClient::new()),
            Arc::new(DefaultRenderer),
            sink,
            ReconcileConfig::default(),
        );

        let mut deployment = Deployment::new(
            "demo",
            DeploymentSpec::new(DeploymentMode::Cluster, "db:3.10"),
        );
        deployment.status.images.add_or_update(image("db:3.10", 10));
        let id = deployment.id.clone();
        store.create(deployment).await.unwrap();

        Self {
            reconciler: Reconciler::new(ctx, store.clone()),
            store,
            cluster,
            events,
            id,
        }
    }

    async fn tick(&self) -> TickReport {
        self.reconciler.reconcile(&self.id).await.unwrap()
    }

    /// Tick until a tick neither plans, steps nor writes.
    async fn settle(&self) -> Vec<TickReport> {
        let mut reports = Vec::new();
        for _ in 0..MAX_TICKS {
            let report = self.tick().await;
            let quiet = report.planned.is_none()
                && report.step == StepOutcome::Idle
                && !report.written;
            reports.push(report);
            if quiet {
                return reports;
            }
        }
        panic!("deployment did not settle within {MAX_TICKS} ticks");
    }

    async fn status(&self) -> DeploymentStatus {
        self.store.get(&self.id).await.unwrap().status
    }

    async fn edit_spec(&self, edit: impl FnOnce(&mut DeploymentSpec)) {
        let mut spec = self.store.get(&self.id).await.unwrap().spec;
        edit(&mut spec);
        self.store.update_spec(&self.id, spec).await.unwrap();
    }

    fn drain_events(&mut self) -> Vec<ClusterEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = self.events.try_recv() {
            events.push(envelope.event);
        }
        events
    }
}

fn members(status: &DeploymentStatus, group: ServerGroup) -> BTreeMap<String, Member> {
    status
        .members
        .group(group)
        .iter()
        .map(|m| (m.id.to_string(), m.clone()))
        .collect()
}

fn completed(reports: &[TickReport], action: ActionType) -> usize {
    reports
        .iter()
        .filter(|r| r.step == StepOutcome::Completed(action))
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_deployment_converges() {
    let mut env = Env::new().await;
    env.settle().await;

    let status = env.status().await;
    assert_eq!(status.members.len(), 9);
    assert!(status.members.iter().all(|(_, m)| m.is_ready()));
    assert!(status.plan.is_empty());
    assert_eq!(env.cluster.runtime_unit_names().len(), 9);

    let created = env
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ClusterEvent::MemberCreated { .. }))
        .count();
    assert_eq!(created, 9);
}

#[tokio::test]
async fn configuration_drift_rotates_members_one_at_a_time() {
    let env = Env::new().await;
    env.settle().await;
    let before = env.status().await;

    env.edit_spec(|spec| spec.coordinators.args.push("--query.memory-limit=1g".into()))
        .await;
    let reports = env.settle().await;

    // Every plan rotates exactly one member
    let plans: Vec<_> = reports.iter().filter_map(|r| r.planned.clone()).collect();
    assert_eq!(plans.len(), 3);
    for plan in &plans {
        assert_eq!(
            plan,
            &vec![
                ActionType::CleanTlsKeyfile,
                ActionType::ResignLeadership,
                ActionType::RotateMember,
                ActionType::WaitForMemberUp,
                ActionType::WaitForMemberInSync,
            ]
        );
    }
    assert_eq!(completed(&reports, ActionType::RotateMember), 3);

    let after = env.status().await;
    let (old, new) = (
        members(&before, ServerGroup::Coordinators),
        members(&after, ServerGroup::Coordinators),
    );
    for (id, member) in &new {
        assert_ne!(member.fingerprint, old[id].fingerprint, "{id} kept its fingerprint");
        assert_ne!(member.runtime_uid, old[id].runtime_uid, "{id} was not recreated");
        assert!(member.is_ready());
    }
    assert_eq!(
        members(&before, ServerGroup::Agents),
        members(&after, ServerGroup::Agents)
    );
    assert_eq!(
        members(&before, ServerGroup::DbServers),
        members(&after, ServerGroup::DbServers)
    );
}

#[tokio::test]
async fn lost_agent_quorum_blocks_planning() {
    let mut env = Env::new().await;
    env.settle().await;
    env.drain_events();

    let agents: Vec<String> = env
        .status()
        .await
        .members
        .agents
        .iter()
        .filter_map(|m| m.runtime_unit.clone())
        .collect();
    for unit in &agents {
        assert!(env.cluster.set_ready(unit, false));
    }
    env.edit_spec(|spec| spec.coordinators.args.push("--log.level=debug".into()))
        .await;

    for _ in 0..3 {
        let report = env.tick().await;
        assert!(report.planned.is_none());
        assert!(report
            .blocked
            .as_deref()
            .is_some_and(|reason| reason.contains("0 of 3")));
        assert_eq!(report.step, StepOutcome::Idle);
        assert!(env.status().await.plan.is_empty());
    }
    let events = env.drain_events();
    assert!(!events.is_empty());
    assert!(events
        .iter()
        .all(|e| matches!(e, ClusterEvent::PlanningBlocked { .. })));

    // Quorum back, the rotation goes ahead
    for unit in &agents {
        env.cluster.set_ready(unit, true);
    }
    let mut planned = None;
    for _ in 0..3 {
        if let Some(plan) = env.tick().await.planned {
            planned = Some(plan);
            break;
        }
    }
    assert!(planned.is_some_and(|p| p.contains(&ActionType::RotateMember)));
}

#[tokio::test]
async fn image_change_waits_for_metadata() {
    let env = Env::new().await;
    env.settle().await;

    env.edit_spec(|spec| spec.image = "db:3.11".into()).await;
    let report = env.tick().await;
    assert_eq!(report.planned, Some(vec![ActionType::SetCurrentImage]));
    assert_eq!(report.step, StepOutcome::Started(ActionType::SetCurrentImage));

    for _ in 0..3 {
        let report = env.tick().await;
        assert_eq!(report.step, StepOutcome::InProgress(ActionType::SetCurrentImage));
        assert_eq!(
            env.status().await.current_image.map(|i| i.image).as_deref(),
            Some("db:3.10")
        );
    }

    env.reconciler
        .record_image(&env.id, image("db:3.11", 11))
        .await
        .unwrap();
    let report = env.tick().await;
    assert_eq!(report.step, StepOutcome::Completed(ActionType::SetCurrentImage));
    assert_eq!(env.status().await.current_image, Some(image("db:3.11", 11)));

    // Members now drift towards the new image
    let report = env.tick().await;
    assert!(report
        .planned
        .is_some_and(|p| p.contains(&ActionType::RotateMember)));
}

/// Lets one concurrent writer in ahead of the next status write
struct RacingStore {
    inner: InMemoryDeploymentStore,
    race_next: AtomicBool,
}

#[async_trait]
impl DeploymentStore for RacingStore {
    async fn get(&self, id: &DeploymentId) -> StoreResult<Deployment> {
        self.inner.get(id).await
    }

    async fn list(&self) -> StoreResult<Vec<Deployment>> {
        self.inner.list().await
    }

    async fn create(&self, deployment: Deployment) -> StoreResult<()> {
        self.inner.create(deployment).await
    }

    async fn update_spec(&self, id: &DeploymentId, spec: DeploymentSpec) -> StoreResult<()> {
        self.inner.update_spec(id, spec).await
    }

    async fn update_status(
        &self,
        id: &DeploymentId,
        expected_version: u64,
        status: DeploymentStatus,
    ) -> StoreResult<u64> {
        if self.race_next.swap(false, Ordering::SeqCst) {
            let current = self.inner.get(id).await?;
            self.inner
                .update_status(id, current.version, current.status)
                .await?;
        }
        self.inner.update_status(id, expected_version, status).await
    }

    async fn mark_deleted(&self, id: &DeploymentId) -> StoreResult<()> {
        self.inner.mark_deleted(id).await
    }

    async fn delete(&self, id: &DeploymentId) -> StoreResult<()> {
        self.inner.delete(id).await
    }
}

#[tokio::test]
async fn lost_status_race_discards_tick() {
    let store = Arc::new(RacingStore {
        inner: InMemoryDeploymentStore::new(),
        race_next: AtomicBool::new(false),
    });
    let mut env = Env::with_store(store.clone()).await;
    env.settle().await;
    env.drain_events();

    env.edit_spec(|spec| spec.coordinators.args.push("--log.level=debug".into()))
        .await;
    let version = env.store.get(&env.id).await.unwrap().version;
    store.race_next.store(true, Ordering::SeqCst);

    let err = env.reconciler.reconcile(&env.id).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Conflict { expected, actual } if expected == version && actual == version + 1
    ));
    assert!(env.drain_events().is_empty());
    assert!(env.status().await.plan.is_empty());

    // Planned again from scratch
    let report = env.tick().await;
    assert!(report.written);
    assert!(report.planned.is_some());
    assert!(matches!(
        env.drain_events().first(),
        Some(ClusterEvent::PlanCreated { .. })
    ));
}

#[tokio::test]
async fn deleted_deployment_releases_resources() {
    let env = Env::new().await;
    env.settle().await;
    assert!(!env.cluster.runtime_unit_names().is_empty());

    env.store.mark_deleted(&env.id).await.unwrap();
    let report = env.tick().await;
    let cleanup = report.cleanup.expect("cleanup report");
    assert_eq!(cleanup.runtime_units, 9);
    assert!(env.cluster.runtime_unit_names().is_empty());
    assert!(env.store.get(&env.id).await.unwrap_err().is_not_found());
}
