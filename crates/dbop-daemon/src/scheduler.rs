//! Reconciliation loop and scheduler
//!
//! A pass ticks every managed deployment once. Passes run one after another,
//! so a deployment is never reconciled by two ticks at the same time; within a
//! pass up to `max_concurrent_deployments` deployments tick concurrently.

use dbop_reconcile::{ReconcileError, Reconciler, TickReport};
use dbop_types::{Deployment, DeploymentId, ImageList};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Counts from one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub reconciled: usize,
    /// Ticks that wrote a new status
    pub written: usize,
    /// Ticks that moved a plan forward
    pub advanced: usize,
    /// Ticks retried on the next pass
    pub retried: usize,
    /// Deployments left alone until their member list is repaired
    pub fatal: usize,
}

/// Scheduler state
pub struct Scheduler {
    reconciler: Reconciler,
    catalog: ImageList,
    trigger_tx: mpsc::Sender<()>,
}

impl Scheduler {
    /// Create a scheduler. The receiver is handed to [`Scheduler::run`].
    pub fn new(reconciler: Reconciler, catalog: ImageList) -> (Arc<Self>, mpsc::Receiver<()>) {
        // One pending trigger is enough; later ones coalesce
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let scheduler = Arc::new(Self {
            reconciler,
            catalog,
            trigger_tx,
        });
        (scheduler, trigger_rx)
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Request a pass as soon as the current one is done.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Run passes on every interval, trigger and cluster change until
    /// `shutdown` resolves.
    pub async fn run(
        self: Arc<Self>,
        mut trigger_rx: mpsc::Receiver<()>,
        shutdown: impl Future<Output = ()>,
    ) {
        let config = &self.reconciler.context().config;
        let mut ticker = interval(config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut changes = self.reconciler.context().cluster.watch();
        tokio::pin!(shutdown);

        info!(
            interval_secs = config.interval_secs,
            max_concurrent = config.max_concurrent_deployments,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
                Some(()) = trigger_rx.recv() => debug!("Triggered pass"),
                Ok(change) = changes.recv() => {
                    debug!(kind = ?change.kind, name = %change.name, "Cluster change");
                    // Fold a burst of changes into one pass
                    while changes.try_recv().is_ok() {}
                }
            }
            self.reconcile_all().await;
        }

        info!("Scheduler stopped");
    }

    /// Tick every deployment once.
    pub async fn reconcile_all(&self) -> PassSummary {
        let deployments = match self.reconciler.store().list().await {
            Ok(deployments) => deployments,
            Err(e) => {
                warn!(error = %e, "Listing deployments failed, skipping pass");
                return PassSummary::default();
            }
        };
        let limit = self
            .reconciler
            .context()
            .config
            .max_concurrent_deployments
            .max(1);

        let results: Vec<_> = stream::iter(deployments)
            .map(|deployment| async move {
                self.discover_image(&deployment).await;
                let result = self.reconciler.reconcile(&deployment.id).await;
                (deployment.id, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut summary = PassSummary::default();
        for (id, result) in results {
            summary.reconciled += 1;
            match result {
                Ok(report) => record(&mut summary, &report),
                Err(e) => fail(&mut summary, &id, &e),
            }
        }
        debug!(
            reconciled = summary.reconciled,
            written = summary.written,
            advanced = summary.advanced,
            retried = summary.retried,
            "Pass finished"
        );
        summary
    }

    /// Hand out catalog metadata for the spec image if the deployment lacks it.
    async fn discover_image(&self, deployment: &Deployment) {
        let image = &deployment.spec.image;
        if deployment.status.images.get_by_image(image).is_some() {
            return;
        }
        let Some(info) = self.catalog.get_by_image(image) else {
            return;
        };
        if let Err(e) = self
            .reconciler
            .record_image(&deployment.id, info.clone())
            .await
        {
            warn!(
                deployment_id = %deployment.id,
                image = %image,
                error = %e,
                "Recording image failed"
            );
        }
    }
}

fn record(summary: &mut PassSummary, report: &TickReport) {
    if report.written {
        summary.written += 1;
    }
    if report.step.advanced() {
        summary.advanced += 1;
    }
    if report.blocked.is_some() {
        summary.retried += 1;
    }
}

fn fail(summary: &mut PassSummary, id: &DeploymentId, err: &ReconcileError) {
    if err.is_fatal() {
        summary.fatal += 1;
        error!(deployment_id = %id, error = %err, "Deployment needs manual repair");
    } else if matches!(err, ReconcileError::NotFound(_)) {
        // Removed between listing and tick
        debug!(deployment_id = %id, "Deployment gone");
    } else {
        summary.retried += 1;
        warn!(deployment_id = %id, error = %err, "Tick failed, retrying next pass");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbop_reconcile::{
        BroadcastEventSink, DefaultRenderer, DeploymentStore, InMemoryClusterStore,
        InMemoryDeploymentStore, ReconcileConfig, ReconcileContext, StaticCoordinationReader,
        StaticMemberClient,
    };
    use chrono::Utc;
    use dbop_types::{DeploymentMode, DeploymentSpec, ImageInfo, Member, MemberId, ServerGroup};
    use std::time::Duration;

    fn image(reference: &str) -> ImageInfo {
        ImageInfo {
            image: reference.into(),
            image_id: "sha256:cccc".into(),
            version: semver::Version::new(3, 11, 4),
            enterprise: false,
        }
    }

    fn reconciler(store: Arc<InMemoryDeploymentStore>) -> Reconciler {
        let ctx = ReconcileContext::new(
            Arc::new(InMemoryClusterStore::new()),
            Arc::new(StaticCoordinationReader::new()),
            Arc::new(StaticMemberClient::new()),
            Arc::new(DefaultRenderer),
            Arc::new(BroadcastEventSink::default()),
            ReconcileConfig::default(),
        );
        Reconciler::new(ctx, store)
    }

    async fn add(
        store: &InMemoryDeploymentStore,
        name: &str,
        mode: DeploymentMode,
    ) -> DeploymentId {
        let deployment = Deployment::new(name, DeploymentSpec::new(mode, "db:3.11"));
        let id = deployment.id.clone();
        store.create(deployment).await.unwrap();
        id
    }

    fn catalog() -> ImageList {
        let mut catalog = ImageList::new();
        catalog.add_or_update(image("db:3.11"));
        catalog
    }

    #[tokio::test]
    async fn test_pass_discovers_images_and_creates_members() {
        let store = Arc::new(InMemoryDeploymentStore::new());
        let a = add(&store, "a", DeploymentMode::Cluster).await;
        let b = add(&store, "b", DeploymentMode::Single).await;
        let (scheduler, _rx) = Scheduler::new(reconciler(store.clone()), catalog());

        let summary = scheduler.reconcile_all().await;
        assert_eq!(summary.reconciled, 2);
        assert_eq!(summary.written, 2);

        let a = store.get(&a).await.unwrap();
        assert_eq!(a.status.members.len(), 9);
        assert_eq!(a.status.current_image, Some(image("db:3.11")));
        let b = store.get(&b).await.unwrap();
        assert_eq!(b.status.members.len(), 1);
    }

    #[tokio::test]
    async fn test_broken_deployment_does_not_stop_others() {
        let store = Arc::new(InMemoryDeploymentStore::new());
        let broken = add(&store, "broken", DeploymentMode::Single).await;
        add(&store, "fine", DeploymentMode::Single).await;

        let mut deployment = store.get(&broken).await.unwrap();
        let member = Member::new(MemberId::generate(ServerGroup::Agents), Utc::now());
        deployment.status.members.single.push(member);
        store
            .update_status(&broken, 0, deployment.status)
            .await
            .unwrap();

        let (scheduler, _rx) = Scheduler::new(reconciler(store.clone()), catalog());
        let summary = scheduler.reconcile_all().await;
        assert_eq!(summary.fatal, 1);
        assert_eq!(summary.written, 1);
    }

    #[tokio::test]
    async fn test_summary_counts_plan_steps() {
        let store = Arc::new(InMemoryDeploymentStore::new());
        let id = add(&store, "a", DeploymentMode::Cluster).await;
        let (scheduler, _rx) = Scheduler::new(reconciler(store.clone()), catalog());

        let mut settled = false;
        for _ in 0..50 {
            let summary = scheduler.reconcile_all().await;
            if summary.written == 0 && summary.advanced == 0 {
                settled = true;
                break;
            }
        }
        assert!(settled);

        let mut spec = store.get(&id).await.unwrap().spec;
        spec.coordinators.args = vec!["--log.level=debug".into()];
        store.update_spec(&id, spec).await.unwrap();

        let summary = scheduler.reconcile_all().await;
        assert_eq!(summary.advanced, 1);
        assert_eq!(summary.written, 1);
        assert!(!store.get(&id).await.unwrap().status.plan.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let store = Arc::new(InMemoryDeploymentStore::new());
        let id = add(&store, "a", DeploymentMode::Cluster).await;
        let (scheduler, rx) = Scheduler::new(reconciler(store.clone()), catalog());

        scheduler
            .clone()
            .run(rx, tokio::time::sleep(Duration::from_secs(60)))
            .await;

        let deployment = store.get(&id).await.unwrap();
        assert!(deployment.status.members.iter().all(|(_, m)| m.is_ready()));
        assert!(deployment.status.plan.is_empty());
    }
}
