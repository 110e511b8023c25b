//! Daemon wiring and lifecycle

use crate::config::DaemonConfig;
use crate::error::DaemonResult;
use crate::manifest::Manifest;
use crate::scheduler::Scheduler;
use dbop_reconcile::{
    BroadcastEventSink, DefaultRenderer, DeploymentStore, InMemoryClusterStore,
    InMemoryDeploymentStore, ReconcileContext, Reconciler, StaticCoordinationReader,
    StaticMemberClient,
};
use dbop_types::{EventEnvelope, EventSeverity};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// dbop daemon
pub struct Daemon {
    scheduler: Arc<Scheduler>,
    trigger_rx: tokio::sync::mpsc::Receiver<()>,
    events: Arc<BroadcastEventSink>,
    store: Arc<dyn DeploymentStore>,
}

impl Daemon {
    /// Build the in-memory backends and seed them from the manifest.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let manifest = match &config.manifest {
            Some(path) => Manifest::load(path)?,
            None => Manifest::default(),
        };

        let store: Arc<dyn DeploymentStore> = Arc::new(InMemoryDeploymentStore::new());
        let events = Arc::new(BroadcastEventSink::default());
        let ctx = ReconcileContext::new(
            Arc::new(InMemoryClusterStore::new()),
            Arc::new(StaticCoordinationReader::new()),
            Arc::new(StaticMemberClient::new()),
            Arc::new(DefaultRenderer),
            events.clone(),
            config.reconcile.clone(),
        );

        let seeded = manifest.seed(store.as_ref()).await?;
        info!(deployments = seeded.len(), images = manifest.images.len(), "Manifest loaded");

        let reconciler = Reconciler::new(ctx, store.clone());
        let (scheduler, trigger_rx) = Scheduler::new(reconciler, manifest.catalog());

        Ok(Self {
            scheduler,
            trigger_rx,
            events,
            store,
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    /// Run until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> DaemonResult<()> {
        let event_log = tokio::spawn(log_events(self.events.subscribe()));
        self.scheduler.run(self.trigger_rx, shutdown).await;
        event_log.abort();
        info!("dbop daemon stopped");
        Ok(())
    }
}

/// Mirror controller events into the log.
async fn log_events(mut rx: broadcast::Receiver<EventEnvelope>) {
    loop {
        match rx.recv().await {
            Ok(envelope) => match envelope.severity {
                EventSeverity::Info => {
                    info!(
                        deployment_id = %envelope.deployment_id,
                        event = ?envelope.event,
                        "Event"
                    )
                }
                EventSeverity::Warning => {
                    warn!(
                        deployment_id = %envelope.deployment_id,
                        event = ?envelope.event,
                        "Event"
                    )
                }
                EventSeverity::Error => {
                    error!(
                        deployment_id = %envelope.deployment_id,
                        event = ?envelope.event,
                        "Event"
                    )
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
