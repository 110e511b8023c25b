//! Reconciliation tick
//!
//! One tick of one deployment:
//!
//! 1. read the deployment and a snapshot of its cluster resources
//! 2. create missing runtime units and mirror readiness
//! 3. build a plan if none is stored
//! 4. advance the head of the plan by one step
//! 5. write the status back with a compare-and-swap, then emit events
//!
//! A tick whose write loses the race leaves no trace; the next tick starts
//! over from the stored state.

use crate::action::ActionEnv;
use crate::cleanup::{remove_deployment_resources, CleanupReport};
use crate::context::{with_deadline, ReconcileContext};
use crate::drift::DriftDetector;
use crate::error::{ReconcileError, Result, StoreError};
use crate::events::EventBuffer;
use crate::executor::{execute_head, StepOutcome};
use crate::guard::CoordinationView;
use crate::plan::{create_plan, PlanInput};
use crate::resources::{create_initial_members, ensure_members};
use crate::state::DeploymentStore;
use chrono::{DateTime, Utc};
use dbop_types::{ActionType, ClusterEvent, Deployment, DeploymentId, ImageInfo};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Attempts at writing discovered image metadata before giving up
const IMAGE_WRITE_ATTEMPTS: usize = 5;

/// What a tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub deployment_id: DeploymentId,
    /// Action types of the plan created this tick
    pub planned: Option<Vec<ActionType>>,
    /// Why planning was refused, if it was
    pub blocked: Option<String>,
    pub step: StepOutcome,
    /// Version after the tick; unchanged if nothing was written
    pub version: u64,
    pub written: bool,
    /// Set when the deployment was deleted and its resources released
    pub cleanup: Option<CleanupReport>,
}

impl TickReport {
    fn new(deployment: &Deployment) -> Self {
        Self {
            deployment_id: deployment.id.clone(),
            planned: None,
            blocked: None,
            step: StepOutcome::Idle,
            version: deployment.version,
            written: false,
            cleanup: None,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.cleanup.is_some()
    }
}

/// Drives deployments towards their spec, one tick at a time
#[derive(Clone)]
pub struct Reconciler {
    ctx: ReconcileContext,
    store: Arc<dyn DeploymentStore>,
}

impl Reconciler {
    pub fn new(ctx: ReconcileContext, store: Arc<dyn DeploymentStore>) -> Self {
        Self { ctx, store }
    }

    pub fn context(&self) -> &ReconcileContext {
        &self.ctx
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    /// Run one tick for the deployment.
    pub async fn reconcile(&self, id: &DeploymentId) -> Result<TickReport> {
        self.reconcile_at(id, Utc::now()).await
    }

    /// Run one tick with an explicit clock.
    #[instrument(skip_all, fields(deployment_id = %id))]
    pub async fn reconcile_at(&self, id: &DeploymentId, now: DateTime<Utc>) -> Result<TickReport> {
        let deployment = self.store.get(id).await.map_err(|e| match e {
            StoreError::NotFound(_) => ReconcileError::NotFound(id.clone()),
            other => other.into(),
        })?;

        if deployment.is_deleted() {
            return self.remove(&deployment).await;
        }

        if let Err(e) = deployment.status.members.validate() {
            error!(error = %e, "Member list is inconsistent, not touching this deployment");
            return Err(e.into());
        }

        let deadline = self.ctx.config.operation_timeout();
        let snapshot = with_deadline(
            "snapshot cluster state",
            deadline,
            self.ctx.cluster.snapshot(id),
        )
        .await?;

        let mut report = TickReport::new(&deployment);
        let mut status = deployment.status.clone();
        let mut events = EventBuffer::new();
        let drift = DriftDetector::new(self.ctx.renderer.as_ref(), &self.ctx.config.drift);

        create_initial_members(&deployment.spec, &mut status, now)?;
        ensure_members(
            &mut ActionEnv {
                deployment_id: &deployment.id,
                deployment_name: &deployment.name,
                spec: &deployment.spec,
                status: &mut status,
                inspector: &snapshot,
                ctx: &self.ctx,
                events: &mut events,
                now,
            },
            &drift,
        )
        .await?;

        if status.plan.is_empty() {
            let plan_with = |view: &CoordinationView| {
                create_plan(&PlanInput {
                    deployment_id: &deployment.id,
                    deployment_name: &deployment.name,
                    spec: &deployment.spec,
                    status: &status,
                    inspector: &snapshot,
                    coordination: view,
                    drift: DriftDetector::new(self.ctx.renderer.as_ref(), &self.ctx.config.drift),
                    now,
                })
            };
            // The coordination layer is only read when a fragment needs it
            let mut planned = plan_with(&CoordinationView::deferred(&deployment.spec));
            if planned.as_ref().is_err_and(|e| e.needs_coordination()) {
                let view = CoordinationView::load(
                    self.ctx.coordination.as_ref(),
                    &deployment.id,
                    &deployment.spec,
                    &status.members,
                    self.ctx.config.coordination_timeout(),
                )
                .await;
                planned = plan_with(&view);
            }
            match planned {
                Ok(plan) if plan.is_empty() => debug!("Nothing to do"),
                Ok(plan) => {
                    let actions = plan.action_types();
                    info!(actions = ?actions, "Plan created");
                    events.push(ClusterEvent::PlanCreated {
                        actions: actions.clone(),
                    });
                    report.planned = Some(actions);
                    status.plan = plan;
                }
                Err(e) if e.is_quorum_unavailable() => {
                    warn!(error = %e, "Planning blocked");
                    events.push(ClusterEvent::PlanningBlocked {
                        reason: e.to_string(),
                    });
                    report.blocked = Some(e.to_string());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Planning failed, retrying next tick");
                    report.blocked = Some(e.to_string());
                }
            }
        }

        report.step = execute_head(&mut ActionEnv {
            deployment_id: &deployment.id,
            deployment_name: &deployment.name,
            spec: &deployment.spec,
            status: &mut status,
            inspector: &snapshot,
            ctx: &self.ctx,
            events: &mut events,
            now,
        })
        .await?;

        if status != deployment.status {
            let written = with_deadline(
                "write status",
                deadline,
                self.store.update_status(id, deployment.version, status),
            )
            .await;
            match written {
                Ok(version) => {
                    report.version = version;
                    report.written = true;
                }
                Err(StoreError::Conflict { expected, actual }) => {
                    warn!(expected, actual, "Status changed underneath, discarding tick");
                    return Err(ReconcileError::Conflict { expected, actual });
                }
                Err(e) => return Err(e.into()),
            }
        }

        events.flush(id, self.ctx.events.as_ref());
        Ok(report)
    }

    async fn remove(&self, deployment: &Deployment) -> Result<TickReport> {
        let deadline = self.ctx.config.operation_timeout();
        let snapshot = with_deadline(
            "snapshot cluster state",
            deadline,
            self.ctx.cluster.snapshot(&deployment.id),
        )
        .await?;
        let cleanup =
            remove_deployment_resources(self.ctx.cluster.as_ref(), &snapshot, deadline).await?;
        match self.store.delete(&deployment.id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!(name = %deployment.name, "Deployment removed");

        let mut report = TickReport::new(deployment);
        report.cleanup = Some(cleanup);
        Ok(report)
    }

    /// Store metadata for an image reference, retrying lost status races.
    ///
    /// Image discovery runs outside the tick; actions waiting on an image pick
    /// the metadata up from the status.
    pub async fn record_image(&self, id: &DeploymentId, info: ImageInfo) -> Result<u64> {
        let mut last = None;
        for _ in 0..IMAGE_WRITE_ATTEMPTS {
            let deployment = self.store.get(id).await?;
            if deployment.status.images.get_by_image(&info.image) == Some(&info) {
                return Ok(deployment.version);
            }
            let mut status = deployment.status;
            status.images.add_or_update(info.clone());
            match self.store.update_status(id, deployment.version, status).await {
                Ok(version) => {
                    info!(
                        deployment_id = %id,
                        image = %info.image,
                        version = %info.version,
                        "Image metadata recorded"
                    );
                    return Ok(version);
                }
                Err(StoreError::Conflict { expected, actual }) => {
                    debug!(deployment_id = %id, expected, actual, "Image write raced, retrying");
                    last = Some(ReconcileError::Conflict { expected, actual });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last.unwrap_or_else(|| ReconcileError::Transient("image write not attempted".into())))
    }
}
