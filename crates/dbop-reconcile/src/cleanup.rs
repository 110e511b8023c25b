//! Teardown of a deleted deployment's resources

use crate::context::{ignore_not_found, with_deadline, ClusterStateStore};
use crate::error::Result;
use crate::inspector::Inspector;
use std::time::Duration;
use tracing::{debug, info};

/// What a cleanup pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub runtime_units: usize,
    pub volume_claims: usize,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.runtime_units == 0 && self.volume_claims == 0
    }
}

/// Release every finalizer the controller placed and delete the runtime units.
///
/// Volume claims only lose their finalizers; deleting user data is left to
/// whoever owns the claims. Resources that are already gone are skipped.
pub async fn remove_deployment_resources(
    cluster: &dyn ClusterStateStore,
    inspector: &dyn Inspector,
    deadline: Duration,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    let units: Vec<_> = inspector.runtime_units().cloned().collect();
    let claims: Vec<_> = inspector.volume_claims().cloned().collect();

    for unit in units {
        if !unit.finalizers.is_empty() {
            ignore_not_found(
                with_deadline(
                    "remove runtime unit finalizers",
                    deadline,
                    cluster.remove_runtime_unit_finalizers(&unit.name, &unit.finalizers),
                )
                .await,
            )?;
        }
        if !unit.terminating {
            ignore_not_found(
                with_deadline(
                    "delete runtime unit",
                    deadline,
                    cluster.delete_runtime_unit(&unit.name),
                )
                .await,
            )?;
        }
        debug!(unit = %unit.name, "Runtime unit removed");
        report.runtime_units += 1;
    }

    for claim in claims {
        if claim.finalizers.is_empty() {
            continue;
        }
        ignore_not_found(
            with_deadline(
                "remove volume claim finalizers",
                deadline,
                cluster.remove_volume_claim_finalizers(&claim.name, &claim.finalizers),
            )
            .await,
        )?;
        report.volume_claims += 1;
    }

    if !report.is_empty() {
        info!(
            runtime_units = report.runtime_units,
            volume_claims = report.volume_claims,
            "Deployment resources released"
        );
    }
    Ok(report)
}
