//! Consensus guard
//!
//! Coordination-layer state is only trusted while at least one coordination
//! member reports ready. Every read of that state goes through this module.

use crate::context::{with_deadline, CoordinationReader};
use crate::error::{ReconcileError, Result};
use dbop_types::{CollectionListing, DeploymentId, DeploymentSpec, MemberList, ServerGroup};
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a successful quorum check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quorum {
    /// The mode has no coordination layer
    NotRequired,
    /// `ready` coordination members report ready
    Available { ready: usize },
}

/// Check that the coordination layer can be trusted.
///
/// Fails with [`ReconcileError::CoordinationUnavailable`] when no coordination
/// member is ready in a mode that has a coordination layer.
pub fn check_quorum(spec: &DeploymentSpec, members: &MemberList) -> Result<Quorum> {
    if !spec.mode.uses_coordination_layer() {
        return Ok(Quorum::NotRequired);
    }
    let coordination: Vec<ServerGroup> = ServerGroup::ALL
        .into_iter()
        .filter(|g| g.is_coordination_member())
        .collect();
    let ready: usize = coordination.iter().map(|g| members.members_ready(*g)).sum();
    let total: usize = coordination.iter().map(|g| members.group(*g).len()).sum();
    if ready == 0 {
        return Err(ReconcileError::CoordinationUnavailable { ready, total });
    }
    Ok(Quorum::Available { ready })
}

/// Read the collection listing behind the quorum check.
///
/// Returns `Ok(None)` for modes without a coordination layer. A denied quorum
/// is returned as is and no read is attempted; a failed or timed out read is
/// transient.
pub async fn fetch_collections(
    reader: &dyn CoordinationReader,
    deployment_id: &DeploymentId,
    spec: &DeploymentSpec,
    members: &MemberList,
    deadline: Duration,
) -> Result<Option<CollectionListing>> {
    match check_quorum(spec, members)? {
        Quorum::NotRequired => Ok(None),
        Quorum::Available { ready } => {
            debug!(deployment_id = %deployment_id, ready, "Reading coordination layer");
            with_deadline(
                "read coordination layer",
                deadline,
                reader.collections(deployment_id),
            )
            .await
            .map(Some)
            .map_err(|e| {
                warn!(deployment_id = %deployment_id, error = %e, "Coordination read failed");
                ReconcileError::Transient(format!("coordination read failed: {e}"))
            })
        }
    }
}

/// Coordination state as seen by plan fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationView {
    NotRequired,
    /// Not read yet; asking for it makes the planner load it and replan
    NotLoaded,
    Available(CollectionListing),
    /// The guard denied the read
    Unavailable { ready: usize, total: usize },
    /// Quorum was there but the read itself failed
    ReadFailed(String),
}

impl CoordinationView {
    /// Starting view for a planning attempt. Nothing is read until a fragment
    /// asks for the listing.
    pub fn deferred(spec: &DeploymentSpec) -> Self {
        if spec.mode.uses_coordination_layer() {
            CoordinationView::NotLoaded
        } else {
            CoordinationView::NotRequired
        }
    }

    /// Read the view through the guard.
    pub async fn load(
        reader: &dyn CoordinationReader,
        deployment_id: &DeploymentId,
        spec: &DeploymentSpec,
        members: &MemberList,
        deadline: Duration,
    ) -> Self {
        match fetch_collections(reader, deployment_id, spec, members, deadline).await {
            Ok(None) => CoordinationView::NotRequired,
            Ok(Some(listing)) => CoordinationView::Available(listing),
            Err(ReconcileError::CoordinationUnavailable { ready, total }) => {
                CoordinationView::Unavailable { ready, total }
            }
            Err(e) => CoordinationView::ReadFailed(e.to_string()),
        }
    }

    /// The listing for fragments that need it. Denials surface as errors.
    pub fn collections(&self) -> Result<Option<&CollectionListing>> {
        match self {
            CoordinationView::NotRequired => Ok(None),
            CoordinationView::Available(listing) => Ok(Some(listing)),
            CoordinationView::NotLoaded => Err(ReconcileError::CoordinationNotLoaded),
            CoordinationView::Unavailable { ready, total } => {
                Err(ReconcileError::CoordinationUnavailable {
                    ready: *ready,
                    total: *total,
                })
            }
            CoordinationView::ReadFailed(reason) => Err(ReconcileError::Transient(reason.clone())),
        }
    }
}
