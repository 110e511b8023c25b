//! Event types for controller observability
//!
//! Events are one-way notifications; nothing in the controller reads them
//! back.

use crate::{ActionType, DeploymentId, MemberId, ServerGroup};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all controller events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event severity
    pub severity: EventSeverity,

    /// Deployment the event belongs to
    pub deployment_id: DeploymentId,

    /// The actual event
    pub event: ClusterEvent,
}

impl EventEnvelope {
    pub fn new(deployment_id: DeploymentId, event: ClusterEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            severity: event.severity(),
            deployment_id,
            event,
        }
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// Controller events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// Runtime unit created for a member
    MemberCreated {
        group: ServerGroup,
        member_id: MemberId,
    },

    /// Member dropped from the deployment
    MemberRemoved {
        group: ServerGroup,
        member_id: MemberId,
    },

    /// New plan stored
    PlanCreated { actions: Vec<ActionType> },

    ActionCompleted {
        action: ActionType,
        member_id: Option<MemberId>,
    },

    /// Action aborted and will not be retried
    ActionFailed {
        action: ActionType,
        member_id: Option<MemberId>,
        reason: String,
    },

    ActionTimedOut {
        action: ActionType,
        member_id: Option<MemberId>,
    },

    /// Plan creation refused, e.g. because the coordination layer is down
    PlanningBlocked { reason: String },
}

impl ClusterEvent {
    pub fn severity(&self) -> EventSeverity {
        match self {
            ClusterEvent::MemberCreated { .. }
            | ClusterEvent::MemberRemoved { .. }
            | ClusterEvent::PlanCreated { .. }
            | ClusterEvent::ActionCompleted { .. } => EventSeverity::Info,
            ClusterEvent::PlanningBlocked { .. } => EventSeverity::Warning,
            ClusterEvent::ActionFailed { .. } | ClusterEvent::ActionTimedOut { .. } => {
                EventSeverity::Error
            }
        }
    }
}
