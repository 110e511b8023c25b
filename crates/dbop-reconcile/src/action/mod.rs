//! Action handlers
//!
//! Every [`ActionType`] maps to one stateless handler. A handler is driven in
//! two phases: [`ActionHandler::start`] runs once when the action becomes the
//! head of the plan, [`ActionHandler::check_progress`] on every later tick
//! until it reports ready or aborts.
//!
//! `start` must be idempotent. A tick whose status write loses a race is
//! discarded, so the same start can run again against the same state.

mod image;
mod member;
mod rotate;
mod wait;

pub use image::SetCurrentImage;
pub use member::{AddMember, RemoveMember};
pub use rotate::{CleanTlsKeyfile, ResignLeadership, RotateMember};
pub use wait::{WaitForMemberInSync, WaitForMemberUp};

use crate::context::ReconcileContext;
use crate::error::{ReconcileError, Result};
use crate::events::EventBuffer;
use crate::inspector::Inspector;
use crate::render::unit_name;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbop_types::{
    Action, ActionType, DeploymentId, DeploymentSpec, DeploymentStatus, Member, MemberId,
    ServerGroup,
};
use std::time::Duration;

/// Outcome of a progress check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Not done yet; check again next tick
    Pending,
    /// Done; the action is removed from the plan
    Ready,
    /// Cannot complete; the plan is abandoned
    Abort(String),
}

/// What a handler works with during one tick
pub struct ActionEnv<'a> {
    pub deployment_id: &'a DeploymentId,
    pub deployment_name: &'a str,
    pub spec: &'a DeploymentSpec,
    /// Working copy of the status; written back only if the tick succeeds
    pub status: &'a mut DeploymentStatus,
    pub inspector: &'a dyn Inspector,
    pub ctx: &'a ReconcileContext,
    pub events: &'a mut EventBuffer,
    pub now: DateTime<Utc>,
}

impl ActionEnv<'_> {
    /// Deadline for one cluster state store call.
    pub fn deadline(&self) -> Duration {
        self.ctx.config.operation_timeout()
    }

    pub fn member(&self, id: &MemberId) -> Option<(ServerGroup, &Member)> {
        self.status.members.element_by_id(id)
    }

    pub fn member_mut(&mut self, id: &MemberId) -> Option<(ServerGroup, &mut Member)> {
        self.status.members.element_by_id_mut(id)
    }

    /// Name of the runtime unit hosting `member`.
    pub fn unit_name_of(&self, group: ServerGroup, member: &Member) -> String {
        member
            .runtime_unit
            .clone()
            .unwrap_or_else(|| unit_name(self.deployment_name, group, &member.id))
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Begin the action. Returns `true` when it already completed.
    async fn start(&self, action: &mut Action, env: &mut ActionEnv<'_>) -> Result<bool>;

    /// Check whether a started action has completed.
    async fn check_progress(&self, action: &mut Action, env: &mut ActionEnv<'_>)
        -> Result<Progress>;
}

/// The handler registered for an action type.
pub fn handler_for(action_type: ActionType) -> &'static dyn ActionHandler {
    match action_type {
        ActionType::AddMember => &AddMember,
        ActionType::RemoveMember => &RemoveMember,
        ActionType::CleanTlsKeyfile => &CleanTlsKeyfile,
        ActionType::ResignLeadership => &ResignLeadership,
        ActionType::RotateMember => &RotateMember,
        ActionType::WaitForMemberUp => &WaitForMemberUp,
        ActionType::WaitForMemberInSync => &WaitForMemberInSync,
        ActionType::SetCurrentImage => &SetCurrentImage,
    }
}

/// Target member of a member-scoped action.
fn target(action: &Action) -> Result<&MemberId> {
    action
        .member_id
        .as_ref()
        .ok_or_else(|| ReconcileError::aborted(action.action_type, "action has no target member"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cluster::{InMemoryClusterStore, StaticCoordinationReader, StaticMemberClient};
    use crate::config::ReconcileConfig;
    use crate::events::BroadcastEventSink;
    use crate::render::DefaultRenderer;
    use crate::testing::Fixture;
    use std::sync::Arc;

    /// Collaborators backing an [`ActionEnv`] in handler tests
    pub(crate) struct Harness {
        pub cluster: Arc<InMemoryClusterStore>,
        pub coordination: Arc<StaticCoordinationReader>,
        pub members: Arc<StaticMemberClient>,
        pub ctx: ReconcileContext,
        pub events: EventBuffer,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_members(StaticMemberClient::new())
        }

        pub fn with_members(members: StaticMemberClient) -> Self {
            let cluster = Arc::new(InMemoryClusterStore::new());
            let coordination = Arc::new(StaticCoordinationReader::new());
            let members = Arc::new(members);
            let ctx = ReconcileContext::new(
                cluster.clone(),
                coordination.clone(),
                members.clone(),
                Arc::new(DefaultRenderer),
                Arc::new(BroadcastEventSink::default()),
                ReconcileConfig::default(),
            );
            Self {
                cluster,
                coordination,
                members,
                ctx,
                events: EventBuffer::new(),
            }
        }

        pub fn env<'a>(&'a mut self, fixture: &'a mut Fixture) -> ActionEnv<'a> {
            ActionEnv {
                deployment_id: &fixture.id,
                deployment_name: &fixture.name,
                spec: &fixture.spec,
                status: &mut fixture.status,
                inspector: &fixture.snapshot,
                ctx: &self.ctx,
                events: &mut self.events,
                now: Utc::now(),
            }
        }
    }

    #[test]
    fn test_target_requires_member() {
        let action = Action::deployment_wide(ActionType::RotateMember, Utc::now());
        assert!(matches!(
            target(&action),
            Err(ReconcileError::ActionAborted {
                action: ActionType::RotateMember,
                ..
            })
        ));
    }
}
