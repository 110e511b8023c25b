//! Adding and removing members

use super::{target, ActionEnv, ActionHandler, Progress};
use crate::context::{ignore_not_found, with_deadline};
use crate::error::{ReconcileError, Result};
use async_trait::async_trait;
use dbop_types::{Action, ClusterEvent, Member, MemberId, MemberPhase};
use tracing::{debug, info};

/// Adds a pending member; resource creation then brings it up.
pub struct AddMember;

#[async_trait]
impl ActionHandler for AddMember {
    async fn start(&self, action: &mut Action, env: &mut ActionEnv<'_>) -> Result<bool> {
        let group = action
            .group
            .ok_or_else(|| ReconcileError::aborted(action.action_type, "action has no group"))?;

        // The ID is chosen here, not at planning time, so planning stays
        // deterministic. A restarted start reuses the recorded one.
        let id = action
            .member_id
            .get_or_insert_with(|| MemberId::generate(group))
            .clone();

        if env.member(&id).is_none() {
            env.status
                .members
                .add(Member::new(id.clone(), env.now), group)?;
            info!(member_id = %id, role = %group, "Member added");
        }
        Ok(false)
    }

    async fn check_progress(
        &self,
        action: &mut Action,
        env: &mut ActionEnv<'_>,
    ) -> Result<Progress> {
        let id = target(action)?;
        match env.member(id) {
            None => Ok(Progress::Abort(format!("member {id} disappeared"))),
            Some((_, member)) if member.phase.is_created() => Ok(Progress::Ready),
            Some(_) => Ok(Progress::Pending),
        }
    }
}

/// Takes a member's runtime unit and volume claim down, then drops it.
pub struct RemoveMember;

#[async_trait]
impl ActionHandler for RemoveMember {
    async fn start(&self, action: &mut Action, env: &mut ActionEnv<'_>) -> Result<bool> {
        let id = target(action)?.clone();
        let Some((group, member)) = env.member(&id) else {
            debug!(member_id = %id, "Member already gone");
            return Ok(true);
        };
        let unit = env.unit_name_of(group, member);
        let finalizers = env
            .inspector
            .runtime_unit(&unit)
            .map(|u| u.finalizers.clone())
            .unwrap_or_default();

        if let Some((_, member)) = env.member_mut(&id) {
            if member.phase != MemberPhase::Failed {
                member.advance_phase(MemberPhase::Removing)?;
            }
        }

        let cluster = env.ctx.cluster.clone();
        let deadline = env.deadline();
        if !finalizers.is_empty() {
            ignore_not_found(
                with_deadline(
                    "remove runtime unit finalizers",
                    deadline,
                    cluster.remove_runtime_unit_finalizers(&unit, &finalizers),
                )
                .await,
            )?;
        }
        ignore_not_found(
            with_deadline(
                "delete runtime unit",
                deadline,
                cluster.delete_runtime_unit(&unit),
            )
            .await,
        )?;
        if group.is_database_process() {
            ignore_not_found(
                with_deadline(
                    "delete volume claim",
                    deadline,
                    cluster.delete_volume_claim(&unit),
                )
                .await,
            )?;
        }
        info!(member_id = %id, role = %group, unit = %unit, "Member removal started");
        Ok(false)
    }

    async fn check_progress(
        &self,
        action: &mut Action,
        env: &mut ActionEnv<'_>,
    ) -> Result<Progress> {
        let id = target(action)?.clone();
        let Some((group, member)) = env.member(&id) else {
            return Ok(Progress::Ready);
        };
        let unit = env.unit_name_of(group, member);
        if env.inspector.runtime_unit(&unit).is_some() {
            return Ok(Progress::Pending);
        }
        env.status.members.remove(&id);
        env.events.push(ClusterEvent::MemberRemoved {
            group,
            member_id: id.clone(),
        });
        info!(member_id = %id, role = %group, "Member removed");
        Ok(Progress::Ready)
    }
}
