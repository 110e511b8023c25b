//! Plan fragments
//!
//! [`create_plan`] composes the fragments below, taking the first one that
//! has work to do: scaling first, then image changes, then drift.

use super::builder::{first_non_empty, PlanBuilder, PlanInput};
use crate::drift::{desired_image, needs_rotation};
use crate::error::Result;
use crate::render::RenderInput;
use chrono::{DateTime, Utc};
use dbop_types::{Action, ActionType, MemberId, MemberPhase, Plan, ServerGroup};
use tracing::debug;

/// Stop, recreate and restart one member, then wait for it to be healthy.
///
/// Always exactly these five actions in this order.
pub fn rotate_member_plan(
    member: &MemberId,
    group: ServerGroup,
    reason: &str,
    now: DateTime<Utc>,
) -> Plan {
    debug!(member_id = %member, role = %group, reason, "Creating rotation plan");
    let action = |t: ActionType| Action::for_member(t, group, member.clone(), now);
    Plan::from(vec![
        action(ActionType::CleanTlsKeyfile)
            .with_reason("Remove server keyfile and enforce renewal/recreation"),
        action(ActionType::ResignLeadership).with_reason(reason),
        action(ActionType::RotateMember).with_reason(reason),
        action(ActionType::WaitForMemberUp),
        action(ActionType::WaitForMemberInSync),
    ])
}

/// Add or remove one member where a group's size differs from the spec.
pub fn scale_plan(input: &PlanInput<'_>) -> Result<Plan> {
    for group in ServerGroup::ALL {
        let desired = input.spec.group_count(group) as usize;
        let members: Vec<_> = input
            .status
            .members
            .group(group)
            .iter()
            .filter(|m| m.phase != MemberPhase::Removing)
            .collect();

        if members.len() < desired {
            debug!(role = %group, current = members.len(), desired, "Scaling up");
            return Ok(Plan::from(vec![Action::new(
                ActionType::AddMember,
                Some(group),
                None,
                input.now,
            )
            .with_reason(format!(
                "scale {} from {} to {}",
                group,
                members.len(),
                desired
            ))]));
        }

        if members.len() > desired {
            if !group.policy().scale_down_allowed {
                debug!(role = %group, "Group cannot be scaled down");
                continue;
            }
            let victim = members
                .iter()
                .find(|m| !m.is_ready())
                .or_else(|| members.last())
                .map(|m| m.id.clone());
            if let Some(victim) = victim {
                debug!(role = %group, member_id = %victim, desired, "Scaling down");
                return Ok(Plan::from(vec![Action::for_member(
                    ActionType::RemoveMember,
                    group,
                    victim,
                    input.now,
                )
                .with_reason(format!(
                    "scale {} from {} to {}",
                    group,
                    members.len(),
                    desired
                ))]));
            }
        }
    }
    Ok(Plan::new())
}

/// The spec names a different image than the one currently committed.
pub fn upgrade_requested(input: &PlanInput<'_>) -> bool {
    input
        .status
        .current_image
        .as_ref()
        .is_some_and(|current| current.image != input.spec.image)
}

fn set_current_image_plan(input: &PlanInput<'_>) -> Result<Plan> {
    Ok(Plan::from(vec![Action::deployment_wide(
        ActionType::SetCurrentImage,
        input.now,
    )
    .with_image(input.spec.image.clone())
    .with_reason("image changed")]))
}

/// Commit the spec image once its metadata is known.
pub fn image_upgrade_plan(input: &PlanInput<'_>) -> Result<Plan> {
    PlanBuilder::new(input).apply_with_condition(upgrade_requested, set_current_image_plan)
}

/// Rotate the first member, in group order, whose configuration drifted.
///
/// In modes with a coordination layer the rotation waits until every shard
/// is in sync; that needs a coordination read and so passes the guard's
/// verdict on.
pub fn rotation_plan(input: &PlanInput<'_>) -> Result<Plan> {
    for (group, member) in input.status.members.iter() {
        if member.phase != MemberPhase::Created || !input.spec.is_group_active(group) {
            continue;
        }
        let live = input
            .inspector
            .runtime_unit_for_member(&member.id)
            .is_some_and(|u| !u.terminating);
        if !live {
            continue;
        }
        let Some(image) = desired_image(input.spec, input.status, group) else {
            continue;
        };

        let fresh = input.drift.fresh_fingerprint(&RenderInput {
            deployment_id: input.deployment_id,
            deployment_name: input.deployment_name,
            spec: input.spec,
            status: input.status,
            group,
            member,
            image,
        })?;
        if !needs_rotation(member, &fresh) {
            continue;
        }

        if let Some(listing) = input.coordination.collections()? {
            if !listing.all_in_sync() {
                debug!(member_id = %member.id, "Shards out of sync, postponing rotation");
                return Ok(Plan::new());
            }
        }

        let reason = match &member.fingerprint {
            Some(old) => format!(
                "configuration changed ({} -> {})",
                old.short(),
                fresh.short()
            ),
            None => "configuration changed".to_string(),
        };
        return Ok(rotate_member_plan(&member.id, group, &reason, input.now));
    }
    Ok(Plan::new())
}

/// Top-level plan for a deployment with no plan in flight.
pub fn create_plan(input: &PlanInput<'_>) -> Result<Plan> {
    PlanBuilder::new(input).apply_sub_plan(
        first_non_empty,
        &[scale_plan, image_upgrade_plan, rotation_plan],
    )
}
