//! Member resources
//!
//! Keeps every member's runtime unit and volume claim in place and mirrors
//! runtime readiness into the member's conditions. Runs every tick before the
//! plan executor.

use crate::action::ActionEnv;
use crate::context::with_deadline;
use crate::drift::{desired_image, DriftDetector};
use crate::error::{ReconcileError, Result, StoreError};
use crate::render::{member_endpoint, member_labels, unit_name, RenderInput};
use chrono::{DateTime, Utc};
use dbop_types::{
    ClusterEvent, ConditionType, DeploymentSpec, DeploymentStatus, Member, MemberId, MemberPhase,
    RuntimeUnit, ServerGroup, VolumeClaim,
};
use tracing::{debug, info};

/// Conditions that describe a previous runtime unit
const STALE_CONDITIONS: [ConditionType; 6] = [
    ConditionType::Ready,
    ConditionType::Terminated,
    ConditionType::Terminating,
    ConditionType::AgentRecoveryNeeded,
    ConditionType::AutoUpgrade,
    ConditionType::UpgradeFailed,
];

/// Populate an empty member list with the spec's initial members.
///
/// Returns whether anything was added.
pub fn create_initial_members(
    spec: &DeploymentSpec,
    status: &mut DeploymentStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !status.members.is_empty() {
        return Ok(false);
    }
    for group in ServerGroup::ALL {
        for _ in 0..spec.group_count(group) {
            status
                .members
                .add(Member::new(MemberId::generate(group), now), group)?;
        }
    }
    if !status.members.is_empty() {
        info!(members = status.members.len(), "Initial members created");
    }
    Ok(!status.members.is_empty())
}

/// Mirror readiness and create runtime units for pending members.
pub async fn ensure_members(env: &mut ActionEnv<'_>, drift: &DriftDetector<'_>) -> Result<()> {
    sync_readiness(env);

    let pending: Vec<(ServerGroup, MemberId)> = env
        .status
        .members
        .iter()
        .filter(|(_, m)| {
            m.phase == MemberPhase::Pending && !m.conditions.is_true(ConditionType::CleanedOut)
        })
        .map(|(g, m)| (g, m.id.clone()))
        .collect();

    for (group, id) in pending {
        let name = unit_name(env.deployment_name, group, &id);
        // A live unit left behind by a lost status write is adopted on create
        if env.inspector.runtime_unit(&name).is_some_and(|u| u.terminating) {
            debug!(member_id = %id, unit = %name, "Waiting for old runtime unit");
            continue;
        }
        create_member_unit(env, drift, group, &id, name).await?;
    }
    Ok(())
}

/// Set each member's `Ready` condition from its runtime unit.
fn sync_readiness(env: &mut ActionEnv<'_>) {
    let now = env.now;
    let inspector = env.inspector;
    for group in ServerGroup::ALL {
        for member in env.status.members.group_mut(group).iter_mut() {
            let ready = member.runtime_uid.as_ref().is_some_and(|uid| {
                inspector
                    .runtime_unit_for_member(&member.id)
                    .is_some_and(|u| &u.uid == uid && u.ready && !u.terminating)
            });
            if ready {
                member
                    .conditions
                    .update(ConditionType::Ready, true, None, None, now);
            } else {
                member.conditions.remove(ConditionType::Ready);
            }
        }
    }
}

async fn create_member_unit(
    env: &mut ActionEnv<'_>,
    drift: &DriftDetector<'_>,
    group: ServerGroup,
    id: &MemberId,
    name: String,
) -> Result<()> {
    if env.status.current_image.is_none() {
        if let Some(info) = env.status.images.get_by_image(&env.spec.image).cloned() {
            info!(image = %info.image, "Current image selected");
            env.status.current_image = Some(info);
        }
    }
    let Some(image) = desired_image(env.spec, env.status, group).cloned() else {
        debug!(member_id = %id, role = %group, "Image metadata not discovered yet");
        return Ok(());
    };
    if let Some((_, member)) = env.member_mut(id) {
        member.image = Some(image.clone());
    }

    let Some((_, member)) = env.member(id) else {
        return Ok(());
    };
    let (spec, fingerprint) = drift
        .render(&RenderInput {
            deployment_id: env.deployment_id,
            deployment_name: env.deployment_name,
            spec: env.spec,
            status: env.status,
            group,
            member,
            image: &image,
        })
        .map_err(|e| ReconcileError::Render {
            member: id.clone(),
            reason: e.to_string(),
        })?;
    let endpoint = member_endpoint(env.deployment_name, group, member);
    let labels = member_labels(env.deployment_id, group, id);

    let cluster = env.ctx.cluster.clone();
    let deadline = env.deadline();

    if group.is_database_process() {
        let claim = VolumeClaim {
            name: name.clone(),
            member_id: id.clone(),
            labels: labels.clone(),
            finalizers: Vec::new(),
        };
        match with_deadline("create volume claim", deadline, cluster.create_volume_claim(claim))
            .await
        {
            Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let unit = RuntimeUnit {
        name: name.clone(),
        uid: String::new(),
        member_id: id.clone(),
        group,
        labels,
        finalizers: spec.finalizers.clone(),
        spec,
        ready: false,
        terminating: false,
    };
    let created = match with_deadline(
        "create runtime unit",
        deadline,
        cluster.create_runtime_unit(unit),
    )
    .await
    {
        Ok(unit) => unit,
        Err(StoreError::AlreadyExists(_)) => {
            with_deadline("get runtime unit", deadline, cluster.get_runtime_unit(&name)).await?
        }
        Err(e) => return Err(e.into()),
    };

    let Some((_, member)) = env.member_mut(id) else {
        return Ok(());
    };
    member.endpoint = Some(endpoint);
    member.fingerprint = Some(fingerprint);
    member.runtime_unit = Some(created.name.clone());
    member.runtime_uid = Some(created.uid.clone());
    let phase = if member.conditions.is_true(ConditionType::AutoUpgrade) {
        MemberPhase::Upgrading
    } else {
        MemberPhase::Created
    };
    member.advance_phase(phase)?;
    for condition in STALE_CONDITIONS {
        member.conditions.remove(condition);
    }

    info!(
        member_id = %id,
        role = %group,
        unit = %created.name,
        uid = %created.uid,
        phase = %phase,
        "Runtime unit created"
    );
    env.events.push(ClusterEvent::MemberCreated {
        group,
        member_id: id.clone(),
    });
    Ok(())
}
