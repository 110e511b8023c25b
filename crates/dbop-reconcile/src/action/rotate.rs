//! Steps of a member rotation

use super::{target, ActionEnv, ActionHandler, Progress};
use crate::context::{ignore_not_found, with_deadline, JobStatus};
use crate::error::Result;
use crate::render::tls_keyfile_secret_name;
use async_trait::async_trait;
use dbop_types::{Action, ConditionType, DeploymentMode, MemberPhase, ServerGroup};
use tracing::{debug, info, warn};

const JOB_ID_PARAM: &str = "job_id";

/// Deletes the member's TLS keyfile so a fresh one is issued.
pub struct CleanTlsKeyfile;

#[async_trait]
impl ActionHandler for CleanTlsKeyfile {
    async fn start(&self, action: &mut Action, env: &mut ActionEnv<'_>) -> Result<bool> {
        if !env.spec.tls.enabled {
            return Ok(true);
        }
        let id = target(action)?;
        let Some((group, _)) = env.member(id) else {
            return Ok(true);
        };
        let secret = tls_keyfile_secret_name(env.deployment_name, group, id);
        if env.inspector.secret(&secret).is_none() {
            debug!(secret = %secret, "No keyfile to clean");
            return Ok(true);
        }
        ignore_not_found(
            with_deadline(
                "delete tls keyfile",
                env.deadline(),
                env.ctx.cluster.delete_secret(&secret),
            )
            .await,
        )?;
        info!(member_id = %id, secret = %secret, "TLS keyfile removed");
        Ok(true)
    }

    async fn check_progress(
        &self,
        _action: &mut Action,
        _env: &mut ActionEnv<'_>,
    ) -> Result<Progress> {
        Ok(Progress::Ready)
    }
}

/// Moves shard leadership off a dbserver before it goes down.
pub struct ResignLeadership;

#[async_trait]
impl ActionHandler for ResignLeadership {
    async fn start(&self, action: &mut Action, env: &mut ActionEnv<'_>) -> Result<bool> {
        if env.spec.mode != DeploymentMode::Cluster
            || action.group != Some(ServerGroup::DbServers)
        {
            return Ok(true);
        }
        if action.params.contains_key(JOB_ID_PARAM) {
            return Ok(false);
        }
        let id = target(action)?.clone();
        if env.member(&id).is_none() {
            return Ok(true);
        }

        let job = with_deadline(
            "resign leadership",
            env.deadline(),
            env.ctx.members.resign_leadership(env.deployment_id, &id),
        )
        .await?;
        info!(member_id = %id, job_id = %job, "Leadership resignation requested");
        action.params.insert(JOB_ID_PARAM.to_string(), job);
        Ok(false)
    }

    async fn check_progress(
        &self,
        action: &mut Action,
        env: &mut ActionEnv<'_>,
    ) -> Result<Progress> {
        let Some(job) = action.params.get(JOB_ID_PARAM) else {
            return Ok(Progress::Ready);
        };
        let status = with_deadline(
            "resign leadership job",
            env.deadline(),
            env.ctx.members.job_status(env.deployment_id, job),
        )
        .await?;
        match status {
            JobStatus::Pending => Ok(Progress::Pending),
            JobStatus::Finished => Ok(Progress::Ready),
            JobStatus::Failed(reason) => {
                // The member goes down either way; its shards fail over
                warn!(job_id = %job, reason = %reason, "Leadership resignation failed");
                Ok(Progress::Ready)
            }
        }
    }
}

/// Deletes the member's runtime unit and sends it back to `Pending`.
pub struct RotateMember;

#[async_trait]
impl ActionHandler for RotateMember {
    async fn start(&self, action: &mut Action, env: &mut ActionEnv<'_>) -> Result<bool> {
        let id = target(action)?.clone();
        let Some((group, member)) = env.member(&id) else {
            return Err(crate::error::ReconcileError::aborted(
                action.action_type,
                format!("member {id} not found"),
            ));
        };
        if member.phase == MemberPhase::Pending {
            return Ok(false);
        }
        let unit = env.unit_name_of(group, member);
        let upgrade = env.spec.upgrade.auto_upgrade
            && match (&member.image, &env.status.current_image) {
                (Some(running), Some(current)) => {
                    (running.version.major, running.version.minor)
                        != (current.version.major, current.version.minor)
                }
                _ => false,
            };

        let cluster = env.ctx.cluster.clone();
        let deadline = env.deadline();
        if let Some(live) = env.inspector.runtime_unit(&unit) {
            if !live.finalizers.is_empty() {
                ignore_not_found(
                    with_deadline(
                        "remove runtime unit finalizers",
                        deadline,
                        cluster.remove_runtime_unit_finalizers(&unit, &live.finalizers),
                    )
                    .await,
                )?;
            }
        }
        ignore_not_found(
            with_deadline(
                "delete runtime unit",
                deadline,
                cluster.delete_runtime_unit(&unit),
            )
            .await,
        )?;

        let now = env.now;
        if let Some((_, member)) = env.member_mut(&id) {
            member.restart_lifecycle();
            member.image = None;
            if upgrade {
                member.conditions.update(
                    ConditionType::AutoUpgrade,
                    true,
                    Some("VersionChanged".into()),
                    None,
                    now,
                );
            }
        }
        info!(member_id = %id, unit = %unit, upgrade, "Member rotation started");
        Ok(false)
    }

    async fn check_progress(
        &self,
        action: &mut Action,
        env: &mut ActionEnv<'_>,
    ) -> Result<Progress> {
        let id = target(action)?;
        let Some((_, member)) = env.member(id) else {
            return Ok(Progress::Abort(format!("member {id} not found")));
        };
        if !member.phase.is_created() {
            return Ok(Progress::Pending);
        }
        let recreated = env
            .inspector
            .runtime_unit_for_member(id)
            .is_some_and(|u| Some(&u.uid) == member.runtime_uid.as_ref());
        Ok(if recreated {
            Progress::Ready
        } else {
            Progress::Pending
        })
    }
}
