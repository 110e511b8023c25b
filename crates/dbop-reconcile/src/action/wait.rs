//! Waiting for a member to come back

use super::{target, ActionEnv, ActionHandler, Progress};
use crate::error::{ReconcileError, Result};
use crate::guard::fetch_collections;
use async_trait::async_trait;
use dbop_types::{Action, ConditionType, DeploymentMode, MemberPhase, ServerGroup};
use tracing::{debug, info};

/// Waits until the member is created and reports ready.
pub struct WaitForMemberUp;

#[async_trait]
impl ActionHandler for WaitForMemberUp {
    async fn start(&self, action: &mut Action, env: &mut ActionEnv<'_>) -> Result<bool> {
        let id = target(action)?;
        Ok(env
            .member(id)
            .is_some_and(|(_, m)| m.phase == MemberPhase::Created && m.is_ready()))
    }

    async fn check_progress(
        &self,
        action: &mut Action,
        env: &mut ActionEnv<'_>,
    ) -> Result<Progress> {
        let id = target(action)?;
        let Some((group, member)) = env.member_mut(id) else {
            return Ok(Progress::Abort(format!("member {id} not found")));
        };
        if !member.phase.is_created() || !member.is_ready() {
            return Ok(Progress::Pending);
        }
        if member.phase == MemberPhase::Upgrading {
            member.advance_phase(MemberPhase::Created)?;
            member.conditions.remove(ConditionType::AutoUpgrade);
            info!(member_id = %id, role = %group, "Member upgraded");
        }
        Ok(Progress::Ready)
    }
}

/// Waits until the member holds current copies of everything it should.
pub struct WaitForMemberInSync;

impl WaitForMemberInSync {
    async fn in_sync(&self, action: &Action, env: &ActionEnv<'_>) -> Result<bool> {
        let id = target(action)?;
        match action.group {
            Some(ServerGroup::DbServers) if env.spec.mode == DeploymentMode::Cluster => {
                let listing = fetch_collections(
                    env.ctx.coordination.as_ref(),
                    env.deployment_id,
                    env.spec,
                    &env.status.members,
                    env.ctx.config.coordination_timeout(),
                )
                .await
                .map_err(|e| ReconcileError::Transient(e.to_string()))?;
                let in_sync = listing.map_or(true, |l| l.is_member_in_sync(id));
                if !in_sync {
                    debug!(member_id = %id, "Shards not in sync yet");
                }
                Ok(in_sync)
            }
            Some(ServerGroup::Agents) => {
                let agents = env.status.members.group(ServerGroup::Agents);
                Ok(agents.iter().all(|m| m.is_ready()))
            }
            _ => Ok(true),
        }
    }
}

#[async_trait]
impl ActionHandler for WaitForMemberInSync {
    async fn start(&self, action: &mut Action, env: &mut ActionEnv<'_>) -> Result<bool> {
        self.in_sync(action, env).await
    }

    async fn check_progress(
        &self,
        action: &mut Action,
        env: &mut ActionEnv<'_>,
    ) -> Result<Progress> {
        Ok(if self.in_sync(action, env).await? {
            Progress::Ready
        } else {
            Progress::Pending
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::tests::Harness;
    use crate::testing::Fixture;
    use chrono::Utc;
    use dbop_types::{
        ActionType, CollectionListing, CollectionShards, MemberId, ShardServers,
    };
    use std::collections::BTreeMap;

    fn action(t: ActionType, group: ServerGroup, id: &str) -> Action {
        Action::for_member(t, group, MemberId::new(id), Utc::now())
    }

    #[tokio::test]
    async fn test_member_up_completes_upgrade() {
        let mut fixture = Fixture::cluster();
        fixture.member_mut("PRMR-0").phase = MemberPhase::Upgrading;
        fixture.member_mut("PRMR-0").conditions.update(
            ConditionType::AutoUpgrade,
            true,
            None,
            None,
            Utc::now(),
        );
        let mut h = Harness::new();
        let mut a = action(ActionType::WaitForMemberUp, ServerGroup::DbServers, "PRMR-0");

        let mut env = h.env(&mut fixture);
        assert!(!WaitForMemberUp.start(&mut a, &mut env).await.unwrap());
        assert_eq!(
            WaitForMemberUp.check_progress(&mut a, &mut env).await.unwrap(),
            Progress::Ready
        );
        let (_, member) = env.member(&MemberId::new("PRMR-0")).unwrap();
        assert_eq!(member.phase, MemberPhase::Created);
        assert!(!member.conditions.is_true(ConditionType::AutoUpgrade));
    }

    #[tokio::test]
    async fn test_member_up_waits_for_ready() {
        let mut fixture = Fixture::cluster();
        fixture
            .member_mut("CRDN-0")
            .conditions
            .remove(ConditionType::Ready);
        let mut h = Harness::new();
        let mut a = action(ActionType::WaitForMemberUp, ServerGroup::Coordinators, "CRDN-0");
        let mut env = h.env(&mut fixture);
        assert!(!WaitForMemberUp.start(&mut a, &mut env).await.unwrap());
        assert_eq!(
            WaitForMemberUp.check_progress(&mut a, &mut env).await.unwrap(),
            Progress::Pending
        );
    }

    #[tokio::test]
    async fn test_dbserver_waits_for_its_shards() {
        let mut fixture = Fixture::cluster();
        let mut h = Harness::new();
        let shard = ShardServers {
            planned: vec![MemberId::new("PRMR-0"), MemberId::new("PRMR-1")],
            current: vec![MemberId::new("PRMR-1")],
        };
        h.coordination.set_listing(
            fixture.id.clone(),
            CollectionListing {
                databases: BTreeMap::from([(
                    "_system".to_string(),
                    BTreeMap::from([(
                        "users".to_string(),
                        CollectionShards(BTreeMap::from([("s1".to_string(), shard)])),
                    )]),
                )]),
            },
        );
        let coordination = h.coordination.clone();
        let mut lagging = action(ActionType::WaitForMemberInSync, ServerGroup::DbServers, "PRMR-0");
        let mut synced = action(ActionType::WaitForMemberInSync, ServerGroup::DbServers, "PRMR-1");

        let mut env = h.env(&mut fixture);
        assert!(!WaitForMemberInSync.start(&mut lagging, &mut env).await.unwrap());
        assert!(WaitForMemberInSync.start(&mut synced, &mut env).await.unwrap());

        coordination.set_failing(true);
        let err = WaitForMemberInSync
            .check_progress(&mut lagging, &mut env)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_agents_in_sync_when_all_ready() {
        let mut fixture = Fixture::cluster();
        fixture
            .member_mut("AGNT-2")
            .conditions
            .remove(ConditionType::Ready);
        let mut h = Harness::new();
        let mut a = action(ActionType::WaitForMemberInSync, ServerGroup::Agents, "AGNT-0");
        let mut env = h.env(&mut fixture);
        assert_eq!(
            WaitForMemberInSync.check_progress(&mut a, &mut env).await.unwrap(),
            Progress::Pending
        );
        env.member_mut(&MemberId::new("AGNT-2"))
            .unwrap()
            .1
            .conditions
            .update(ConditionType::Ready, true, None, None, Utc::now());
        assert_eq!(
            WaitForMemberInSync.check_progress(&mut a, &mut env).await.unwrap(),
            Progress::Ready
        );
    }
}
