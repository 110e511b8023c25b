//! Plan executor
//!
//! Advances the head of the plan by at most one step per tick:
//!
//! ```text
//! NotStarted --start--> Started --check_progress--> InProgress --> Completed
//!                                        |
//!                                        +--> Aborted / TimedOut
//! ```
//!
//! A transient error restores the status to what it was before the handler
//! ran, so the same step is retried next tick. Aborts and timeouts drop the
//! rest of the plan; the next planning pass decides what to do from there.

use crate::action::{handler_for, ActionEnv, Progress};
use crate::error::{ReconcileError, Result};
use dbop_types::{Action, ActionType, ClusterEvent, ConditionType};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// What one executor step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// No plan in flight
    Idle,
    /// Head action started and is still running
    Started(ActionType),
    /// Head action checked and still running
    InProgress(ActionType),
    /// Head action finished and was removed
    Completed(ActionType),
    /// Head action aborted; the plan was dropped
    Aborted(ActionType),
    /// Head action ran out of time; the plan was dropped
    TimedOut(ActionType),
    /// Transient failure; nothing changed
    Retry(ActionType),
}

impl StepOutcome {
    /// Whether the step changed the plan.
    pub fn advanced(&self) -> bool {
        matches!(
            self,
            StepOutcome::Started(_)
                | StepOutcome::Completed(_)
                | StepOutcome::Aborted(_)
                | StepOutcome::TimedOut(_)
        )
    }
}

/// Drive the head action of `env.status.plan` by one step.
///
/// Only invariant violations are returned as errors; everything else is
/// folded into the [`StepOutcome`].
#[instrument(skip_all, fields(deployment_id = %env.deployment_id))]
pub async fn execute_head(env: &mut ActionEnv<'_>) -> Result<StepOutcome> {
    let Some(mut action) = env.status.plan.head().cloned() else {
        return Ok(StepOutcome::Idle);
    };
    let action_type = action.action_type;
    let handler = handler_for(action_type);
    let before = env.status.clone();
    let mark = env.events.len();

    let result = if action.is_started() {
        let timeout = env.ctx.config.action_timeout(action_type);
        let elapsed = action.elapsed(env.now).unwrap_or_default();
        if elapsed > timeout {
            return Ok(time_out(env, &action, elapsed));
        }
        handler.check_progress(&mut action, env).await
    } else {
        if action_type.is_disruptive() {
            info!(
                action = %action_type,
                member_id = ?action.member_id,
                "Starting disruptive action"
            );
        }
        action.started_at = Some(env.now);
        handler
            .start(&mut action, env)
            .await
            .map(|done| if done { Progress::Ready } else { Progress::Pending })
    };

    match result {
        Ok(Progress::Ready) => {
            env.status.plan.pop_head();
            env.events.push(ClusterEvent::ActionCompleted {
                action: action_type,
                member_id: action.member_id.clone(),
            });
            info!(
                action = %action_type,
                member_id = ?action.member_id,
                remaining = env.status.plan.len(),
                "Action completed"
            );
            Ok(StepOutcome::Completed(action_type))
        }
        Ok(Progress::Pending) => {
            let started = env.status.plan.head().is_some_and(|h| !h.is_started());
            if let Some(head) = env.status.plan.head_mut() {
                *head = action;
            }
            Ok(if started {
                StepOutcome::Started(action_type)
            } else {
                StepOutcome::InProgress(action_type)
            })
        }
        Ok(Progress::Abort(reason)) => Ok(abort(env, &action, reason)),
        Err(ReconcileError::ActionAborted { reason, .. }) => {
            *env.status = before;
            env.events.truncate(mark);
            Ok(abort(env, &action, reason))
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(
                action = %action_type,
                member_id = ?action.member_id,
                error = %e,
                "Action step failed, retrying next tick"
            );
            *env.status = before;
            env.events.truncate(mark);
            Ok(StepOutcome::Retry(action_type))
        }
    }
}

fn abort(env: &mut ActionEnv<'_>, action: &Action, reason: String) -> StepOutcome {
    error!(
        action = %action.action_type,
        member_id = ?action.member_id,
        reason = %reason,
        "Action aborted, dropping plan"
    );
    fail(env, action, ConditionType::ActionFailed, reason.clone());
    env.events.push(ClusterEvent::ActionFailed {
        action: action.action_type,
        member_id: action.member_id.clone(),
        reason,
    });
    StepOutcome::Aborted(action.action_type)
}

fn time_out(env: &mut ActionEnv<'_>, action: &Action, elapsed: Duration) -> StepOutcome {
    error!(
        action = %action.action_type,
        member_id = ?action.member_id,
        elapsed_secs = elapsed.as_secs(),
        "Action timed out, dropping plan"
    );
    let err = ReconcileError::ActionTimeout {
        action: action.action_type,
        elapsed_secs: elapsed.as_secs(),
    };
    fail(env, action, ConditionType::ActionTimedOut, err.to_string());
    env.events.push(ClusterEvent::ActionTimedOut {
        action: action.action_type,
        member_id: action.member_id.clone(),
    });
    StepOutcome::TimedOut(action.action_type)
}

/// Drop the plan and mark the target member.
fn fail(env: &mut ActionEnv<'_>, action: &Action, condition: ConditionType, message: String) {
    env.status.plan.clear();
    let now = env.now;
    if let Some(id) = &action.member_id {
        if let Some((_, member)) = env.member_mut(id) {
            member.conditions.update(
                condition,
                true,
                Some(action.action_type.to_string()),
                Some(message),
                now,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::tests::Harness;
    use crate::plan::rotate_member_plan;
    use crate::testing::Fixture;
    use chrono::Utc;
    use dbop_types::{MemberId, Plan, ServerGroup};

    fn rotation(fixture: &mut Fixture, id: &str, group: ServerGroup) {
        fixture.status.plan = rotate_member_plan(&MemberId::new(id), group, "test", Utc::now());
    }

    #[tokio::test]
    async fn test_idle_without_plan() {
        let mut fixture = Fixture::cluster();
        let mut h = Harness::new();
        let mut env = h.env(&mut fixture);
        assert_eq!(execute_head(&mut env).await.unwrap(), StepOutcome::Idle);
    }

    #[tokio::test]
    async fn test_one_step_per_call() {
        let mut fixture = Fixture::cluster();
        rotation(&mut fixture, "CRDN-0", ServerGroup::Coordinators);
        let mut h = Harness::new();
        h.cluster.restore(&fixture.snapshot);
        let mut env = h.env(&mut fixture);

        // TLS is off, the keyfile step completes on start
        assert_eq!(
            execute_head(&mut env).await.unwrap(),
            StepOutcome::Completed(ActionType::CleanTlsKeyfile)
        );
        assert_eq!(env.status.plan.len(), 4);
        // Coordinators hold no leadership
        assert_eq!(
            execute_head(&mut env).await.unwrap(),
            StepOutcome::Completed(ActionType::ResignLeadership)
        );
        assert_eq!(
            execute_head(&mut env).await.unwrap(),
            StepOutcome::Started(ActionType::RotateMember)
        );
        assert!(env.status.plan.head().unwrap().is_started());
        assert_eq!(
            execute_head(&mut env).await.unwrap(),
            StepOutcome::InProgress(ActionType::RotateMember)
        );
        assert_eq!(env.events.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_drops_plan_and_marks_member() {
        let mut fixture = Fixture::cluster();
        rotation(&mut fixture, "CRDN-0", ServerGroup::Coordinators);
        fixture.status.plan.pop_head();
        fixture.status.plan.pop_head();
        fixture.status.plan.pop_head();
        fixture.member_mut("CRDN-0").conditions.remove(ConditionType::Ready);
        let mut h = Harness::new();

        let mut env = h.env(&mut fixture);
        assert_eq!(
            execute_head(&mut env).await.unwrap(),
            StepOutcome::Started(ActionType::WaitForMemberUp)
        );
        env.now += chrono::Duration::from_std(ActionType::WaitForMemberUp.default_timeout())
            .unwrap()
            - chrono::Duration::seconds(1);
        assert_eq!(
            execute_head(&mut env).await.unwrap(),
            StepOutcome::InProgress(ActionType::WaitForMemberUp)
        );

        env.now += chrono::Duration::seconds(2);
        assert_eq!(
            execute_head(&mut env).await.unwrap(),
            StepOutcome::TimedOut(ActionType::WaitForMemberUp)
        );
        assert!(env.status.plan.is_empty());
        let (_, member) = env.member(&MemberId::new("CRDN-0")).unwrap();
        assert!(member.conditions.is_true(ConditionType::ActionTimedOut));
        let message = member
            .conditions
            .get(ConditionType::ActionTimedOut)
            .and_then(|c| c.message.clone())
            .unwrap();
        assert!(message.starts_with("Action WaitForMemberUp timed out after"));
        assert!(matches!(
            env.events.events().last(),
            Some(ClusterEvent::ActionTimedOut { .. })
        ));
    }

    #[tokio::test]
    async fn test_transient_error_rolls_back() {
        let mut fixture = Fixture::cluster();
        rotation(&mut fixture, "AGNT-0", ServerGroup::Agents);
        fixture.status.plan.pop_head();
        fixture.status.plan.pop_head();
        let mut h = Harness::new();
        h.cluster.set_unavailable(true);
        let before = fixture.status.clone();

        let mut env = h.env(&mut fixture);
        assert_eq!(
            execute_head(&mut env).await.unwrap(),
            StepOutcome::Retry(ActionType::RotateMember)
        );
        assert_eq!(*env.status, before);
        assert!(env.events.is_empty());
    }

    #[tokio::test]
    async fn test_abort_drops_plan() {
        let mut fixture = Fixture::cluster();
        fixture.status.plan = Plan::from(vec![
            Action::deployment_wide(ActionType::SetCurrentImage, Utc::now()),
            Action::deployment_wide(ActionType::SetCurrentImage, Utc::now()).with_image("db:3.10"),
        ]);
        let mut h = Harness::new();
        let mut env = h.env(&mut fixture);

        assert_eq!(
            execute_head(&mut env).await.unwrap(),
            StepOutcome::Aborted(ActionType::SetCurrentImage)
        );
        assert!(env.status.plan.is_empty());
        assert!(matches!(
            env.events.events(),
            [ClusterEvent::ActionFailed { member_id: None, .. }]
        ));
    }
}
