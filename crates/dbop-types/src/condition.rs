//! Named boolean conditions attached to members

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Member reports itself reachable and serving
    Ready,
    /// Member must be started with an on-disk upgrade
    AutoUpgrade,
    /// Member's data has been moved off it
    CleanedOut,
    /// Last upgrade attempt failed
    UpgradeFailed,
    /// Runtime unit is shutting down
    Terminating,
    /// Runtime unit has stopped
    Terminated,
    /// Agent lost its data and must be recovered
    AgentRecoveryNeeded,
    /// A plan action targeting this member was aborted
    ActionFailed,
    /// A plan action targeting this member exceeded its timeout
    ActionTimedOut,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionType,
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition: DateTime<Utc>,
}

/// Set of conditions, at most one per type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionList(Vec<Condition>);

impl ConditionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.kind == kind)
    }

    pub fn is_true(&self, kind: ConditionType) -> bool {
        self.get(kind).map_or(false, |c| c.status)
    }

    /// Set a condition. Returns true when anything changed.
    ///
    /// The transition time only moves when the status flips.
    pub fn update(
        &mut self,
        kind: ConditionType,
        status: bool,
        reason: Option<String>,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        match self.0.iter_mut().find(|c| c.kind == kind) {
            Some(existing) => {
                if existing.status == status
                    && existing.reason == reason
                    && existing.message == message
                {
                    return false;
                }
                if existing.status != status {
                    existing.last_transition = now;
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
                true
            }
            None => {
                self.0.push(Condition {
                    kind,
                    status,
                    reason,
                    message,
                    last_transition: now,
                });
                true
            }
        }
    }

    /// Remove a condition. Returns true when it was present.
    pub fn remove(&mut self, kind: ConditionType) -> bool {
        let before = self.0.len();
        self.0.retain(|c| c.kind != kind);
        before != self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_update_and_remove() {
        let now = Utc::now();
        let mut list = ConditionList::new();
        assert!(!list.is_true(ConditionType::Ready));

        assert!(list.update(ConditionType::Ready, true, None, None, now));
        assert!(list.is_true(ConditionType::Ready));

        // No-op update reports no change
        assert!(!list.update(ConditionType::Ready, true, None, None, now));

        assert!(list.remove(ConditionType::Ready));
        assert!(!list.remove(ConditionType::Ready));
        assert!(list.is_empty());
    }

    #[test]
    fn test_transition_time_only_moves_on_flip() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(10);
        let mut list = ConditionList::new();
        list.update(ConditionType::ActionFailed, true, Some("a".into()), None, t0);
        list.update(ConditionType::ActionFailed, true, Some("b".into()), None, t1);

        let cond = list.get(ConditionType::ActionFailed).unwrap();
        assert_eq!(cond.last_transition, t0);
        assert_eq!(cond.reason.as_deref(), Some("b"));
    }
}
