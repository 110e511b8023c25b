//! Reconciliation configuration

use crate::drift::DriftPolicy;
use dbop_types::ActionType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Reconciliation settings shared by every deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Interval between periodic ticks in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum number of deployments reconciled at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_deployments: usize,

    /// Deadline of a single call against the cluster state store
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Deadline of a coordination-layer read
    #[serde(default = "default_coordination_timeout")]
    pub coordination_timeout_secs: u64,

    /// What the drift detector hashes
    #[serde(default)]
    pub drift: DriftPolicy,

    /// Per-action-type timeout overrides
    #[serde(default)]
    pub action_timeouts: ActionTimeouts,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_concurrent_deployments: default_max_concurrent(),
            operation_timeout_secs: default_operation_timeout(),
            coordination_timeout_secs: default_coordination_timeout(),
            drift: DriftPolicy::default(),
            action_timeouts: ActionTimeouts::default(),
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn coordination_timeout(&self) -> Duration {
        Duration::from_secs(self.coordination_timeout_secs)
    }

    pub fn action_timeout(&self, action: ActionType) -> Duration {
        self.action_timeouts.get(action)
    }
}

/// Timeout overrides in seconds, keyed by action type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionTimeouts(BTreeMap<ActionType, u64>);

impl ActionTimeouts {
    pub fn set(&mut self, action: ActionType, timeout: Duration) {
        self.0.insert(action, timeout.as_secs());
    }

    /// Configured timeout, or the action type's default.
    pub fn get(&self, action: ActionType) -> Duration {
        self.0
            .get(&action)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| action.default_timeout())
    }
}

fn default_interval() -> u64 {
    10
}

fn default_max_concurrent() -> usize {
    10
}

fn default_operation_timeout() -> u64 {
    30
}

fn default_coordination_timeout() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_override_falls_back_to_default() {
        let mut config = ReconcileConfig::default();
        config
            .action_timeouts
            .set(ActionType::RotateMember, Duration::from_secs(5));

        assert_eq!(
            config.action_timeout(ActionType::RotateMember),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.action_timeout(ActionType::WaitForMemberUp),
            ActionType::WaitForMemberUp.default_timeout()
        );
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: ReconcileConfig =
            serde_json::from_str(r#"{"interval_secs": 3, "action_timeouts": {"SetCurrentImage": 60}}"#)
                .unwrap();
        assert_eq!(config.interval(), Duration::from_secs(3));
        assert_eq!(config.operation_timeout_secs, 30);
        assert_eq!(
            config.action_timeout(ActionType::SetCurrentImage),
            Duration::from_secs(60)
        );
    }
}
