//! Server groups and their static role policy
//!
//! Every member belongs to exactly one [`ServerGroup`]. Role-specific behavior
//! lives in a table keyed by the group so that adding a variant forces every
//! policy to be filled in.

use crate::DeploymentMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Role of a cluster member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerGroup {
    /// Single-instance server (single and active-failover modes)
    Single,
    /// Coordination-layer (agency) member
    Agents,
    /// Data server
    DbServers,
    /// Query coordinator
    Coordinators,
    /// Datacenter synchronization master
    SyncMasters,
    /// Datacenter synchronization worker
    SyncWorkers,
}

impl ServerGroup {
    /// All groups, in reconciliation order.
    pub const ALL: [ServerGroup; 6] = [
        ServerGroup::Single,
        ServerGroup::Agents,
        ServerGroup::DbServers,
        ServerGroup::Coordinators,
        ServerGroup::SyncMasters,
        ServerGroup::SyncWorkers,
    ];

    /// Static policy entry for this group.
    pub fn policy(self) -> &'static GroupPolicy {
        &GROUP_POLICIES[self as usize]
    }

    pub fn as_role(self) -> &'static str {
        self.policy().role
    }

    pub fn as_role_abbreviated(self) -> &'static str {
        self.policy().abbreviation
    }

    /// Whether members of this group form the coordination layer.
    pub fn is_coordination_member(self) -> bool {
        self.policy().coordination_member
    }

    /// Whether members of this group run the database server process.
    pub fn is_database_process(self) -> bool {
        self.policy().database_process
    }

    pub fn is_sync(self) -> bool {
        !self.policy().database_process
    }

    /// Failure tolerance windows for this group in the given mode.
    pub fn tolerance(self, mode: DeploymentMode) -> FailureTolerance {
        (self.policy().tolerance)(mode)
    }
}

impl fmt::Display for ServerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_role())
    }
}

/// How long a member may stay not-ready or unreachable before its host is
/// considered lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tolerance {
    Forever,
    Within(Duration),
}

/// Failure tolerance of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureTolerance {
    pub not_ready: Tolerance,
    pub unreachable: Tolerance,
}

impl FailureTolerance {
    const fn both(t: Tolerance) -> Self {
        Self {
            not_ready: t,
            unreachable: t,
        }
    }
}

/// Which health probe a group's containers run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeKind {
    /// `/_api/version` liveness check
    Version,
    /// `/_admin/server/availability` readiness check
    Availability,
    /// Availability check with a relaxed schedule
    SimpleAvailability,
    /// `/_api/version` on the sync port
    SyncVersion,
}

/// Static, per-group behavior
#[derive(Debug)]
pub struct GroupPolicy {
    pub group: ServerGroup,
    pub role: &'static str,
    pub abbreviation: &'static str,
    pub id_prefix: &'static str,
    pub coordination_member: bool,
    pub database_process: bool,
    pub tolerance: fn(DeploymentMode) -> FailureTolerance,
    pub finalizers: &'static [&'static str],
    pub readiness_probe: Option<ProbeKind>,
    pub liveness_probe: Option<ProbeKind>,
    /// Whether the group may be scaled below its current size.
    pub scale_down_allowed: bool,
}

pub const FINALIZER_AGENCY_SERVING: &str = "agent.database.dbop/agency-serving";
pub const FINALIZER_DRAIN_DBSERVER: &str = "dbserver.database.dbop/drain";

const fn within(secs: u64) -> FailureTolerance {
    FailureTolerance::both(Tolerance::Within(Duration::from_secs(secs)))
}

fn single_tolerance(mode: DeploymentMode) -> FailureTolerance {
    match mode {
        DeploymentMode::Single => FailureTolerance::both(Tolerance::Forever),
        _ => within(300),
    }
}

// Indexed by `ServerGroup as usize`.
static GROUP_POLICIES: [GroupPolicy; 6] = [
    GroupPolicy {
        group: ServerGroup::Single,
        role: "single",
        abbreviation: "sngl",
        id_prefix: "SNGL",
        coordination_member: false,
        database_process: true,
        tolerance: single_tolerance,
        finalizers: &[],
        readiness_probe: Some(ProbeKind::Availability),
        liveness_probe: Some(ProbeKind::Version),
        scale_down_allowed: true,
    },
    GroupPolicy {
        group: ServerGroup::Agents,
        role: "agent",
        abbreviation: "agnt",
        id_prefix: "AGNT",
        coordination_member: true,
        database_process: true,
        tolerance: |_| FailureTolerance::both(Tolerance::Forever),
        finalizers: &[FINALIZER_AGENCY_SERVING],
        readiness_probe: Some(ProbeKind::SimpleAvailability),
        liveness_probe: Some(ProbeKind::Version),
        scale_down_allowed: false,
    },
    GroupPolicy {
        group: ServerGroup::DbServers,
        role: "dbserver",
        abbreviation: "prmr",
        id_prefix: "PRMR",
        coordination_member: false,
        database_process: true,
        tolerance: |_| within(300),
        finalizers: &[FINALIZER_DRAIN_DBSERVER],
        readiness_probe: Some(ProbeKind::SimpleAvailability),
        liveness_probe: Some(ProbeKind::Version),
        scale_down_allowed: true,
    },
    GroupPolicy {
        group: ServerGroup::Coordinators,
        role: "coordinator",
        abbreviation: "crdn",
        id_prefix: "CRDN",
        coordination_member: false,
        database_process: true,
        tolerance: |_| within(15),
        finalizers: &[],
        readiness_probe: Some(ProbeKind::Availability),
        liveness_probe: Some(ProbeKind::Version),
        scale_down_allowed: true,
    },
    GroupPolicy {
        group: ServerGroup::SyncMasters,
        role: "syncmaster",
        abbreviation: "syma",
        id_prefix: "SYMA",
        coordination_member: false,
        database_process: false,
        tolerance: |_| within(15),
        finalizers: &[],
        readiness_probe: None,
        liveness_probe: Some(ProbeKind::SyncVersion),
        scale_down_allowed: true,
    },
    GroupPolicy {
        group: ServerGroup::SyncWorkers,
        role: "syncworker",
        abbreviation: "sywr",
        id_prefix: "SYWR",
        coordination_member: false,
        database_process: false,
        tolerance: |_| within(60),
        finalizers: &[],
        readiness_probe: None,
        liveness_probe: Some(ProbeKind::SyncVersion),
        scale_down_allowed: true,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table_is_indexed_by_group() {
        for group in ServerGroup::ALL {
            assert_eq!(group.policy().group, group);
        }
    }

    #[test]
    fn test_only_agents_form_coordination_layer() {
        let coordination: Vec<_> = ServerGroup::ALL
            .iter()
            .filter(|g| g.is_coordination_member())
            .collect();
        assert_eq!(coordination, vec![&ServerGroup::Agents]);
    }

    #[test]
    fn test_single_tolerance_depends_on_mode() {
        assert_eq!(
            ServerGroup::Single.tolerance(DeploymentMode::Single).not_ready,
            Tolerance::Forever
        );
        assert_eq!(
            ServerGroup::Single
                .tolerance(DeploymentMode::ActiveFailover)
                .not_ready,
            Tolerance::Within(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_sync_groups_have_no_readiness_probe() {
        assert!(ServerGroup::SyncMasters.policy().readiness_probe.is_none());
        assert!(ServerGroup::SyncWorkers.policy().readiness_probe.is_none());
        assert!(ServerGroup::SyncWorkers.is_sync());
    }
}
