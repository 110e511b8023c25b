//! Strongly-typed identifiers for controller entities
//!
//! Deployment IDs are UUID-based; member IDs carry a role prefix so a member's
//! group can be recovered from its identity alone.

use crate::ServerGroup;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a managed deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentId(Uuid);

impl DeploymentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deploy:{}", self.0)
    }
}

/// Identifier of a single cluster member, e.g. `PRMR-1a2b3c4d`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh member ID for the given group.
    pub fn generate(group: ServerGroup) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", group.policy().id_prefix, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The group encoded in the ID prefix, if it is a known one.
    pub fn group_hint(&self) -> Option<ServerGroup> {
        let prefix = self.0.split('-').next()?;
        ServerGroup::ALL
            .iter()
            .copied()
            .find(|g| g.policy().id_prefix == prefix)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_id_generation() {
        let id1 = DeploymentId::generate();
        let id2 = DeploymentId::generate();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("deploy:"));
    }

    #[test]
    fn test_member_id_carries_group_prefix() {
        for group in ServerGroup::ALL {
            let id = MemberId::generate(group);
            assert_eq!(id.group_hint(), Some(group));
        }
    }

    #[test]
    fn test_unknown_prefix_has_no_hint() {
        assert_eq!(MemberId::new("XXXX-1234").group_hint(), None);
    }
}
