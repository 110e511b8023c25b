//! Coordination-layer view of collections and shard placement

use crate::MemberId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Planned and current servers of one shard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardServers {
    pub planned: Vec<MemberId>,
    pub current: Vec<MemberId>,
}

impl ShardServers {
    /// All planned servers are also current.
    pub fn is_in_sync(&self) -> bool {
        self.planned.iter().all(|m| self.current.contains(m))
    }
}

/// Shards of one collection, keyed by shard name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionShards(pub BTreeMap<String, ShardServers>);

/// Collections per database, as read from the coordination layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionListing {
    /// database -> collection -> shards
    pub databases: BTreeMap<String, BTreeMap<String, CollectionShards>>,
}

impl CollectionListing {
    pub fn shards(&self) -> impl Iterator<Item = (&str, &ShardServers)> {
        self.databases
            .values()
            .flat_map(|collections| collections.values())
            .flat_map(|shards| shards.0.iter().map(|(name, s)| (name.as_str(), s)))
    }

    pub fn all_in_sync(&self) -> bool {
        self.shards().all(|(_, s)| s.is_in_sync())
    }

    /// Every shard planned on `member` has it among its current servers.
    pub fn is_member_in_sync(&self, member: &MemberId) -> bool {
        self.shards()
            .filter(|(_, s)| s.planned.contains(member))
            .all(|(_, s)| s.current.contains(member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(planned: &[&str], current: &[&str]) -> CollectionListing {
        let shard = ShardServers {
            planned: planned.iter().map(|s| MemberId::from(*s)).collect(),
            current: current.iter().map(|s| MemberId::from(*s)).collect(),
        };
        let mut shards = CollectionShards::default();
        shards.0.insert("s1".into(), shard);
        let mut collections = BTreeMap::new();
        collections.insert("users".into(), shards);
        let mut listing = CollectionListing::default();
        listing.databases.insert("_system".into(), collections);
        listing
    }

    #[test]
    fn test_in_sync_when_current_covers_planned() {
        let l = listing(&["PRMR-a", "PRMR-b"], &["PRMR-b", "PRMR-a"]);
        assert!(l.all_in_sync());
        assert!(l.is_member_in_sync(&"PRMR-a".into()));
    }

    #[test]
    fn test_out_of_sync_follower() {
        let l = listing(&["PRMR-a", "PRMR-b"], &["PRMR-a"]);
        assert!(!l.all_in_sync());
        assert!(l.is_member_in_sync(&"PRMR-a".into()));
        assert!(!l.is_member_in_sync(&"PRMR-b".into()));
        // Members without planned shards are trivially in sync
        assert!(l.is_member_in_sync(&"PRMR-c".into()));
    }
}
