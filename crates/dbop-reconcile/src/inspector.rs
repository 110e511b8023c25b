//! Cached read-through view of cluster resources
//!
//! Planning reads only from an [`Inspector`], never from a live store, so a
//! plan is a pure function of the snapshot it was built against.

use dbop_types::{MemberId, RuntimeUnit, Secret, VolumeClaim};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point lookups and iteration over one deployment's resources
pub trait Inspector: Send + Sync {
    fn runtime_unit(&self, name: &str) -> Option<&RuntimeUnit>;

    fn runtime_units(&self) -> Box<dyn Iterator<Item = &RuntimeUnit> + '_>;

    fn volume_claim(&self, name: &str) -> Option<&VolumeClaim>;

    fn volume_claims(&self) -> Box<dyn Iterator<Item = &VolumeClaim> + '_>;

    fn secret(&self, name: &str) -> Option<&Secret>;

    /// The runtime unit hosting `member`, if any.
    fn runtime_unit_for_member(&self, member: &MemberId) -> Option<&RuntimeUnit> {
        self.runtime_units().find(|u| &u.member_id == member)
    }
}

/// Point-in-time copy of a deployment's resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub runtime_units: BTreeMap<String, RuntimeUnit>,
    pub volume_claims: BTreeMap<String, VolumeClaim>,
    pub secrets: BTreeMap<String, Secret>,
}

impl ClusterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime_unit(mut self, unit: RuntimeUnit) -> Self {
        self.runtime_units.insert(unit.name.clone(), unit);
        self
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secrets.insert(secret.name.clone(), secret);
        self
    }
}

impl Inspector for ClusterSnapshot {
    fn runtime_unit(&self, name: &str) -> Option<&RuntimeUnit> {
        self.runtime_units.get(name)
    }

    fn runtime_units(&self) -> Box<dyn Iterator<Item = &RuntimeUnit> + '_> {
        Box::new(self.runtime_units.values())
    }

    fn volume_claim(&self, name: &str) -> Option<&VolumeClaim> {
        self.volume_claims.get(name)
    }

    fn volume_claims(&self) -> Box<dyn Iterator<Item = &VolumeClaim> + '_> {
        Box::new(self.volume_claims.values())
    }

    fn secret(&self, name: &str) -> Option<&Secret> {
        self.secrets.get(name)
    }
}
