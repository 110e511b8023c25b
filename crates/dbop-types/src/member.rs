//! Member model
//!
//! A Member is one database process instance owned by a Deployment. Members
//! are grouped by [`ServerGroup`] inside [`MemberList`].

use crate::{
    ConditionList, ConditionType, Fingerprint, ImageInfo, MemberId, ModelError, ModelResult,
    ServerGroup,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Lifecycle phase of a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberPhase {
    /// Waiting for its runtime unit to be created
    Pending,
    /// Runtime unit created with an on-disk upgrade
    Upgrading,
    /// Runtime unit created
    Created,
    /// Being removed from the deployment
    Removing,
    /// Failed and waiting for remediation
    Failed,
}

impl MemberPhase {
    /// Position in the lifecycle; phases only move forward on their own.
    pub fn rank(self) -> u8 {
        match self {
            MemberPhase::Pending => 0,
            MemberPhase::Upgrading => 1,
            MemberPhase::Created => 2,
            MemberPhase::Removing => 3,
            MemberPhase::Failed => 4,
        }
    }

    /// Whether the member has a runtime unit that was created for it.
    pub fn is_created(self) -> bool {
        matches!(self, MemberPhase::Created | MemberPhase::Upgrading)
    }
}

impl fmt::Display for MemberPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Observed state of one cluster member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member identity
    pub id: MemberId,

    /// Current lifecycle phase
    pub phase: MemberPhase,

    /// Named boolean conditions
    #[serde(default)]
    pub conditions: ConditionList,

    /// Fingerprint of the configuration the member was last created with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,

    /// Address peers use to reach the member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Image the member runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,

    /// Name of the runtime unit hosting the member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_unit: Option<String>,

    /// UID of the runtime unit created for the member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_uid: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Member {
    /// A new member waiting for creation.
    pub fn new(id: MemberId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            phase: MemberPhase::Pending,
            conditions: ConditionList::new(),
            fingerprint: None,
            endpoint: None,
            image: None,
            runtime_unit: None,
            runtime_uid: None,
            created_at: now,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.conditions.is_true(ConditionType::Ready)
    }

    /// Move the member forward in its lifecycle.
    pub fn advance_phase(&mut self, next: MemberPhase) -> ModelResult<()> {
        if next.rank() < self.phase.rank() {
            return Err(ModelError::PhaseRegression {
                member: self.id.clone(),
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Send the member back to `Pending` so it is recreated.
    ///
    /// Only remediation actions call this; it forgets the runtime unit the
    /// member was bound to.
    pub fn restart_lifecycle(&mut self) {
        self.phase = MemberPhase::Pending;
        self.runtime_uid = None;
        self.conditions.remove(ConditionType::Ready);
    }
}

/// Members of a deployment, grouped by role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberList {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub single: Vec<Member>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<Member>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dbservers: Vec<Member>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coordinators: Vec<Member>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub syncmasters: Vec<Member>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub syncworkers: Vec<Member>,
}

impl MemberList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, group: ServerGroup) -> &[Member] {
        match group {
            ServerGroup::Single => &self.single,
            ServerGroup::Agents => &self.agents,
            ServerGroup::DbServers => &self.dbservers,
            ServerGroup::Coordinators => &self.coordinators,
            ServerGroup::SyncMasters => &self.syncmasters,
            ServerGroup::SyncWorkers => &self.syncworkers,
        }
    }

    pub fn group_mut(&mut self, group: ServerGroup) -> &mut Vec<Member> {
        match group {
            ServerGroup::Single => &mut self.single,
            ServerGroup::Agents => &mut self.agents,
            ServerGroup::DbServers => &mut self.dbservers,
            ServerGroup::Coordinators => &mut self.coordinators,
            ServerGroup::SyncMasters => &mut self.syncmasters,
            ServerGroup::SyncWorkers => &mut self.syncworkers,
        }
    }

    /// Iterate all members in group order.
    pub fn iter(&self) -> impl Iterator<Item = (ServerGroup, &Member)> {
        ServerGroup::ALL
            .into_iter()
            .flat_map(move |g| self.group(g).iter().map(move |m| (g, m)))
    }

    pub fn len(&self) -> usize {
        ServerGroup::ALL.iter().map(|g| self.group(*g).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_by_id(&self, id: &MemberId) -> Option<(ServerGroup, &Member)> {
        self.iter().find(|(_, m)| &m.id == id)
    }

    pub fn element_by_id_mut(&mut self, id: &MemberId) -> Option<(ServerGroup, &mut Member)> {
        let group = ServerGroup::ALL
            .into_iter()
            .find(|g| self.group(*g).iter().any(|m| &m.id == id))?;
        self.group_mut(group)
            .iter_mut()
            .find(|m| &m.id == id)
            .map(|m| (group, m))
    }

    /// Add a member to a group. Fails if the ID is already in use.
    pub fn add(&mut self, member: Member, group: ServerGroup) -> ModelResult<()> {
        if self.element_by_id(&member.id).is_some() {
            return Err(ModelError::DuplicateMember(member.id));
        }
        self.group_mut(group).push(member);
        Ok(())
    }

    /// Replace a member with an updated copy.
    pub fn update(&mut self, member: Member) -> ModelResult<()> {
        match self.element_by_id_mut(&member.id) {
            Some((_, existing)) => {
                *existing = member;
                Ok(())
            }
            None => Err(ModelError::MemberNotFound(member.id)),
        }
    }

    pub fn remove(&mut self, id: &MemberId) -> Option<(ServerGroup, Member)> {
        for group in ServerGroup::ALL {
            let members = self.group_mut(group);
            if let Some(pos) = members.iter().position(|m| &m.id == id) {
                return Some((group, members.remove(pos)));
            }
        }
        None
    }

    /// Number of members in the group that report ready.
    pub fn members_ready(&self, group: ServerGroup) -> usize {
        self.group(group).iter().filter(|m| m.is_ready()).count()
    }

    /// Check the internal consistency of the list.
    pub fn validate(&self) -> ModelResult<()> {
        let mut seen = HashSet::new();
        for (group, member) in self.iter() {
            if !seen.insert(&member.id) {
                return Err(ModelError::DuplicateMember(member.id.clone()));
            }
            if let Some(hint) = member.id.group_hint() {
                if hint != group {
                    return Err(ModelError::MemberInWrongGroup {
                        member: member.id.clone(),
                        group,
                    });
                }
            }
        }
        Ok(())
    }
}
