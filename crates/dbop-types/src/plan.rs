//! Plans and actions
//!
//! A [`Plan`] is an ordered list of [`Action`]s persisted in the deployment
//! status. Only the head action is ever in progress.

use crate::{MemberId, ServerGroup};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Closed set of remediation steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    /// Add a new member to a group
    AddMember,
    /// Remove a member from a group
    RemoveMember,
    /// Delete the member's TLS keyfile so it is regenerated
    CleanTlsKeyfile,
    /// Move leadership responsibilities off the member
    ResignLeadership,
    /// Stop, recreate and start the member
    RotateMember,
    /// Wait until the member is reachable
    WaitForMemberUp,
    /// Wait until the member's shards are in sync with their peers
    WaitForMemberInSync,
    /// Commit an image as the deployment's current image
    SetCurrentImage,
}

impl ActionType {
    pub const ALL: [ActionType; 8] = [
        ActionType::AddMember,
        ActionType::RemoveMember,
        ActionType::CleanTlsKeyfile,
        ActionType::ResignLeadership,
        ActionType::RotateMember,
        ActionType::WaitForMemberUp,
        ActionType::WaitForMemberInSync,
        ActionType::SetCurrentImage,
    ];

    /// Timeout used when the configuration does not override it.
    pub fn default_timeout(self) -> Duration {
        const MINUTE: u64 = 60;
        match self {
            ActionType::AddMember => Duration::from_secs(10 * MINUTE),
            ActionType::RemoveMember => Duration::from_secs(15 * MINUTE),
            ActionType::CleanTlsKeyfile => Duration::from_secs(MINUTE),
            ActionType::ResignLeadership => Duration::from_secs(30 * MINUTE),
            ActionType::RotateMember => Duration::from_secs(15 * MINUTE),
            ActionType::WaitForMemberUp => Duration::from_secs(30 * MINUTE),
            ActionType::WaitForMemberInSync => Duration::from_secs(30 * MINUTE),
            ActionType::SetCurrentImage => Duration::from_secs(6 * 60 * MINUTE),
        }
    }

    /// Whether the action disrupts the member it targets.
    pub fn is_disruptive(self) -> bool {
        matches!(
            self,
            ActionType::RotateMember | ActionType::RemoveMember | ActionType::ResignLeadership
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One planned remediation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,

    /// Group of the target member; unset for deployment-wide actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<ServerGroup>,

    /// Target member; unset for deployment-wide actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<MemberId>,

    /// Human-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Image reference the action applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,

    /// Set once the executor has started the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(
        action_type: ActionType,
        group: Option<ServerGroup>,
        member_id: Option<MemberId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            action_type,
            group,
            member_id,
            reason: None,
            image: None,
            params: BTreeMap::new(),
            created_at: now,
            started_at: None,
        }
    }

    /// Action targeting a single member.
    pub fn for_member(
        action_type: ActionType,
        group: ServerGroup,
        member_id: MemberId,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(action_type, Some(group), Some(member_id), now)
    }

    /// Action that targets the deployment as a whole.
    pub fn deployment_wide(action_type: ActionType, now: DateTime<Utc>) -> Self {
        Self::new(action_type, None, None, now)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Time since the action was started, if it was.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.started_at?;
        Some((now - started).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Ordered list of actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan(Vec<Action>);

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<&Action> {
        self.0.first()
    }

    pub fn head_mut(&mut self) -> Option<&mut Action> {
        self.0.first_mut()
    }

    /// Remove and return the head action.
    pub fn pop_head(&mut self) -> Option<Action> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.remove(0))
        }
    }

    pub fn push(&mut self, action: Action) {
        self.0.push(action);
    }

    pub fn extend(&mut self, other: Plan) {
        self.0.extend(other.0);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn action_types(&self) -> Vec<ActionType> {
        self.0.iter().map(|a| a.action_type).collect()
    }
}

impl From<Vec<Action>> for Plan {
    fn from(actions: Vec<Action>) -> Self {
        Self(actions)
    }
}

impl FromIterator<Action> for Plan {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Plan {
    type Item = Action;
    type IntoIter = std::vec::IntoIter<Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
