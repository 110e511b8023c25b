//! Deployment: desired spec and observed status
//!
//! The spec is owned by the user and never written by the controller. The
//! status is owned by the controller and versioned for compare-and-swap
//! writes.

use crate::{ContainerSpec, DeploymentId, ImageInfo, ImageList, MemberList, Plan, ServerGroup};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How the database cluster is laid out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentMode {
    /// One single server
    Single,
    /// Two single servers with a coordination layer deciding the leader
    ActiveFailover,
    /// Full cluster with agents, db servers and coordinators
    #[default]
    Cluster,
}

impl DeploymentMode {
    /// Whether this mode runs an internal coordination layer.
    pub fn uses_coordination_layer(self) -> bool {
        matches!(self, DeploymentMode::ActiveFailover | DeploymentMode::Cluster)
    }

    /// Whether members of `group` exist in this mode (sync groups aside).
    pub fn has_group(self, group: ServerGroup) -> bool {
        match (self, group) {
            (DeploymentMode::Single, ServerGroup::Single) => true,
            (DeploymentMode::ActiveFailover, ServerGroup::Single | ServerGroup::Agents) => true,
            (
                DeploymentMode::Cluster,
                ServerGroup::Agents | ServerGroup::DbServers | ServerGroup::Coordinators,
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How init containers take part in drift detection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InitContainerMode {
    /// Init container changes never cause a rotation
    Ignore,
    /// Init containers declared in the spec are part of the fingerprint
    #[default]
    Update,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Name of the CA secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Name of the JWT secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSpec {
    /// Allow the controller to move to a new image on its own
    #[serde(default)]
    pub auto_upgrade: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Image for sync members; defaults to the deployment image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_endpoint: Option<String>,
}

/// Per-group settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroupSpec {
    /// Desired number of members; the mode default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Extra launch arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<ContainerSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_container_mode: Option<InitContainerMode>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<String>,

    #[serde(default)]
    pub readiness_probe_disabled: bool,

    #[serde(default)]
    pub liveness_probe_disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_delay_secs: Option<u32>,
}

/// Desired configuration of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub mode: DeploymentMode,

    /// Database image reference
    pub image: String,

    #[serde(default = "default_storage_engine")]
    pub storage_engine: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertised_endpoint: Option<String>,

    #[serde(default)]
    pub tls: TlsSpec,

    #[serde(default)]
    pub authentication: AuthenticationSpec,

    #[serde(default)]
    pub upgrade: UpgradeSpec,

    #[serde(default)]
    pub sync: SyncSpec,

    #[serde(default)]
    pub single: ServerGroupSpec,
    #[serde(default)]
    pub agents: ServerGroupSpec,
    #[serde(default)]
    pub dbservers: ServerGroupSpec,
    #[serde(default)]
    pub coordinators: ServerGroupSpec,
    #[serde(default)]
    pub syncmasters: ServerGroupSpec,
    #[serde(default)]
    pub syncworkers: ServerGroupSpec,
}

fn default_storage_engine() -> String {
    "rocksdb".to_string()
}

impl DeploymentSpec {
    pub fn new(mode: DeploymentMode, image: impl Into<String>) -> Self {
        Self {
            mode,
            image: image.into(),
            storage_engine: default_storage_engine(),
            advertised_endpoint: None,
            tls: TlsSpec::default(),
            authentication: AuthenticationSpec::default(),
            upgrade: UpgradeSpec::default(),
            sync: SyncSpec::default(),
            single: ServerGroupSpec::default(),
            agents: ServerGroupSpec::default(),
            dbservers: ServerGroupSpec::default(),
            coordinators: ServerGroupSpec::default(),
            syncmasters: ServerGroupSpec::default(),
            syncworkers: ServerGroupSpec::default(),
        }
    }

    pub fn group_spec(&self, group: ServerGroup) -> &ServerGroupSpec {
        match group {
            ServerGroup::Single => &self.single,
            ServerGroup::Agents => &self.agents,
            ServerGroup::DbServers => &self.dbservers,
            ServerGroup::Coordinators => &self.coordinators,
            ServerGroup::SyncMasters => &self.syncmasters,
            ServerGroup::SyncWorkers => &self.syncworkers,
        }
    }

    pub fn group_spec_mut(&mut self, group: ServerGroup) -> &mut ServerGroupSpec {
        match group {
            ServerGroup::Single => &mut self.single,
            ServerGroup::Agents => &mut self.agents,
            ServerGroup::DbServers => &mut self.dbservers,
            ServerGroup::Coordinators => &mut self.coordinators,
            ServerGroup::SyncMasters => &mut self.syncmasters,
            ServerGroup::SyncWorkers => &mut self.syncworkers,
        }
    }

    /// Whether the deployment runs members of `group` at all.
    pub fn is_group_active(&self, group: ServerGroup) -> bool {
        if group.is_sync() {
            return self.sync.enabled && self.mode == DeploymentMode::Cluster;
        }
        self.mode.has_group(group)
    }

    /// Desired member count of a group, with mode defaults applied.
    pub fn group_count(&self, group: ServerGroup) -> u32 {
        if !self.is_group_active(group) {
            return 0;
        }
        if let Some(count) = self.group_spec(group).count {
            return count;
        }
        match group {
            ServerGroup::Single if self.mode == DeploymentMode::Single => 1,
            ServerGroup::Single => 2,
            _ => 3,
        }
    }

    /// Image reference for members of `group`.
    pub fn image_for(&self, group: ServerGroup) -> &str {
        match (&self.sync.image, group.is_sync()) {
            (Some(image), true) => image,
            _ => &self.image,
        }
    }

    pub fn init_container_mode(&self, group: ServerGroup) -> InitContainerMode {
        self.group_spec(group)
            .init_container_mode
            .unwrap_or_default()
    }
}

/// Observed state of a deployment, written only by the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    #[serde(default)]
    pub members: MemberList,

    /// Plan in flight; empty when converged
    #[serde(default)]
    pub plan: Plan,

    /// Image metadata discovered so far
    #[serde(default)]
    pub images: ImageList,

    /// Image the deployment as a whole runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_image: Option<ImageInfo>,
}

/// A managed database deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub name: String,
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: DeploymentStatus,

    /// Incremented by every accepted status write
    #[serde(default)]
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set when the user asked for the deployment to be removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn new(name: impl Into<String>, spec: DeploymentSpec) -> Self {
        let now = Utc::now();
        Self {
            id: DeploymentId::generate(),
            name: name.into(),
            spec,
            status: DeploymentStatus::default(),
            version: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
