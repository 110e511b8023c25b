//! Configuration rendering
//!
//! A [`ConfigRenderer`] turns (spec, status, member, image) into the fully
//! materialized [`RuntimeUnitSpec`] the member runs with. Rendering is pure:
//! the drift detector relies on identical inputs producing identical output.

mod args;
mod probes;

pub use args::{database_args, sync_args};
pub use probes::probe_spec;

use crate::error::Result;
use dbop_types::{
    ConditionType, ContainerSpec, DeploymentId, DeploymentSpec, DeploymentStatus, ImageInfo,
    Member, MemberId, RuntimeUnitSpec, ServerGroup, Tolerance, VolumeMount, VolumeSource,
    VolumeSpec,
};
use std::collections::BTreeMap;

pub const LABEL_DEPLOYMENT: &str = "database.dbop/deployment";
pub const LABEL_ROLE: &str = "database.dbop/role";
pub const LABEL_MEMBER: &str = "database.dbop/member";

pub const FINALIZER_DELAY_TERMINATION: &str = "pod.database.dbop/delay";

pub const DATABASE_PORT: u16 = 8529;
pub const SYNC_MASTER_PORT: u16 = 8629;
pub const SYNC_WORKER_PORT: u16 = 8729;

pub const DATA_MOUNT_DIR: &str = "/data";
pub const TLS_KEYFILE_MOUNT_DIR: &str = "/secrets/tls";
pub const JWT_SECRET_MOUNT_DIR: &str = "/secrets/jwt";
pub const MASTER_JWT_MOUNT_DIR: &str = "/secrets/master-jwt";

const DEFAULT_TERMINATION_GRACE_SECS: u32 = 30;

/// Everything a renderer may look at
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    pub deployment_id: &'a DeploymentId,
    pub deployment_name: &'a str,
    pub spec: &'a DeploymentSpec,
    pub status: &'a DeploymentStatus,
    pub group: ServerGroup,
    pub member: &'a Member,
    pub image: &'a ImageInfo,
}

impl RenderInput<'_> {
    pub fn scheme(&self) -> &'static str {
        if self.spec.tls.enabled {
            "ssl"
        } else {
            "tcp"
        }
    }
}

/// Produces the runtime configuration of a member
pub trait ConfigRenderer: Send + Sync {
    fn render(&self, input: &RenderInput<'_>) -> Result<RuntimeUnitSpec>;
}

/// Name of the runtime unit (and volume claim) of a member.
pub fn unit_name(deployment_name: &str, group: ServerGroup, member: &MemberId) -> String {
    format!(
        "{}-{}-{}",
        deployment_name,
        group.as_role_abbreviated(),
        member.as_str().to_lowercase()
    )
}

pub fn tls_keyfile_secret_name(
    deployment_name: &str,
    group: ServerGroup,
    member: &MemberId,
) -> String {
    format!(
        "{}-{}-{}-tls-keyfile",
        deployment_name,
        group.as_role(),
        member.as_str().to_lowercase()
    )
}

/// Address peers use to reach a member: the recorded endpoint, or its DNS name.
pub fn member_endpoint(deployment_name: &str, group: ServerGroup, member: &Member) -> String {
    member.endpoint.clone().unwrap_or_else(|| {
        format!(
            "{}-{}-{}.{}-int",
            deployment_name,
            group.as_role(),
            member.id.as_str().to_lowercase(),
            deployment_name
        )
    })
}

/// Labels put on every resource owned by a member.
pub fn member_labels(
    deployment_id: &DeploymentId,
    group: ServerGroup,
    member: &MemberId,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_DEPLOYMENT.to_string(), deployment_id.to_string()),
        (LABEL_ROLE.to_string(), group.as_role().to_string()),
        (LABEL_MEMBER.to_string(), member.to_string()),
    ])
}

fn tolerations(input: &RenderInput<'_>) -> Vec<String> {
    let tolerance = input.group.tolerance(input.spec.mode);
    let node = |key: &str, t: Tolerance| match t {
        Tolerance::Forever => format!("{key}:NoExecute"),
        Tolerance::Within(d) => format!("{key}:NoExecute:{}s", d.as_secs()),
    };

    let mut out = input.spec.group_spec(input.group).tolerations.clone();
    for wanted in [
        node("node.not-ready", tolerance.not_ready),
        node("node.unreachable", tolerance.unreachable),
    ] {
        let key = wanted.split(':').next().unwrap_or_default();
        if !out.iter().any(|t| t.split(':').next() == Some(key)) {
            out.push(wanted);
        }
    }
    out
}

fn finalizers(input: &RenderInput<'_>) -> Vec<String> {
    let mut out = Vec::new();
    if input
        .spec
        .group_spec(input.group)
        .shutdown_delay_secs
        .is_some()
    {
        out.push(FINALIZER_DELAY_TERMINATION.to_string());
    }
    out.extend(input.group.policy().finalizers.iter().map(|f| f.to_string()));
    out
}

/// Reference renderer following the per-group launch rules
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRenderer;

impl DefaultRenderer {
    pub fn new() -> Self {
        Self
    }

    fn volumes(&self, input: &RenderInput<'_>) -> (Vec<VolumeSpec>, Vec<VolumeMount>) {
        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        let mut add = |name: &str, source: VolumeSource, path: &str| {
            volumes.push(VolumeSpec {
                name: name.to_string(),
                source,
            });
            mounts.push(VolumeMount {
                name: name.to_string(),
                mount_path: path.to_string(),
                read_only: name != "data",
            });
        };

        let id = &input.member.id;
        if input.group.is_database_process() {
            add(
                "data",
                VolumeSource::Claim(unit_name(input.deployment_name, input.group, id)),
                DATA_MOUNT_DIR,
            );
            if input.spec.authentication.enabled {
                let secret = input
                    .spec
                    .authentication
                    .jwt_secret
                    .clone()
                    .unwrap_or_else(|| format!("{}-jwt", input.deployment_name));
                add("cluster-jwt", VolumeSource::Secret(secret), JWT_SECRET_MOUNT_DIR);
            }
        } else {
            add(
                "master-jwt",
                VolumeSource::Secret(format!("{}-sync-jwt", input.deployment_name)),
                MASTER_JWT_MOUNT_DIR,
            );
        }
        if input.spec.tls.enabled || input.group == ServerGroup::SyncMasters {
            add(
                "tls-keyfile",
                VolumeSource::Secret(tls_keyfile_secret_name(
                    input.deployment_name,
                    input.group,
                    id,
                )),
                TLS_KEYFILE_MOUNT_DIR,
            );
        }
        (volumes, mounts)
    }
}

impl ConfigRenderer for DefaultRenderer {
    fn render(&self, input: &RenderInput<'_>) -> Result<RuntimeUnitSpec> {
        let group = input.group;
        let group_spec = input.spec.group_spec(group);
        let policy = group.policy();
        let secure = input.spec.tls.enabled;

        let (args, command, port, name) = if group.is_database_process() {
            (database_args(input), "/usr/sbin/dbd", DATABASE_PORT, "server")
        } else if group == ServerGroup::SyncMasters {
            (sync_args(input), "/usr/sbin/dbsync", SYNC_MASTER_PORT, "syncmaster")
        } else {
            (sync_args(input), "/usr/sbin/dbsync", SYNC_WORKER_PORT, "syncworker")
        };

        let (volumes, volume_mounts) = self.volumes(input);

        let readiness_probe = policy
            .readiness_probe
            .filter(|_| !group_spec.readiness_probe_disabled)
            .map(|kind| probe_spec(kind, port, secure));
        let liveness_probe = policy
            .liveness_probe
            .filter(|_| !group_spec.liveness_probe_disabled)
            .map(|kind| probe_spec(kind, port, secure));

        let container = ContainerSpec {
            name: name.to_string(),
            image: input.image.image_id.clone(),
            command: vec![command.to_string()],
            args: args.clone(),
            env: BTreeMap::new(),
            ports: vec![port],
            volume_mounts: volume_mounts.clone(),
            readiness_probe,
            liveness_probe,
        };

        let mut init_containers = group_spec.init_containers.clone();
        if group.is_database_process()
            && input.member.conditions.is_true(ConditionType::AutoUpgrade)
        {
            let mut upgrade_args = args;
            upgrade_args.push("--database.auto-upgrade=true".to_string());
            init_containers.push(ContainerSpec {
                name: "upgrade".to_string(),
                image: input.image.image_id.clone(),
                command: vec![command.to_string()],
                args: upgrade_args,
                volume_mounts,
                ..ContainerSpec::default()
            });
        }

        Ok(RuntimeUnitSpec {
            containers: vec![container],
            init_containers,
            volumes,
            labels: member_labels(input.deployment_id, group, &input.member.id),
            annotations: group_spec.annotations.clone(),
            tolerations: tolerations(input),
            finalizers: finalizers(input),
            termination_grace_secs: group_spec
                .shutdown_delay_secs
                .unwrap_or(DEFAULT_TERMINATION_GRACE_SECS),
        })
    }
}
