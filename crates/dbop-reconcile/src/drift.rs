//! Drift detection
//!
//! A member's fingerprint is a BLAKE3 digest over the canonical JSON form of
//! its rendered [`RuntimeUnitSpec`], with volatile fields removed first. The
//! fingerprint recorded at creation is compared with a fresh one to decide
//! whether the member must be rotated.

use crate::error::{ReconcileError, Result};
use crate::render::{ConfigRenderer, RenderInput};
use dbop_types::{
    DeploymentSpec, DeploymentStatus, Fingerprint, ImageInfo, InitContainerMode, Member,
    RuntimeUnitSpec, ServerGroup, ServerGroupSpec,
};
use serde::{Deserialize, Serialize};

/// Which parts of a rendered configuration are hashed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftPolicy {
    /// Used for groups that do not set their own mode
    #[serde(default)]
    pub init_container_mode: InitContainerMode,

    /// Annotations that change without requiring a rotation
    #[serde(default = "default_volatile_annotations")]
    pub volatile_annotations: Vec<String>,
}

impl Default for DriftPolicy {
    fn default() -> Self {
        Self {
            init_container_mode: InitContainerMode::default(),
            volatile_annotations: default_volatile_annotations(),
        }
    }
}

fn default_volatile_annotations() -> Vec<String> {
    vec!["database.dbop/restarted-at".to_string()]
}

/// Digest of a rendered configuration.
///
/// In `Update` mode the rendered init containers are replaced by the ones the
/// group declares; in `Ignore` mode they are dropped.
pub fn fingerprint(
    rendered: &RuntimeUnitSpec,
    group_spec: &ServerGroupSpec,
    policy: &DriftPolicy,
) -> Result<Fingerprint> {
    let mut hashed = rendered.clone();
    match group_spec
        .init_container_mode
        .unwrap_or(policy.init_container_mode)
    {
        InitContainerMode::Update => hashed.init_containers = group_spec.init_containers.clone(),
        InitContainerMode::Ignore => hashed.init_containers.clear(),
    }
    for key in &policy.volatile_annotations {
        hashed.annotations.remove(key);
    }

    let canonical = serde_json::to_vec(&hashed)
        .map_err(|e| ReconcileError::Transient(format!("encode runtime spec: {e}")))?;
    Ok(Fingerprint::from_hex(
        blake3::hash(&canonical).to_hex().to_string(),
    ))
}

/// Whether a member's recorded fingerprint differs from `fresh`.
pub fn needs_rotation(member: &Member, fresh: &Fingerprint) -> bool {
    member.fingerprint.as_ref() != Some(fresh)
}

/// Image a member of `group` should run, if its metadata is known.
pub fn desired_image<'a>(
    spec: &DeploymentSpec,
    status: &'a DeploymentStatus,
    group: ServerGroup,
) -> Option<&'a ImageInfo> {
    if group.is_sync() {
        if let Some(image) = &spec.sync.image {
            return status.images.get_by_image(image);
        }
    }
    status
        .current_image
        .as_ref()
        .or_else(|| status.images.get_by_image(&spec.image))
}

/// Renders and fingerprints members
pub struct DriftDetector<'a> {
    renderer: &'a dyn ConfigRenderer,
    policy: &'a DriftPolicy,
}

impl<'a> DriftDetector<'a> {
    pub fn new(renderer: &'a dyn ConfigRenderer, policy: &'a DriftPolicy) -> Self {
        Self { renderer, policy }
    }

    /// Render the member and return the spec together with its fingerprint.
    pub fn render(&self, input: &RenderInput<'_>) -> Result<(RuntimeUnitSpec, Fingerprint)> {
        let rendered = self.renderer.render(input)?;
        let fp = fingerprint(
            &rendered,
            input.spec.group_spec(input.group),
            self.policy,
        )?;
        Ok((rendered, fp))
    }

    pub fn fresh_fingerprint(&self, input: &RenderInput<'_>) -> Result<Fingerprint> {
        self.render(input).map(|(_, fp)| fp)
    }
}
