//! Deployment manifest
//!
//! A JSON file naming the deployments the daemon manages, plus the image
//! metadata it may hand out when a deployment asks for an image:
//!
//! ```json
//! {
//!   "images": [
//!     { "image": "db:3.11", "image_id": "sha256:...", "version": "3.11.4" }
//!   ],
//!   "deployments": [
//!     { "name": "orders", "spec": { "mode": "Cluster", "image": "db:3.11" } }
//!   ]
//! }
//! ```

use crate::error::{DaemonError, DaemonResult};
use dbop_reconcile::{DeploymentStore, StoreError};
use dbop_types::{Deployment, DeploymentId, DeploymentSpec, ImageInfo, ImageList};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// One managed deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDeployment {
    pub name: String,
    pub spec: DeploymentSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Known image metadata
    #[serde(default)]
    pub images: Vec<ImageInfo>,

    #[serde(default)]
    pub deployments: Vec<ManifestDeployment>,
}

impl Manifest {
    pub fn from_json(json: &str) -> DaemonResult<Self> {
        let manifest: Manifest = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> DaemonResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| DaemonError::Manifest(format!("{}: {e}", path.display())))
    }

    fn validate(&self) -> DaemonResult<()> {
        let mut names = std::collections::HashSet::new();
        for deployment in &self.deployments {
            if deployment.name.is_empty() {
                return Err(DaemonError::Manifest("deployment without a name".into()));
            }
            if !names.insert(deployment.name.as_str()) {
                return Err(DaemonError::Manifest(format!(
                    "deployment {} listed twice",
                    deployment.name
                )));
            }
        }
        Ok(())
    }

    /// The images as a catalog.
    pub fn catalog(&self) -> ImageList {
        let mut catalog = ImageList::new();
        for image in &self.images {
            catalog.add_or_update(image.clone());
        }
        catalog
    }

    /// Store every deployment not already present by name.
    ///
    /// Each new deployment starts out knowing the metadata of its spec image,
    /// if the manifest has it.
    pub async fn seed(&self, store: &dyn DeploymentStore) -> DaemonResult<Vec<DeploymentId>> {
        let existing: Vec<String> = store.list().await?.into_iter().map(|d| d.name).collect();
        let catalog = self.catalog();

        let mut seeded = Vec::new();
        for entry in &self.deployments {
            if existing.contains(&entry.name) {
                continue;
            }
            let mut deployment = Deployment::new(entry.name.clone(), entry.spec.clone());
            if let Some(info) = catalog.get_by_image(&entry.spec.image) {
                deployment.status.images.add_or_update(info.clone());
            }
            let id = deployment.id.clone();
            match store.create(deployment).await {
                Ok(()) => {}
                Err(StoreError::AlreadyExists(_)) => continue,
                Err(e) => return Err(e.into()),
            }
            info!(
                deployment_id = %id,
                name = %entry.name,
                mode = ?entry.spec.mode,
                "Deployment seeded"
            );
            seeded.push(id);
        }
        Ok(seeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbop_reconcile::InMemoryDeploymentStore;
    use dbop_types::DeploymentMode;

    const MANIFEST: &str = r#"{
        "images": [
            { "image": "db:3.11", "image_id": "sha256:bbbb", "version": "3.11.4", "enterprise": false }
        ],
        "deployments": [
            { "name": "orders", "spec": { "mode": "Cluster", "image": "db:3.11" } },
            { "name": "cache", "spec": { "mode": "Single", "image": "db:3.12" } }
        ]
    }"#;

    #[test]
    fn test_parse() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        assert_eq!(manifest.deployments.len(), 2);
        assert_eq!(manifest.deployments[0].spec.mode, DeploymentMode::Cluster);
        assert_eq!(
            manifest.catalog().get_by_image("db:3.11").unwrap().version,
            semver::Version::new(3, 11, 4)
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let json = r#"{ "deployments": [
            { "name": "a", "spec": { "image": "db:3.11" } },
            { "name": "a", "spec": { "image": "db:3.12" } }
        ] }"#;
        assert!(matches!(
            Manifest::from_json(json),
            Err(DaemonError::Manifest(_))
        ));
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let store = InMemoryDeploymentStore::new();

        let seeded = manifest.seed(&store).await.unwrap();
        assert_eq!(seeded.len(), 2);
        assert!(manifest.seed(&store).await.unwrap().is_empty());

        let deployments = store.list().await.unwrap();
        let orders = deployments.iter().find(|d| d.name == "orders").unwrap();
        assert_eq!(orders.status.images.len(), 1);
        let cache = deployments.iter().find(|d| d.name == "cache").unwrap();
        assert!(cache.status.images.is_empty());
    }
}
