//! Image metadata discovered for image references

use serde::{Deserialize, Serialize};

/// Resolved metadata of a container image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Image reference as written in the spec
    pub image: String,

    /// Resolved immutable image ID
    pub image_id: String,

    /// Database version shipped in the image
    pub version: semver::Version,

    /// Whether the image is an enterprise build
    #[serde(default)]
    pub enterprise: bool,
}

/// Images whose metadata has been discovered so far
///
/// Populated asynchronously by an external image inspector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageList(Vec<ImageInfo>);

impl ImageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_by_image(&self, image: &str) -> Option<&ImageInfo> {
        self.0.iter().find(|i| i.image == image)
    }

    /// Add or replace the metadata for an image reference.
    pub fn add_or_update(&mut self, info: ImageInfo) {
        match self.0.iter_mut().find(|i| i.image == info.image) {
            Some(existing) => *existing = info,
            None => self.0.push(info),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(image: &str, id: &str) -> ImageInfo {
        ImageInfo {
            image: image.into(),
            image_id: id.into(),
            version: semver::Version::new(3, 10, 0),
            enterprise: false,
        }
    }

    #[test]
    fn test_add_or_update_replaces() {
        let mut list = ImageList::new();
        list.add_or_update(info("db:3.10", "sha256:a"));
        list.add_or_update(info("db:3.10", "sha256:b"));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get_by_image("db:3.10").unwrap().image_id, "sha256:b");
        assert!(list.get_by_image("db:3.11").is_none());
    }
}
