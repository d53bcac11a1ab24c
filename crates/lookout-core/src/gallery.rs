//! Reference gallery: per-identity preprocessed reference images.
//!
//! Loaded once at startup from a declarative identity → image-path list and
//! never mutated afterwards, so it can be shared freely across workers.

use crate::preprocess;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryLoadError {
    #[error("failed to read reference image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("identity {0:?} has no reference images")]
    EmptyIdentity(String),
    #[error("identity {0:?} is configured more than once")]
    DuplicateIdentity(String),
}

/// Opaque label for a person the system can recognize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One configured gallery entry: an identity and its ordered image paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub identity: Identity,
    pub images: Vec<PathBuf>,
}

/// A preprocessed reference image belonging to exactly one identity.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    /// Where the image was loaded from (diagnostics and cache keys).
    pub source: PathBuf,
    pub image: RgbImage,
}

impl ReferenceImage {
    /// Decode and preprocess a reference image from disk.
    pub fn load(path: &Path) -> Result<Self, GalleryLoadError> {
        let decoded = image::open(path).map_err(|source| GalleryLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            source: path.to_path_buf(),
            image: preprocess::preprocess_reference(&decoded),
        })
    }
}

#[derive(Debug)]
struct GalleryEntry {
    identity: Identity,
    images: Vec<ReferenceImage>,
}

/// Read-only mapping from identity to its ordered reference images.
///
/// Enumeration order is the configured order and decides first-match ties.
#[derive(Debug, Default)]
pub struct ReferenceGallery {
    entries: Vec<GalleryEntry>,
}

impl ReferenceGallery {
    /// Load every configured reference image.
    ///
    /// Any unreadable or undecodable path fails the whole load: the gallery
    /// must guarantee each identity has at least one usable image.
    pub fn load(config: &[IdentityConfig]) -> Result<Self, GalleryLoadError> {
        let mut entries = Vec::with_capacity(config.len());
        for item in config {
            let images = item
                .images
                .iter()
                .map(|path| ReferenceImage::load(path))
                .collect::<Result<Vec<_>, _>>()?;
            tracing::info!(
                identity = %item.identity,
                images = images.len(),
                "loaded reference images"
            );
            entries.push((item.identity.clone(), images));
        }
        Self::from_entries(entries)
    }

    /// Build a gallery from already-prepared reference images.
    pub fn from_entries(
        entries: Vec<(Identity, Vec<ReferenceImage>)>,
    ) -> Result<Self, GalleryLoadError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(entries.len());
        for (identity, images) in entries {
            if images.is_empty() {
                return Err(GalleryLoadError::EmptyIdentity(identity.0));
            }
            if !seen.insert(identity.clone()) {
                return Err(GalleryLoadError::DuplicateIdentity(identity.0));
            }
            out.push(GalleryEntry { identity, images });
        }
        Ok(Self { entries: out })
    }

    /// Stable enumeration of (identity, reference images) in configured order.
    pub fn entries(&self) -> impl Iterator<Item = (&Identity, &[ReferenceImage])> + '_ {
        self.entries
            .iter()
            .map(|e| (&e.identity, e.images.as_slice()))
    }

    /// Identity at position `index` in enumeration order.
    pub fn identity(&self, index: usize) -> Option<&Identity> {
        self.entries.get(index).map(|e| &e.identity)
    }

    /// Identities in enumeration order.
    pub fn identities(&self) -> Vec<Identity> {
        self.entries.iter().map(|e| e.identity.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of reference images across all identities.
    pub fn image_count(&self) -> usize {
        self.entries.iter().map(|e| e.images.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, shade: u8) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(32, 24, image::Rgb([shade, shade, shade]))
            .save(&path)
            .unwrap();
        path
    }

    fn blank(name: &str) -> ReferenceImage {
        ReferenceImage {
            source: PathBuf::from(name),
            image: RgbImage::new(1, 1),
        }
    }

    #[test]
    fn test_load_enumerates_configured_images_in_order() {
        let tmp = TempDir::new().unwrap();
        let a1 = write_png(tmp.path(), "alen1.png", 10);
        let a2 = write_png(tmp.path(), "alen2.png", 20);
        let e1 = write_png(tmp.path(), "emil1.png", 30);

        let config = vec![
            IdentityConfig {
                identity: Identity::new("Alen"),
                images: vec![a1.clone(), a2.clone()],
            },
            IdentityConfig {
                identity: Identity::new("Emil"),
                images: vec![e1.clone()],
            },
        ];

        let gallery = ReferenceGallery::load(&config).unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.image_count(), 3);

        let first: Vec<(String, Vec<PathBuf>)> = gallery
            .entries()
            .map(|(id, imgs)| {
                (
                    id.to_string(),
                    imgs.iter().map(|i| i.source.clone()).collect(),
                )
            })
            .collect();
        assert_eq!(
            first,
            vec![
                ("Alen".to_string(), vec![a1, a2]),
                ("Emil".to_string(), vec![e1]),
            ]
        );

        let second: Vec<(String, Vec<PathBuf>)> = gallery
            .entries()
            .map(|(id, imgs)| {
                (
                    id.to_string(),
                    imgs.iter().map(|i| i.source.clone()).collect(),
                )
            })
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_loaded_images_are_preprocessed() {
        let tmp = TempDir::new().unwrap();
        let path = write_png(tmp.path(), "ref.png", 50);
        let img = ReferenceImage::load(&path).unwrap();
        assert_eq!(
            img.image.dimensions(),
            (preprocess::PREPROCESS_SIZE, preprocess::PREPROCESS_SIZE)
        );
    }

    #[test]
    fn test_load_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let config = vec![IdentityConfig {
            identity: Identity::new("Ghost"),
            images: vec![tmp.path().join("missing.png")],
        }];
        assert!(matches!(
            ReferenceGallery::load(&config),
            Err(GalleryLoadError::Read { .. })
        ));
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("corrupt.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        let config = vec![IdentityConfig {
            identity: Identity::new("Broken"),
            images: vec![path],
        }];
        assert!(matches!(
            ReferenceGallery::load(&config),
            Err(GalleryLoadError::Read { .. })
        ));
    }

    #[test]
    fn test_identity_without_images_rejected() {
        let result = ReferenceGallery::from_entries(vec![(Identity::new("Nobody"), vec![])]);
        assert!(matches!(result, Err(GalleryLoadError::EmptyIdentity(name)) if name == "Nobody"));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let result = ReferenceGallery::from_entries(vec![
            (Identity::new("Amel"), vec![blank("a")]),
            (Identity::new("Amel"), vec![blank("b")]),
        ]);
        assert!(matches!(result, Err(GalleryLoadError::DuplicateIdentity(_))));
    }

    #[test]
    fn test_empty_gallery_is_legal() {
        let gallery = ReferenceGallery::load(&[]).unwrap();
        assert!(gallery.is_empty());
        assert_eq!(gallery.entries().count(), 0);
    }
}
