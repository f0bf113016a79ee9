//! Local base-image catalog.
//!
//! Maps image references such as `alpine:3.17.1` to the source their root
//! filesystem is loaded from. An entry may be restricted to one platform;
//! lookups prefer a platform-specific entry over a generic one.

use std::path::{Path, PathBuf};

use dockyard_common::error::{DockyardError, Result};
use dockyard_common::types::{ImageRef, Platform};
use serde::{Deserialize, Serialize};

use crate::source::{ImageSource, resolve_source};

/// Entry in the image catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Image reference, `repository:tag`.
    pub name: String,
    /// Source URI the root filesystem is loaded from.
    pub source: String,
    /// Expected SHA-256 of a remote archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Platform this entry is restricted to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Registration timestamp (RFC 3339).
    pub created_at: String,
}

impl ImageEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(image: &ImageRef, source: impl Into<String>) -> Self {
        Self {
            name: image.to_string(),
            source: source.into(),
            sha256: None,
            platform: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Pins the digest of a remote archive.
    #[must_use]
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    /// Restricts the entry to one platform.
    #[must_use]
    pub const fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Parses the entry's source URI.
    ///
    /// # Errors
    ///
    /// See [`resolve_source`].
    pub fn image_source(&self) -> Result<ImageSource> {
        resolve_source(&self.source, self.sha256.as_deref())
    }
}

/// Image catalog backed by a JSON file.
#[derive(Debug)]
pub struct ImageCatalog {
    catalog_path: PathBuf,
}

impl ImageCatalog {
    /// Opens or creates an image catalog under the given data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog directory cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let catalog_path = data_dir.join("images").join("catalog.json");
        if let Some(parent) = catalog_path.parent() {
            crate::tree::create_dir(parent)?;
        }
        Ok(Self { catalog_path })
    }

    /// Lists all images in the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be read or parsed.
    pub fn list(&self) -> Result<Vec<ImageEntry>> {
        if !self.catalog_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.catalog_path)
            .map_err(|e| DockyardError::io(&self.catalog_path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Registers an image, replacing any entry with the same name and
    /// platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is malformed or the catalog cannot be
    /// written.
    pub fn register(&self, entry: ImageEntry) -> Result<()> {
        let _ = ImageRef::parse(&entry.name)?;
        let _ = entry.image_source()?;
        let mut entries = self.list()?;
        entries.retain(|e| !(e.name == entry.name && e.platform == entry.platform));
        tracing::info!(image = %entry.name, source = %entry.source, "registering base image");
        entries.push(entry);
        self.write_entries(&entries)
    }

    /// Removes every entry registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::NotFound` if no entry has that name.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut entries = self.list()?;
        let before = entries.len();
        entries.retain(|e| e.name != name);
        if entries.len() == before {
            return Err(DockyardError::NotFound {
                kind: "image",
                id: name.to_string(),
            });
        }
        self.write_entries(&entries)
    }

    /// Finds the entry for `image`, preferring one registered for
    /// `platform`.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::NotFound` if the catalog has no usable entry.
    pub fn find(&self, image: &ImageRef, platform: Option<Platform>) -> Result<ImageEntry> {
        let name = image.to_string();
        let entries = self.list()?;
        let mut generic = None;
        for entry in entries.into_iter().filter(|e| e.name == name) {
            match (entry.platform, platform) {
                (Some(p), Some(wanted)) if p == wanted => return Ok(entry),
                (None, _) => generic = Some(entry),
                _ => {}
            }
        }
        generic.ok_or_else(|| DockyardError::NotFound {
            kind: "image",
            id: platform.map_or_else(|| name.clone(), |p| format!("{name} ({p})")),
        })
    }

    fn write_entries(&self, entries: &[ImageEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.catalog_path, json)
            .map_err(|e| DockyardError::io(&self.catalog_path, e))
    }
}
