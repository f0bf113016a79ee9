//! Content-addressed image registry with multi-platform indexes.
//!
//! Layout under `registry/`:
//! - `blobs/sha256/<hex>`: layers, configs, manifests, and indexes;
//! - `refs/<repository>/<tag>`: the digest of the index a tag points at.
//!
//! Documents follow the OCI image-spec shapes so that every platform of a
//! published reference resolves to its own manifest.

use std::path::{Path, PathBuf};

use dockyard_common::error::{DockyardError, Result};
use dockyard_common::types::{Digest, ImageRef, Platform};
use dockyard_core::engine::Artifact;
use dockyard_core::variant::PlatformVariantSet;
use serde::{Deserialize, Serialize};

/// Media type of an image index.
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
/// Media type of an image manifest.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// Media type of an image config.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
/// Media type of a gzip-compressed layer.
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Platform of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSpec {
    /// Operating system.
    pub os: String,
    /// CPU architecture.
    pub architecture: String,
}

impl From<Platform> for PlatformSpec {
    fn from(p: Platform) -> Self {
        Self {
            os: p.os.to_string(),
            architecture: p.arch.to_string(),
        }
    }
}

/// Reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced blob.
    pub media_type: String,
    /// `sha256:<hex>` digest of the blob.
    pub digest: String,
    /// Size in bytes.
    pub size: u64,
    /// Platform, for index entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformSpec>,
}

/// Runtime settings recorded in an image config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeConfig {
    /// `KEY=value` environment entries.
    pub env: Vec<String>,
    /// Working directory.
    pub working_dir: String,
}

/// Layer list of an image config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    /// Always `layers`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Uncompressed layer digests, bottom first.
    pub diff_ids: Vec<String>,
}

/// Image config document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// CPU architecture.
    pub architecture: String,
    /// Operating system.
    pub os: String,
    /// Runtime settings.
    pub config: RuntimeConfig,
    /// Layer list.
    pub rootfs: RootFs,
}

/// Image manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Always 2.
    pub schema_version: u32,
    /// [`MANIFEST_MEDIA_TYPE`].
    pub media_type: String,
    /// The image config.
    pub config: Descriptor,
    /// Layers, bottom first.
    pub layers: Vec<Descriptor>,
}

/// Multi-platform image index document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    /// Always 2.
    pub schema_version: u32,
    /// [`INDEX_MEDIA_TYPE`].
    pub media_type: String,
    /// One manifest per platform.
    pub manifests: Vec<Descriptor>,
}

impl ImageIndex {
    /// Finds the manifest descriptor for `platform`.
    #[must_use]
    pub fn manifest_for(&self, platform: Platform) -> Option<&Descriptor> {
        let wanted = PlatformSpec::from(platform);
        self.manifests
            .iter()
            .find(|m| m.platform.as_ref() == Some(&wanted))
    }
}

/// Handle on the local registry.
#[derive(Debug)]
pub struct Registry {
    root: PathBuf,
}

impl Registry {
    /// Opens the registry under a data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let root = data_dir.join("registry");
        crate::tree::create_dir(&root.join("blobs").join("sha256"))?;
        crate::tree::create_dir(&root.join("refs"))?;
        Ok(Self { root })
    }

    /// Path of the blob with the given digest.
    #[must_use]
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join("blobs").join("sha256").join(digest.as_hex())
    }

    fn ref_path(&self, reference: &ImageRef) -> PathBuf {
        let mut path = self.root.join("refs");
        for segment in reference.repository.split('/') {
            path.push(segment);
        }
        path.join(&reference.tag)
    }

    /// Stores a blob and returns its descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be written.
    pub fn write_blob(&self, media_type: &str, bytes: &[u8]) -> Result<Descriptor> {
        let digest = Digest::of_bytes(bytes);
        let path = self.blob_path(&digest);
        if !path.exists() {
            let tmp = path.with_extension(uuid::Uuid::new_v4().to_string());
            std::fs::write(&tmp, bytes).map_err(|e| DockyardError::io(&tmp, e))?;
            std::fs::rename(&tmp, &path).map_err(|e| DockyardError::io(&path, e))?;
        }
        Ok(Descriptor {
            media_type: media_type.to_string(),
            digest: digest.to_string(),
            size: bytes.len() as u64,
            platform: None,
        })
    }

    /// Reads and parses a JSON blob.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::NotFound` if the blob is absent.
    pub fn read_json<T: serde::de::DeserializeOwned>(&self, digest: &Digest) -> Result<T> {
        let path = self.blob_path(digest);
        let bytes = std::fs::read(&path).map_err(|_| DockyardError::NotFound {
            kind: "blob",
            id: digest.to_string(),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Packs and stores one variant, returning its manifest descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the root filesystem cannot be packed or stored.
    pub fn push_variant(&self, platform: Platform, artifact: &Artifact) -> Result<Descriptor> {
        let layer = crate::layer::pack_layer(&artifact.rootfs)?;
        let layer_desc = self.write_blob(LAYER_MEDIA_TYPE, &layer.bytes)?;

        let config = ImageConfig {
            architecture: platform.arch.to_string(),
            os: platform.os.to_string(),
            config: RuntimeConfig {
                env: artifact.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
                working_dir: artifact.workdir.clone(),
            },
            rootfs: RootFs {
                kind: "layers".into(),
                diff_ids: vec![layer.diff_id.to_string()],
            },
        };
        let config_desc = self.write_blob(CONFIG_MEDIA_TYPE, &serde_json::to_vec(&config)?)?;

        let manifest = Manifest {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.into(),
            config: config_desc,
            layers: vec![layer_desc],
        };
        let mut desc = self.write_blob(MANIFEST_MEDIA_TYPE, &serde_json::to_vec(&manifest)?)?;
        desc.platform = Some(platform.into());
        tracing::debug!(platform = %platform, manifest = %desc.digest, "variant stored");
        Ok(desc)
    }

    /// Publishes every variant under one reference and returns the index
    /// digest.
    ///
    /// # Errors
    ///
    /// Returns an error if any variant cannot be stored.
    pub fn publish(
        &self,
        reference: &ImageRef,
        variants: &PlatformVariantSet<Artifact>,
    ) -> Result<Digest> {
        let manifests = variants
            .entries()
            .iter()
            .map(|(platform, artifact)| self.push_variant(*platform, artifact))
            .collect::<Result<Vec<_>>>()?;
        let index = ImageIndex {
            schema_version: 2,
            media_type: INDEX_MEDIA_TYPE.into(),
            manifests,
        };
        let desc = self.write_blob(INDEX_MEDIA_TYPE, &serde_json::to_vec(&index)?)?;
        let digest = Digest::from_hex(desc.digest)?;

        let ref_path = self.ref_path(reference);
        if let Some(parent) = ref_path.parent() {
            crate::tree::create_dir(parent)?;
        }
        std::fs::write(&ref_path, digest.to_string())
            .map_err(|e| DockyardError::io(&ref_path, e))?;
        tracing::info!(reference = %reference, digest = %digest, "image index published");
        Ok(digest)
    }

    /// Returns the index digest a tag points at.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::NotFound` if the tag was never published.
    pub fn resolve(&self, reference: &ImageRef) -> Result<Digest> {
        let path = self.ref_path(reference);
        let content = std::fs::read_to_string(&path).map_err(|_| DockyardError::NotFound {
            kind: "reference",
            id: reference.to_string(),
        })?;
        Digest::from_hex(content.trim())
    }

    /// Reads the image index with the given digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is absent or malformed.
    pub fn index(&self, digest: &Digest) -> Result<ImageIndex> {
        self.read_json(digest)
    }
}

#[cfg(test)]
mod tests {
    use dockyard_common::types::{Arch, Os};

    use super::*;

    fn artifact(rootfs: &Path, tag: &[u8]) -> Artifact {
        std::fs::create_dir_all(rootfs).expect("mkdir");
        std::fs::write(rootfs.join("calc"), tag).expect("write");
        Artifact {
            digest: Digest::of_bytes(tag),
            content: Digest::of_bytes(tag),
            rootfs: rootfs.to_path_buf(),
            platform: None,
            env: Vec::new(),
            workdir: "/".into(),
            mounts: Vec::new(),
            stdout: String::new(),
        }
    }

    #[test]
    fn publish_writes_one_manifest_per_platform() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::open(dir.path()).expect("open");
        let amd = Platform::new(Os::Linux, Arch::Amd64);
        let arm = Platform::new(Os::Linux, Arch::Arm64);
        let variants = PlatformVariantSet::new(vec![
            (amd, artifact(&dir.path().join("a"), b"amd64")),
            (arm, artifact(&dir.path().join("b"), b"arm64")),
        ])
        .expect("variants");
        let reference = ImageRef::new("dockyard/calc", "latest");

        let digest = registry.publish(&reference, &variants).expect("publish");
        assert_eq!(registry.resolve(&reference).expect("resolve"), digest);

        let index = registry.index(&digest).expect("index");
        assert_eq!(index.manifests.len(), 2);
        let manifest_digest =
            Digest::from_hex(index.manifest_for(arm).expect("arm64 entry").digest.clone())
                .expect("digest");
        let manifest: Manifest = registry.read_json(&manifest_digest).expect("manifest");
        assert_eq!(manifest.layers.len(), 1);
        assert!(index.manifest_for(Platform::new(Os::Darwin, Arch::Arm64)).is_none());
    }

    #[test]
    fn publish_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::open(dir.path()).expect("open");
        let amd = Platform::new(Os::Linux, Arch::Amd64);
        let variants =
            PlatformVariantSet::new(vec![(amd, artifact(&dir.path().join("a"), b"same"))])
                .expect("variants");
        let reference = ImageRef::new("dockyard/calc", "v1");
        let first = registry.publish(&reference, &variants).expect("publish");
        let second = registry.publish(&reference, &variants).expect("publish again");
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_unknown_reference_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::open(dir.path()).expect("open");
        let err = registry
            .resolve(&ImageRef::new("nobody/nothing", "x"))
            .unwrap_err();
        assert!(matches!(err, DockyardError::NotFound { .. }));
    }
}
