//! Domain primitive types used across the Dockyard workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{DockyardError, Result};

/// Target operating system of a build or publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Linux.
    Linux,
    /// macOS.
    Darwin,
    /// Windows.
    Windows,
}

impl Os {
    /// All operating systems known to the orchestrator.
    pub const ALL: [Self; 3] = [Self::Linux, Self::Darwin, Self::Windows];

    /// Returns the lowercase name used in paths and manifests.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }

    /// Maps a `std::env::consts::OS` value onto a known operating system.
    #[must_use]
    pub fn from_host(os: &str) -> Option<Self> {
        match os {
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::Darwin),
            "windows" => Some(Self::Windows),
            _ => None,
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Os {
    type Err = DockyardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|os| os.as_str() == s)
            .ok_or_else(|| DockyardError::Config {
                message: format!("unknown operating system: {s}"),
            })
    }
}

/// Target CPU architecture of a build or publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 64-bit x86.
    Amd64,
    /// 64-bit ARM.
    Arm64,
    /// 32-bit ARM (v7).
    Arm,
}

impl Arch {
    /// All architectures known to the orchestrator.
    pub const ALL: [Self; 3] = [Self::Amd64, Self::Arm64, Self::Arm];

    /// Returns the lowercase name used in paths and manifests.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
        }
    }

    /// Maps a `std::env::consts::ARCH` value onto a known architecture.
    #[must_use]
    pub fn from_host(arch: &str) -> Option<Self> {
        match arch {
            "x86_64" => Some(Self::Amd64),
            "aarch64" => Some(Self::Arm64),
            "arm" => Some(Self::Arm),
            _ => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = DockyardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|arch| arch.as_str() == s)
            .ok_or_else(|| DockyardError::Config {
                message: format!("unknown architecture: {s}"),
            })
    }
}

/// An (operating system, architecture) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system.
    pub os: Os,
    /// CPU architecture.
    pub arch: Arch,
}

impl Platform {
    /// Creates a platform from its parts.
    #[must_use]
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Returns the platform of the running process.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Config` if the host OS or architecture is not
    /// one the orchestrator knows about.
    pub fn host() -> Result<Self> {
        let os = Os::from_host(std::env::consts::OS).ok_or_else(|| DockyardError::Config {
            message: format!("unsupported host os: {}", std::env::consts::OS),
        })?;
        let arch =
            Arch::from_host(std::env::consts::ARCH).ok_or_else(|| DockyardError::Config {
                message: format!("unsupported host arch: {}", std::env::consts::ARCH),
            })?;
        Ok(Self { os, arch })
    }

    /// Returns the Rust target triple used to cross-compile for this platform.
    #[must_use]
    pub const fn rust_target(self) -> Option<&'static str> {
        match (self.os, self.arch) {
            (Os::Linux, Arch::Amd64) => Some("x86_64-unknown-linux-musl"),
            (Os::Linux, Arch::Arm64) => Some("aarch64-unknown-linux-musl"),
            (Os::Linux, Arch::Arm) => Some("armv7-unknown-linux-musleabihf"),
            (Os::Darwin, Arch::Amd64) => Some("x86_64-apple-darwin"),
            (Os::Darwin, Arch::Arm64) => Some("aarch64-apple-darwin"),
            (Os::Windows, Arch::Amd64) => Some("x86_64-pc-windows-gnu"),
            (Os::Windows, Arch::Arm64) => Some("aarch64-pc-windows-gnullvm"),
            (Os::Darwin | Os::Windows, Arch::Arm) => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = DockyardError;

    fn from_str(s: &str) -> Result<Self> {
        let (os, arch) = s.split_once('/').ok_or_else(|| DockyardError::Config {
            message: format!("platform must be <os>/<arch>, got: {s}"),
        })?;
        Ok(Self {
            os: os.parse()?,
            arch: arch.parse()?,
        })
    }
}

/// SHA-256 digest used for content addressing.
///
/// Always 64 lowercase hex characters; deserialization rejects anything
/// else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Creates a digest from a hex-encoded string, with or without the
    /// `sha256:` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        let hex = hex.strip_prefix("sha256:").map_or(hex.clone(), str::to_string);
        if hex.len() != crate::constants::SHA256_HEX_LENGTH
            || !hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(DockyardError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Computes the digest of a byte slice.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Finalizes a running SHA-256 computation into a digest.
    #[must_use]
    pub fn from_hasher(hasher: Sha256) -> Self {
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Returns the first twelve hex characters, for log output.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = DockyardError;

    fn try_from(hex: String) -> Result<Self> {
        Self::from_hex(hex)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// A `repository:tag` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Repository path, e.g. `library/alpine`.
    pub repository: String,
    /// Tag, e.g. `3.17.1`.
    pub tag: String,
}

impl ImageRef {
    /// Creates a reference from its parts.
    #[must_use]
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Parses `repository[:tag]`. A missing tag means `latest`.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Config` for an empty repository or tag.
    pub fn parse(reference: &str) -> Result<Self> {
        let last_segment = reference.rsplit('/').next().unwrap_or(reference);
        let (repository, tag) = if last_segment.contains(':') {
            reference
                .rsplit_once(':')
                .map_or((reference, crate::constants::DEFAULT_TAG), |(r, t)| (r, t))
        } else {
            (reference, crate::constants::DEFAULT_TAG)
        };
        if repository.is_empty() || tag.is_empty() {
            return Err(DockyardError::Config {
                message: format!("invalid image reference: {reference}"),
            });
        }
        Ok(Self::new(repository, tag))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl FromStr for ImageRef {
    type Err = DockyardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A package to install, optionally pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageSpec {
    /// Package name.
    pub name: String,
    /// Exact version, if pinned.
    #[serde(default)]
    pub version: Option<String>,
}

impl PackageSpec {
    /// Creates an unpinned package spec.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    /// Pins the package to a version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Renders the package as `name` or `name=version`, the form both
    /// `apk` and `apt-get` accept.
    #[must_use]
    pub fn atom(&self) -> String {
        match &self.version {
            Some(v) if !v.is_empty() => format!("{}={v}", self.name),
            _ => self.name.clone(),
        }
    }

    /// Builds unpinned specs from a list of names.
    #[must_use]
    pub fn from_names(names: &[&str]) -> Vec<Self> {
        names.iter().map(|n| Self::new(*n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_display_and_parse_agree() {
        let p = Platform::new(Os::Darwin, Arch::Arm64);
        assert_eq!(p.to_string(), "darwin/arm64");
        assert_eq!("darwin/arm64".parse::<Platform>().expect("parse"), p);
    }

    #[test]
    fn platform_parse_rejects_unknown_values() {
        assert!("plan9/amd64".parse::<Platform>().is_err());
        assert!("linux/mips".parse::<Platform>().is_err());
        assert!("linux".parse::<Platform>().is_err());
    }

    #[test]
    fn platform_host_is_known_on_test_hosts() {
        let host = Platform::host().expect("host platform");
        assert!(Os::ALL.contains(&host.os));
    }

    #[test]
    fn rust_target_covers_default_matrix() {
        for os in [Os::Linux, Os::Darwin] {
            for arch in [Arch::Amd64, Arch::Arm64] {
                assert!(Platform::new(os, arch).rust_target().is_some());
            }
        }
        assert!(Platform::new(Os::Darwin, Arch::Arm).rust_target().is_none());
    }

    #[test]
    fn digest_from_hex_accepts_prefixed_form() {
        let d = Digest::of_bytes(b"hello");
        let parsed = Digest::from_hex(d.to_string()).expect("parse");
        assert_eq!(parsed, d);
        assert_eq!(d.short().len(), 12);
    }

    #[test]
    fn digest_from_hex_rejects_short_strings() {
        assert!(Digest::from_hex("abc").is_err());
    }

    #[test]
    fn digest_deserialization_rejects_malformed_hex() {
        assert!(serde_json::from_str::<Digest>(r#""abc""#).is_err());
        assert!(serde_json::from_str::<Digest>(&format!("\"{}\"", "z".repeat(64))).is_err());

        let d = Digest::of_bytes(b"state");
        let json = serde_json::to_string(&d).expect("json");
        assert_eq!(json, format!("\"{}\"", d.as_hex()));
        assert_eq!(serde_json::from_str::<Digest>(&json).expect("parse"), d);
    }

    #[test]
    fn digest_of_bytes_is_known_value() {
        assert_eq!(
            Digest::of_bytes(b"").as_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn image_ref_parses_tag() {
        let r = ImageRef::parse("alpine:3.17.1").expect("parse");
        assert_eq!(r.repository, "alpine");
        assert_eq!(r.tag, "3.17.1");
    }

    #[test]
    fn image_ref_defaults_to_latest() {
        let r = ImageRef::parse("dockyard/calc").expect("parse");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn image_ref_with_registry_port_keeps_repository() {
        let r = ImageRef::parse("localhost:5000/calc").expect("parse");
        assert_eq!(r.repository, "localhost:5000/calc");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn package_atom_includes_version_when_pinned() {
        assert_eq!(PackageSpec::new("bash").atom(), "bash");
        assert_eq!(PackageSpec::new("curl").with_version("7.88").atom(), "curl=7.88");
    }
}
