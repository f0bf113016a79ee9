//! Per-platform variant sets and the published reference they produce.

use std::collections::HashSet;
use std::fmt;

use dockyard_common::error::{DockyardError, Result};
use dockyard_common::types::{Digest, ImageRef, Platform};

/// An ordered, non-empty collection of per-platform entries with pairwise
/// distinct platforms.
///
/// The invariants are checked on construction, so a value of this type can
/// be handed to an engine without further validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformVariantSet<T> {
    entries: Vec<(Platform, T)>,
}

impl<T> PlatformVariantSet<T> {
    /// Validates and wraps the given entries.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Assembly` if `entries` is empty or names a
    /// platform twice.
    pub fn new(entries: Vec<(Platform, T)>) -> Result<Self> {
        check_platforms(entries.iter().map(|(p, _)| *p))?;
        Ok(Self { entries })
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[(Platform, T)] {
        &self.entries
    }

    /// Platforms in insertion order.
    #[must_use]
    pub fn platforms(&self) -> Vec<Platform> {
        self.entries.iter().map(|(p, _)| *p).collect()
    }

    /// Number of variants; never zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Looks up the entry for `platform`.
    #[must_use]
    pub fn get(&self, platform: Platform) -> Option<&T> {
        self.entries
            .iter()
            .find(|(p, _)| *p == platform)
            .map(|(_, v)| v)
    }

    /// Replaces every entry's value, keeping order and platforms.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn try_map<U, F>(self, mut f: F) -> Result<PlatformVariantSet<U>>
    where
        F: FnMut(Platform, T) -> Result<U>,
    {
        let entries = self
            .entries
            .into_iter()
            .map(|(p, v)| f(p, v).map(|u| (p, u)))
            .collect::<Result<Vec<_>>>()?;
        Ok(PlatformVariantSet { entries })
    }
}

/// Checks a platform list for the publish preconditions: at least one
/// entry and no duplicates.
///
/// # Errors
///
/// Returns `DockyardError::Assembly` describing the violated precondition.
pub fn check_platforms(platforms: impl IntoIterator<Item = Platform>) -> Result<()> {
    let mut seen = HashSet::new();
    for platform in platforms {
        if !seen.insert(platform) {
            return Err(DockyardError::assembly(format!(
                "duplicate platform variant: {platform}"
            )));
        }
    }
    if seen.is_empty() {
        return Err(DockyardError::assembly("no platform variants to publish"));
    }
    Ok(())
}

/// The terminal output of a publish: where it went and what it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedReference {
    /// Repository and tag published to.
    pub reference: ImageRef,
    /// Digest of the multi-platform index.
    pub digest: Digest,
    /// Platforms the index resolves.
    pub platforms: Vec<Platform>,
}

impl fmt::Display for PublishedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.reference, self.digest)
    }
}

#[cfg(test)]
mod tests {
    use dockyard_common::types::{Arch, Os};

    use super::*;

    const LINUX_AMD64: Platform = Platform::new(Os::Linux, Arch::Amd64);
    const LINUX_ARM64: Platform = Platform::new(Os::Linux, Arch::Arm64);

    #[test]
    fn empty_set_is_rejected() {
        let err = PlatformVariantSet::<()>::new(Vec::new()).unwrap_err();
        assert!(err.is_assembly());
    }

    #[test]
    fn duplicate_platform_is_rejected() {
        let err = PlatformVariantSet::new(vec![(LINUX_AMD64, 1), (LINUX_AMD64, 2)]).unwrap_err();
        assert!(err.is_assembly());
        assert!(err.to_string().contains("linux/amd64"));
    }

    #[test]
    fn valid_set_preserves_order() {
        let set = PlatformVariantSet::new(vec![(LINUX_ARM64, "b"), (LINUX_AMD64, "a")])
            .expect("valid set");
        assert_eq!(set.platforms(), vec![LINUX_ARM64, LINUX_AMD64]);
        assert_eq!(set.get(LINUX_AMD64), Some(&"a"));
    }

    #[test]
    fn try_map_stops_at_first_error() {
        let set = PlatformVariantSet::new(vec![(LINUX_AMD64, 1), (LINUX_ARM64, 2)])
            .expect("valid set");
        let mut calls = 0;
        let result = set.try_map(|_, _| {
            calls += 1;
            Err::<(), _>(DockyardError::execution("exec", "boom"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn published_reference_displays_digest() {
        let published = PublishedReference {
            reference: ImageRef::new("dockyard/calc", "latest"),
            digest: Digest::of_bytes(b""),
            platforms: vec![LINUX_AMD64],
        };
        assert!(
            published
                .to_string()
                .starts_with("dockyard/calc:latest@sha256:e3b0c442")
        );
    }
}
