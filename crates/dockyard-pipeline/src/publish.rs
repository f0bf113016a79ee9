//! Multi-platform publishing.

use dockyard_common::constants::PUBLISH_OUTPUT_DIR;
use dockyard_common::error::Result;
use dockyard_common::types::{ImageRef, Platform};
use dockyard_core::client::Client;
use dockyard_core::composition::Composition;
use dockyard_core::variant::{PlatformVariantSet, PublishedReference, check_platforms};

use crate::matrix::{BuildRecipe, resolve_all};

/// Builds one runtime image per platform and publishes them under a
/// single reference.
#[derive(Debug, Clone)]
pub struct PublishAssembler {
    recipe: BuildRecipe,
}

impl PublishAssembler {
    /// Creates an assembler that builds each platform with `recipe`.
    #[must_use]
    pub const fn new(recipe: BuildRecipe) -> Self {
        Self { recipe }
    }

    /// The runtime image for `platform`: a scratch filesystem holding
    /// exactly the build's output directory, tagged with the platform.
    #[must_use]
    pub fn variant(&self, platform: Platform) -> Composition {
        let build = self.recipe.build(platform, PUBLISH_OUTPUT_DIR);
        Composition::scratch_for(platform).with_directory("/", build.directory(PUBLISH_OUTPUT_DIR))
    }

    /// Validates `platforms`, builds every variant, and submits them as
    /// one publish.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Assembly` before contacting the engine if
    /// `platforms` is empty or repeats a platform. Otherwise returns the
    /// first variant's build error, in which case nothing is submitted, or
    /// the engine's publish error.
    pub async fn publish(
        &self,
        client: &Client,
        reference: &ImageRef,
        platforms: &[Platform],
    ) -> Result<PublishedReference> {
        check_platforms(platforms.iter().copied())?;
        let variants: Vec<(Platform, Composition)> =
            platforms.iter().map(|&p| (p, self.variant(p))).collect();
        let set = PlatformVariantSet::new(variants.clone())?;

        let _ = resolve_all(client, variants).await?;
        let published = client.publish(reference, &set).await?;
        tracing::info!(reference = %published, platforms = platforms.len(), "published");
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use dockyard_common::types::{Arch, Os};
    use dockyard_core::operation::{BaseImage, Operation};
    use dockyard_core::source::DirectorySource;

    use super::*;

    fn assembler() -> PublishAssembler {
        PublishAssembler::new(BuildRecipe::new(
            Composition::from_image("rust:1.86-alpine").expect("reference"),
            DirectorySource::host("/project"),
            vec!["make".into(), "{out}".into()],
        ))
    }

    #[test]
    fn variant_is_scratch_tagged_with_platform() {
        let platform = Platform::new(Os::Linux, Arch::Arm64);
        let variant = assembler().variant(platform);
        let ops = variant.operations();
        assert_eq!(variant.platform(), Some(platform));
        assert_eq!(
            ops[0],
            Operation::Base {
                image: BaseImage::Scratch,
                platform: Some(platform),
            }
        );
        let Operation::WithDirectory { path, source } = &ops[1] else {
            panic!("expected a directory copy, got {}", ops[1]);
        };
        assert_eq!(path, "/");
        let DirectorySource::Composition { composition, path } = source else {
            panic!("expected a composition source");
        };
        assert_eq!(path, PUBLISH_OUTPUT_DIR);
        assert_eq!(
            composition.operation().to_string(),
            "exec [make out/]"
        );
    }

    #[test]
    fn variants_differ_per_platform() {
        let assembler = assembler();
        assert_ne!(
            assembler.variant(Platform::new(Os::Linux, Arch::Amd64)),
            assembler.variant(Platform::new(Os::Linux, Arch::Arm64))
        );
    }
}
