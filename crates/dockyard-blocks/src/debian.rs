//! Platform-aware Debian base.

use dockyard_common::constants::DEFAULT_DEBIAN_VERSION;
use dockyard_common::error::Result;
use dockyard_common::types::{ImageRef, PackageSpec, Platform};
use dockyard_core::composition::Composition;
use dockyard_core::operation::split_command;
use serde::{Deserialize, Serialize};

/// Options for [`debian`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebianOpts {
    /// Platform to select the image for; `None` selects the host's.
    pub platform: Option<Platform>,
    /// Debian release; empty selects [`DEFAULT_DEBIAN_VERSION`].
    pub version: String,
    /// Packages installed in order, one command each.
    pub packages: Vec<PackageSpec>,
}

impl DebianOpts {
    /// Options with the given packages and every other field defaulted.
    #[must_use]
    pub fn with_packages(names: &[&str]) -> Self {
        Self {
            packages: PackageSpec::from_names(names),
            ..Self::default()
        }
    }
}

/// Starts from `debian:<version>` for the requested platform, refreshes
/// the package index, then installs each package without recommends.
///
/// # Errors
///
/// Returns `DockyardError::Config` if no platform is given and the host
/// platform is not a supported target.
pub fn debian(opts: &DebianOpts) -> Result<Composition> {
    let platform = match opts.platform {
        Some(p) => p,
        None => Platform::host()?,
    };
    let version = crate::or_default(&opts.version, DEFAULT_DEBIAN_VERSION);
    let base = Composition::base_for(ImageRef::new("debian", version), platform)
        .with_exec(split_command("apt-get update"));
    Ok(opts.packages.iter().fold(base, |c, pkg| {
        c.with_exec([
            "apt-get",
            "-y",
            "install",
            "--no-install-recommends",
            pkg.atom().as_str(),
        ])
    }))
}
