//! Minimal Linux base.

use dockyard_common::constants::DEFAULT_ALPINE_VERSION;
use dockyard_common::types::{ImageRef, PackageSpec};
use dockyard_core::composition::Composition;
use dockyard_core::operation::split_command;
use serde::{Deserialize, Serialize};

/// Options for [`alpine`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlpineOpts {
    /// Alpine release; empty selects [`DEFAULT_ALPINE_VERSION`].
    pub version: String,
    /// Packages installed in order, one command each.
    pub packages: Vec<PackageSpec>,
}

/// Starts from `alpine:<version>`, refreshes the package index, then
/// installs each package with its own command so that adding a package
/// keeps the earlier steps cacheable.
#[must_use]
pub fn alpine(opts: &AlpineOpts) -> Composition {
    let version = crate::or_default(&opts.version, DEFAULT_ALPINE_VERSION);
    let base = Composition::base(ImageRef::new("alpine", version))
        .with_exec(split_command("apk update"));
    opts.packages.iter().fold(base, |c, pkg| {
        c.with_exec(["apk", "--no-cache", "add", "-U", pkg.atom().as_str()])
    })
}
