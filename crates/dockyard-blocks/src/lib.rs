//! # dockyard-blocks
//!
//! Reusable image recipes. Every block is a function from an option struct
//! to a [`Composition`](dockyard_core::composition::Composition); nothing
//! is resolved until a client asks for it.
//!
//! - [`alpine`]: minimal Linux base with `apk` packages.
//! - [`debian`]: platform-aware Debian base with `apt-get` packages.
//! - [`docker`]: a base that can drive the host docker daemon.
//! - [`binary`]: the compile-one-binary-per-platform pattern.
//! - [`engine_cli`]: a container-capable base with the engine CLI installed.
//! - [`ansible`]: configuration-management tooling on top of Alpine.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod alpine;
pub mod ansible;
pub mod binary;
pub mod debian;
pub mod docker;
pub mod engine_cli;

/// Returns `version`, or `default` when it is empty.
pub(crate) fn or_default<'a>(version: &'a str, default: &'a str) -> &'a str {
    if version.is_empty() { default } else { version }
}
