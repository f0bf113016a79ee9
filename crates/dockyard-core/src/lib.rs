//! # dockyard-core
//!
//! The composition engine of Dockyard.
//!
//! A [`Composition`](composition::Composition) describes everything needed
//! to derive a container or directory as an immutable chain of
//! [`Operation`](operation::Operation)s. Building a composition never talks
//! to an engine; only the [`Client`](client::Client) resolves it, through an
//! [`Engine`](engine::Engine) implementation.
//!
//! # Example
//!
//! ```rust
//! use dockyard_core::composition::Composition;
//!
//! let base = Composition::from_image("alpine:3.17.1").expect("valid reference");
//! let updated = base.with_exec(["apk", "update"]);
//! let with_curl = updated.with_exec(["apk", "add", "curl"]);
//! let with_git = updated.with_exec(["apk", "add", "git"]);
//!
//! // Both branches share the same two-operation prefix.
//! assert_eq!(with_curl.parent(), with_git.parent());
//! assert_ne!(with_curl, with_git);
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cancel;
pub mod client;
pub mod composition;
pub mod engine;
pub mod operation;
pub mod source;
pub mod variant;
