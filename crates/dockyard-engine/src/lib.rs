//! # dockyard-engine
//!
//! A filesystem-backed implementation of the composition
//! [`Engine`](dockyard_core::engine::Engine).
//!
//! Handles:
//! - **Snapshots**: one content-addressed directory per realized chain node.
//! - **Catalog**: base images registered from `file://`, `tar://`, or
//!   verified `https://` sources.
//! - **Execution**: commands run against a snapshot's root filesystem with
//!   the chain's environment, working directory, and mounts.
//! - **Registry**: reproducible layers, manifests, and multi-platform
//!   image indexes.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod exec;
pub mod hash;
pub mod layer;
pub mod local;
pub mod logs;
pub mod publish;
pub mod registry;
pub mod source;
pub mod store;
pub mod tree;

pub use local::LocalEngine;
