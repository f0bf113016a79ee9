//! # dockyard-pipeline
//!
//! Orchestration on top of the composition engine:
//!
//! - [`matrix`]: cross product of target platforms, one build per
//!   platform resolved concurrently, assembled into an output tree.
//! - [`publish`]: wraps each platform's build in a minimal runtime image
//!   and publishes them together as one multi-platform reference.
//! - [`tasks`]: the build, lint, test, and publish invocations, each with
//!   its own engine connection.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod matrix;
pub mod publish;
pub mod tasks;
