//! # dockyard-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire Dockyard workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and provides the primitives the composition engine,
//! the local engine, the building blocks, and the pipeline build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
