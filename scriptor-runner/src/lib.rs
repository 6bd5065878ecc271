//! Scriptor Runner
//!
//! Resolves named scripts across the project, user and registry tiers and
//! executes them with bounded output and an append-only execution log.
//!
//! Layout:
//! - Configuration: paths, limits and registry settings
//! - Repositories: the remote registry and the project lockfile
//! - Services: resolution, dependencies, output bounding, logging, history
//! - Executors: in-process Lua functions and child processes
//! - Engine: the state machine tying them together

pub mod config;
pub mod engine;
pub mod error;
pub mod lua;
pub mod process;
pub mod repository;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use engine::ExecutionEngine;
pub use error::{EngineError, ResolveError};
