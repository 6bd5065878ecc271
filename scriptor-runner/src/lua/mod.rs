//! Lua execution infrastructure for the runner
//!
//! This module provides:
//! - The function-kind executor
//! - Log sink and variable provider implementations for the Lua modules

pub mod executor;
pub mod sinks;

pub use executor::FunctionExecutor;
