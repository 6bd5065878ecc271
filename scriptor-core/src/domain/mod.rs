//! Core domain types
//!
//! These structures are shared between the Lua runtime (manifest parsing),
//! the registry client (materialization, remote logging) and the runner
//! (resolution and execution).

pub mod execution;
pub mod log;
pub mod record;
pub mod script;
