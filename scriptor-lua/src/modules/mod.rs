//! Modules available to function-kind scripts
//!
//! Each module is generic over a small trait so the runner decides where
//! logs go and which environment variables a script can see.

pub mod env;
pub mod log;

pub use env::{EnvModule, VarProvider};
pub use log::{LogModule, LogSink};
