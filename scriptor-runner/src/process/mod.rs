//! Child-process execution for cli-kind scripts

pub mod flags;
pub mod runner;

pub use flags::render_flags;
pub use runner::{ChildEnv, CliRun, CommandRunner, interpret_output};
