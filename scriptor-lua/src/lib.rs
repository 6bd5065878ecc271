//! Scriptor Lua Runtime
//!
//! In-process runtime for function-kind scripts. It includes:
//! - Module trait and registry for Lua globals exposed to scripts
//! - Metadata and execution sandboxes, with deadline enforcement
//! - The `log` and `env` modules
//! - Manifest parsing and runtime script definitions

pub mod definition;
pub mod module;
pub mod modules;
pub mod parser;
pub mod sandbox;

pub use definition::{ScriptDefinition, json_to_lua, load_script, lua_to_json};
pub use module::{ModuleRegistry, ScriptModule};
pub use modules::{EnvModule, LogModule, LogSink, VarProvider};
pub use parser::{ScriptManifest, manifest_from_table, parse_manifest};
pub use sandbox::{
    DEADLINE_EXCEEDED, SearchPaths, create_execution_sandbox, create_metadata_sandbox,
    is_deadline_error, set_deadline,
};
