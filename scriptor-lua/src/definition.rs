//! Script definition for runtime execution
//!
//! Unlike `ScriptManifest` (plain data), a `ScriptDefinition` holds the live
//! `execute` function of a script loaded into an execution sandbox.

use anyhow::{Context, Result};
use mlua::{DeserializeOptions, Function, Lua, LuaSerdeExt, Table};

use crate::parser::{ScriptManifest, manifest_from_table};

/// A loaded function-kind script
pub struct ScriptDefinition {
    pub manifest: ScriptManifest,
    pub execute: Function,
}

impl ScriptDefinition {
    /// Call `execute(params)` and convert its return value to JSON
    ///
    /// Functions and other values without a JSON form are dropped from the
    /// result. A script returning nothing yields `null`.
    pub fn call(&self, lua: &Lua, params: &serde_json::Value) -> mlua::Result<serde_json::Value> {
        let args = json_to_lua(lua, params)?;
        let returned: mlua::Value = self.execute.call(args)?;
        lua_to_json(lua, returned)
    }
}

/// Load a script into an execution sandbox
///
/// # Arguments
/// * `lua` - Execution sandbox with modules already registered
/// * `source` - Script source code
/// * `chunk_name` - Name shown in error messages and tracebacks
pub fn load_script(lua: &Lua, source: &str, chunk_name: &str) -> Result<ScriptDefinition> {
    let table: Table = lua
        .load(source)
        .set_name(format!("@{}", chunk_name))
        .eval()
        .map_err(|e| anyhow::anyhow!("Failed to evaluate script: {}", e))?;

    let manifest = manifest_from_table(&table)?;
    let execute: Function = table
        .get("execute")
        .context("Script must define an 'execute' function")?;

    Ok(ScriptDefinition { manifest, execute })
}

/// Convert a JSON value into a Lua value
pub fn json_to_lua(lua: &Lua, value: &serde_json::Value) -> mlua::Result<mlua::Value> {
    lua.to_value(value)
}

/// Convert a Lua value into JSON, skipping functions and userdata
pub fn lua_to_json(lua: &Lua, value: mlua::Value) -> mlua::Result<serde_json::Value> {
    lua.from_value_with(value, DeserializeOptions::new().deny_unsupported_types(false))
}
