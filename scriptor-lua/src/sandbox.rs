//! Lua sandbox creation
//!
//! Two flavours of sandbox are provided:
//! - Metadata sandbox: evaluates a script only to read its manifest table.
//!   No I/O, no OS access, no module loading, and a hard instruction budget.
//! - Execution sandbox: runs a script's `execute` function. Adds `package`
//!   (so declared dependencies can be `require`d from the configured search
//!   paths), `utf8`, `coroutine` and a reduced `os` table.
//!
//! Deadlines for execution are enforced with an instruction-count hook
//! installed through [`set_deadline`].

use mlua::{HookTriggers, Lua, LuaOptions, Result as LuaResult, StdLib, Table, VmState};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::module::ModuleRegistry;

/// Error message raised inside the VM once a deadline has passed
pub const DEADLINE_EXCEEDED: &str = "execution deadline exceeded";

/// Instructions executed between two hook invocations
const HOOK_INTERVAL: u32 = 10_000;

/// Upper bound on instructions spent evaluating a manifest
const METADATA_INSTRUCTION_BUDGET: u64 = 50_000_000;

/// `os` functions left in the execution sandbox
const OS_ALLOWED: &[&str] = &["clock", "date", "difftime", "getenv", "time"];

/// Directories searched by `require` inside the execution sandbox
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    /// Directories containing plain Lua modules (`<dir>/?.lua`)
    pub module_dirs: Vec<PathBuf>,
    /// A luarocks-style tree (`share/lua/5.4`, `lib/lua/5.4`)
    pub rocks_tree: Option<PathBuf>,
}

impl SearchPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.module_dirs.push(dir.into());
        self
    }

    pub fn with_rocks_tree(mut self, tree: impl Into<PathBuf>) -> Self {
        self.rocks_tree = Some(tree.into());
        self
    }

    /// Value prepended to `package.path`
    pub fn lua_path(&self) -> String {
        let mut patterns = Vec::new();
        for dir in &self.module_dirs {
            patterns.push(format!("{}/?.lua", dir.display()));
            patterns.push(format!("{}/?/init.lua", dir.display()));
        }
        if let Some(tree) = &self.rocks_tree {
            let share = tree.join("share").join("lua").join("5.4");
            patterns.push(format!("{}/?.lua", share.display()));
            patterns.push(format!("{}/?/init.lua", share.display()));
        }
        patterns.join(";")
    }

    /// Value prepended to `package.cpath`
    pub fn lua_cpath(&self) -> String {
        match &self.rocks_tree {
            Some(tree) => {
                let lib = tree.join("lib").join("lua").join("5.4");
                format!("{}/?.so", lib.display())
            }
            None => String::new(),
        }
    }
}

/// Create a sandbox for reading a script's manifest
///
/// Only `table`, `string` and `math` are loaded. `require` is replaced by a
/// stub returning an empty table so scripts that load dependencies at the
/// top level can still be inspected without those dependencies installed.
///
/// # Example
/// ```no_run
/// use scriptor_lua::sandbox::create_metadata_sandbox;
///
/// let lua = create_metadata_sandbox()?;
/// let manifest: mlua::Table = lua
///     .load(r#"return { name = "word_count", execute = function() end }"#)
///     .eval()?;
/// let name: String = manifest.get("name")?;
/// assert_eq!(name, "word_count");
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_metadata_sandbox() -> LuaResult<Lua> {
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::default(),
        )
    };

    let globals = lua.globals();
    globals.set("dofile", mlua::Nil)?;
    globals.set("loadfile", mlua::Nil)?;
    globals.set(
        "require",
        lua.create_function(|lua, _name: String| lua.create_table())?,
    )?;

    let executed = Arc::new(AtomicU64::new(0));
    let _ = lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        move |_lua, _debug| {
            let total = executed.fetch_add(HOOK_INTERVAL as u64, Ordering::Relaxed);
            if total >= METADATA_INSTRUCTION_BUDGET {
                return Err(mlua::Error::runtime(
                    "manifest evaluation exceeded its instruction budget",
                ));
            }
            Ok(VmState::Continue)
        },
    );

    Ok(lua)
}

/// Create a sandbox for running a script
///
/// Modules from `modules` are registered as globals after the standard
/// libraries are set up.
pub fn create_execution_sandbox(modules: &ModuleRegistry, paths: &SearchPaths) -> LuaResult<Lua> {
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE
                | StdLib::STRING
                | StdLib::MATH
                | StdLib::COROUTINE
                | StdLib::UTF8
                | StdLib::PACKAGE
                | StdLib::OS,
            LuaOptions::default(),
        )
    };

    let globals = lua.globals();
    globals.set("dofile", mlua::Nil)?;
    globals.set("loadfile", mlua::Nil)?;

    restrict_os(&lua)?;
    configure_package_paths(&lua, paths)?;

    modules.register_all(&lua)?;

    Ok(lua)
}

/// Abort execution with [`DEADLINE_EXCEEDED`] once `deadline` has passed
///
/// The check runs every few thousand VM instructions, so pure Lua code is
/// interrupted promptly. A native function blocked inside a C module is
/// not interrupted until it returns control to the VM.
pub fn set_deadline(lua: &Lua, deadline: Instant) {
    let _ = lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        move |_lua, _debug| {
            if Instant::now() >= deadline {
                return Err(mlua::Error::runtime(DEADLINE_EXCEEDED));
            }
            Ok(VmState::Continue)
        },
    );
}

/// True when `error` was raised by the deadline hook
pub fn is_deadline_error(error: &mlua::Error) -> bool {
    error.to_string().contains(DEADLINE_EXCEEDED)
}

fn restrict_os(lua: &Lua) -> LuaResult<()> {
    let full: Table = lua.globals().get("os")?;
    let reduced = lua.create_table()?;
    for name in OS_ALLOWED {
        reduced.set(*name, full.get::<mlua::Value>(*name)?)?;
    }
    lua.globals().set("os", reduced)?;
    Ok(())
}

fn configure_package_paths(lua: &Lua, paths: &SearchPaths) -> LuaResult<()> {
    let package: Table = lua.globals().get("package")?;

    let lua_path = paths.lua_path();
    if !lua_path.is_empty() {
        let current: String = package.get("path")?;
        package.set("path", format!("{};{}", lua_path, current))?;
    }

    let lua_cpath = paths.lua_cpath();
    if !lua_cpath.is_empty() {
        let current: String = package.get("cpath")?;
        package.set("cpath", format!("{};{}", lua_cpath, current))?;
    }

    Ok(())
}
