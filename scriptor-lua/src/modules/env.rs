//! Environment module for function-kind scripts
//!
//! Scripts read configuration such as API tokens through `env.get`,
//! `env.require` and `env.has` instead of touching the process directly.
//! The runner decides which variables are visible by choosing the
//! `VarProvider`.

use crate::module::ScriptModule;
use mlua::prelude::*;
use std::sync::Arc;

/// Source of environment variables for the `env` module
pub trait VarProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    /// Names of all visible variables
    fn keys(&self) -> Vec<String>;
}

/// `env` global, generic over its provider
pub struct EnvModule<V: VarProvider> {
    provider: Arc<V>,
}

impl<V: VarProvider> EnvModule<V> {
    pub fn new(provider: V) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }
}

impl<V: VarProvider + 'static> ScriptModule for EnvModule<V> {
    fn id(&self) -> &'static str {
        "env"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let env_table = lua.create_table()?;

        // env.get(name, default?)
        {
            let provider = self.provider.clone();
            env_table.set(
                "get",
                lua.create_function(move |_, (name, default): (String, Option<String>)| {
                    Ok(provider.get(&name).or(default))
                })?,
            )?;
        }

        // env.require(name) raises when the variable is missing
        {
            let provider = self.provider.clone();
            env_table.set(
                "require",
                lua.create_function(move |_, name: String| {
                    provider.get(&name).ok_or_else(|| {
                        LuaError::RuntimeError(format!(
                            "Required environment variable '{}' is not set",
                            name
                        ))
                    })
                })?,
            )?;
        }

        // env.has(name)
        {
            let provider = self.provider.clone();
            env_table.set(
                "has",
                lua.create_function(move |_, name: String| Ok(provider.get(&name).is_some()))?,
            )?;
        }

        // env.keys()
        {
            let provider = self.provider.clone();
            env_table.set(
                "keys",
                lua.create_function(move |lua, ()| {
                    let mut keys = provider.keys();
                    keys.sort();
                    lua.create_sequence_from(keys)
                })?,
            )?;
        }

        lua.globals().set(self.id(), env_table)?;
        Ok(())
    }
}
