use mlua::prelude::*;

/// Trait for Lua modules exposed to function-kind scripts.
///
/// Each module registers a global table (named after `id()`) into the
/// execution sandbox before the script is loaded.
///
/// # Example
///
/// ```rust
/// use scriptor_lua::ScriptModule;
/// use mlua::prelude::*;
///
/// struct ClockModule;
///
/// impl ScriptModule for ClockModule {
///     fn id(&self) -> &'static str {
///         "clock"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("zero", lua.create_function(|_, ()| Ok(0))?)?;
///         lua.globals().set(self.id(), table)?;
///         Ok(())
///     }
/// }
/// ```
pub trait ScriptModule: Send + Sync {
    /// Global name of the module inside Lua.
    ///
    /// Must be a valid Lua identifier and unique within a registry.
    fn id(&self) -> &'static str;

    /// Registers this module's functions into the Lua context.
    ///
    /// # Errors
    /// Returns `LuaError` if a table or function cannot be created.
    fn register(&self, lua: &Lua) -> LuaResult<()>;
}

/// Ordered set of modules to install into an execution sandbox
pub struct ModuleRegistry {
    modules: Vec<Box<dyn ScriptModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Registers a module
    ///
    /// # Panics
    /// Panics if a module with the same ID is already registered
    pub fn register<M: ScriptModule + 'static>(&mut self, module: M) {
        let id = module.id();
        if self.modules.iter().any(|m| m.id() == id) {
            panic!("Module with id '{}' is already registered", id);
        }
        self.modules.push(Box::new(module));
    }

    pub fn get(&self, id: &str) -> Option<&dyn ScriptModule> {
        self.modules
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    /// IDs in registration order
    pub fn ids(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.id()).collect()
    }

    /// Registers every module into `lua`, stopping at the first error
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        for module in &self.modules {
            module.register(lua)?;
        }
        Ok(())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstModule;

    impl ScriptModule for ConstModule {
        fn id(&self) -> &'static str {
            "consts"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            let table = lua.create_table()?;
            table.set("value", 42)?;
            lua.globals().set(self.id(), table)?;
            Ok(())
        }
    }

    #[test]
    fn test_module_registration() {
        let mut registry = ModuleRegistry::new();
        registry.register(ConstModule);

        assert!(registry.get("consts").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.ids(), vec!["consts"]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_registration() {
        let mut registry = ModuleRegistry::new();
        registry.register(ConstModule);
        registry.register(ConstModule);
    }

    #[test]
    fn test_register_all_installs_globals() {
        let mut registry = ModuleRegistry::new();
        registry.register(ConstModule);

        let lua = Lua::new();
        registry.register_all(&lua).unwrap();

        let value: i32 = lua.load("return consts.value").eval().unwrap();
        assert_eq!(value, 42);
    }
}
