//! Logging module for function-kind scripts
//!
//! Exposes `log.debug`, `log.info`, `log.warning` and `log.error`. Where the
//! lines end up is decided by the `LogSink` the runner plugs in.

use crate::module::ScriptModule;
use mlua::prelude::*;
use scriptor_core::domain::log::LogLevel;
use std::sync::{Arc, Mutex};

/// Destination for lines logged by a script
///
/// Implementations must be Send to work with Lua's threading model.
pub trait LogSink: Send + Sync {
    fn write(&mut self, level: LogLevel, message: &str);
}

/// `log` global, generic over its sink
pub struct LogModule<S: LogSink> {
    sink: Arc<Mutex<S>>,
}

impl<S: LogSink> LogModule<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }
}

impl<S: LogSink + 'static> ScriptModule for LogModule<S> {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let log_table = lua.create_table()?;

        for level in LogLevel::ALL {
            let sink = self.sink.clone();
            log_table.set(
                level.as_str(),
                lua.create_function(move |_, msg: LuaValue| {
                    let text = match msg {
                        LuaValue::String(s) => s.to_str()?.to_string(),
                        other => other.to_string()?,
                    };
                    sink.lock()
                        .map_err(|e| LuaError::RuntimeError(format!("Failed to lock sink: {}", e)))?
                        .write(level, &text);
                    Ok(())
                })?,
            )?;
        }

        lua.globals().set(self.id(), log_table)?;
        Ok(())
    }
}
