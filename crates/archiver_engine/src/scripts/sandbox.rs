use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use mlua::{HookTriggers, Lua, LuaOptions, StdLib, Value};

use super::ScriptError;
use crate::config::ScriptSettings;

/// Globals removed from every VM: code loading and error trapping. With
/// `pcall` available a script could swallow the budget error and keep going.
const REMOVED_GLOBALS: &[&str] = &[
    "load",
    "loadfile",
    "dofile",
    "require",
    "collectgarbage",
    "pcall",
    "xpcall",
    "print",
];

pub(crate) struct Sandbox {
    lua: Lua,
    exceeded: Arc<AtomicBool>,
    budget_ms: u128,
}

impl Sandbox {
    pub(crate) fn new(settings: &ScriptSettings) -> mlua::Result<Self> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )?;
        lua.set_memory_limit(settings.memory_limit)?;
        {
            let globals = lua.globals();
            for name in REMOVED_GLOBALS {
                globals.set(*name, Value::Nil)?;
            }
        }

        let exceeded = Arc::new(AtomicBool::new(false));
        let flag = exceeded.clone();
        let deadline = Instant::now() + settings.budget;
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(settings.check_interval.max(1)),
            move |_lua, _debug| {
                if Instant::now() >= deadline {
                    flag.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::RuntimeError(
                        "execution budget exceeded".to_string(),
                    ));
                }
                Ok(())
            },
        );

        Ok(Self {
            lua,
            exceeded,
            budget_ms: settings.budget.as_millis(),
        })
    }

    pub(crate) fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Maps a VM error raised while running `hook` of script `name`.
    pub(crate) fn classify(
        &self,
        name: &str,
        hook: &'static str,
        err: &mlua::Error,
    ) -> ScriptError {
        if self.exceeded.load(Ordering::Relaxed) {
            return ScriptError::Budget {
                name: name.to_string(),
                hook,
                budget_ms: self.budget_ms,
            };
        }
        if matches!(root_cause(err), mlua::Error::MemoryError(_)) {
            return ScriptError::Memory {
                name: name.to_string(),
                hook,
            };
        }
        ScriptError::Runtime {
            name: name.to_string(),
            hook,
            message: first_line(&root_cause(err).to_string()),
        }
    }
}

fn root_cause(err: &mlua::Error) -> &mlua::Error {
    let mut current = err;
    while let mlua::Error::CallbackError { cause, .. } = current {
        current = cause.as_ref();
    }
    current
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}
