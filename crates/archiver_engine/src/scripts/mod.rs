//! Site content scripts.
//!
//! A script is a Lua file returning a table:
//!
//! ```lua
//! return {
//!   domains = { "example.com" },        -- "*" matches every host
//!   sniff = "data-paywall",             -- optional substring of the raw HTML
//!   set_config = function(rule) rule.add_body("article .post") end,
//!   process_meta = function(meta) meta.title = meta.title:gsub(" | Example$", "") end,
//!   document_ready = function(dom)
//!     for _, n in ipairs(dom.select(".share")) do dom.remove(n) end
//!   end,
//! }
//! ```
//!
//! Each run gets a fresh VM with only the `table`, `string`, `math` and `utf8`
//! libraries, plus the `host`, `log`, `rule` and `dom` tables. DOM nodes are
//! integer handles valid for that run only.

mod cache;
mod host;
mod program;
mod sandbox;

use std::path::PathBuf;

use thiserror::Error;

pub use cache::{ScriptCache, ScriptRegistry};
pub use host::{ScriptEnv, ScriptRunner};
pub use program::ScriptProgram;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("{}: {message}", path.display())]
    Io { path: PathBuf, message: String },
    #[error("{name}: compile error: {message}")]
    Compile { name: String, message: String },
    #[error("{name}: {hook} failed: {message}")]
    Runtime {
        name: String,
        hook: &'static str,
        message: String,
    },
    #[error("{name}: {hook} exceeded the {budget_ms} ms budget")]
    Budget {
        name: String,
        hook: &'static str,
        budget_ms: u128,
    },
    #[error("{name}: {hook} exceeded the memory limit")]
    Memory { name: String, hook: &'static str },
    #[error("{name}: cannot create sandbox: {message}")]
    Sandbox { name: String, message: String },
}
