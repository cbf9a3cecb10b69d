use std::path::{Path, PathBuf};
use std::time::SystemTime;

use mlua::{Table, Value};

use super::sandbox::Sandbox;
use super::ScriptError;
use crate::config::ScriptSettings;

pub(crate) const HOOKS: [&str; 3] = ["set_config", "process_meta", "document_ready"];

/// A compiled content script and its activation predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptProgram {
    pub path: PathBuf,
    pub name: String,
    pub source: String,
    pub modified: SystemTime,
    pub domains: Vec<String>,
    pub sniff: Option<String>,
}

impl ScriptProgram {
    /// Evaluates `source` once in a throwaway sandbox to read the predicate
    /// and check the shape of the returned table. Only `host` is defined
    /// during this pass.
    pub fn compile(
        path: &Path,
        source: String,
        modified: SystemTime,
        settings: &ScriptSettings,
    ) -> Result<Self, ScriptError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("script")
            .to_string();
        let compile_err = |message: String| ScriptError::Compile {
            name: name.clone(),
            message,
        };

        let sandbox = Sandbox::new(settings).map_err(|err| ScriptError::Sandbox {
            name: name.clone(),
            message: err.to_string(),
        })?;
        let lua = sandbox.lua();
        let host = lua.create_table().map_err(|e| compile_err(e.to_string()))?;
        host.set("domain", "").map_err(|e| compile_err(e.to_string()))?;
        host.set("url", "").map_err(|e| compile_err(e.to_string()))?;
        lua.globals()
            .set("host", host)
            .map_err(|e| compile_err(e.to_string()))?;

        let exports: Value = lua
            .load(source.as_str())
            .set_name(name.as_str())
            .eval()
            .map_err(|err| match sandbox.classify(&name, "load", &err) {
                ScriptError::Runtime { message, .. } => compile_err(message),
                other => other,
            })?;
        let Value::Table(exports) = exports else {
            return Err(compile_err("script must return a table".to_string()));
        };

        let domains = read_domains(&exports).map_err(compile_err)?;
        let sniff = exports
            .get::<_, Option<String>>("sniff")
            .map_err(|e| compile_err(e.to_string()))?
            .filter(|s| !s.is_empty());
        for hook in HOOKS {
            match exports.get::<_, Value>(hook) {
                Ok(Value::Nil) | Ok(Value::Function(_)) => {}
                Ok(_) => return Err(compile_err(format!("{hook} must be a function"))),
                Err(err) => return Err(compile_err(err.to_string())),
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            name,
            source,
            modified,
            domains,
            sniff,
        })
    }

    /// True when the script wants to run on `host` for this raw document.
    pub fn matches(&self, host: &str, html: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let domain_match = self.domains.iter().any(|d| {
            d == "*"
                || host == *d
                || host
                    .strip_suffix(d.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        });
        domain_match && self.sniff.as_deref().is_none_or(|needle| html.contains(needle))
    }
}

fn read_domains(exports: &Table<'_>) -> Result<Vec<String>, String> {
    let raw: Vec<String> = match exports.get::<_, Value>("domains").map_err(|e| e.to_string())? {
        Value::Nil => Vec::new(),
        Value::String(s) => vec![s.to_str().map_err(|e| e.to_string())?.to_string()],
        Value::Table(list) => list
            .sequence_values::<String>()
            .collect::<mlua::Result<Vec<_>>>()
            .map_err(|e| e.to_string())?,
        _ => return Err("domains must be a string or a list of strings".to_string()),
    };
    let mut domains = Vec::new();
    for domain in raw {
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        if !domain.is_empty() && !domains.contains(&domain) {
            domains.push(domain);
        }
    }
    Ok(domains)
}
