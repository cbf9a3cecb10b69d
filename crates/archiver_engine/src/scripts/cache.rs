use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use engine_logging::{engine_debug, engine_info, engine_warn};
use walkdir::WalkDir;

use super::{ScriptError, ScriptProgram};
use crate::config::ScriptSettings;

/// An immutable snapshot of every loaded script, in declaration order: roots
/// in configuration order, files by path within a root.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    programs: Vec<Arc<ScriptProgram>>,
    errors: Vec<ScriptError>,
}

impl ScriptRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scripts whose predicate matches, in declaration order.
    pub fn applicable(&self, host: &str, html: &str) -> Vec<Arc<ScriptProgram>> {
        self.programs
            .iter()
            .filter(|p| p.matches(host, html))
            .cloned()
            .collect()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<ScriptProgram>> {
        self.programs.iter().find(|p| p.path == path).cloned()
    }

    pub fn programs(&self) -> &[Arc<ScriptProgram>] {
        &self.programs
    }

    /// Files skipped during the load cycle that built this registry.
    pub fn errors(&self) -> &[ScriptError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

/// Compiled scripts keyed by path, refreshed by [`ScriptCache::load_all`].
#[derive(Debug)]
pub struct ScriptCache {
    settings: ScriptSettings,
    registry: RwLock<Arc<ScriptRegistry>>,
    load_lock: Mutex<()>,
}

impl ScriptCache {
    pub fn new(settings: ScriptSettings) -> Self {
        Self {
            settings,
            registry: RwLock::new(Arc::new(ScriptRegistry::empty())),
            load_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ScriptSettings {
        &self.settings
    }

    /// The current snapshot.
    pub fn registry(&self) -> Arc<ScriptRegistry> {
        match self.registry.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Rescans the roots. Files whose modification time is unchanged keep
    /// their compiled entry; changed files are recompiled; vanished files are
    /// dropped. The new registry replaces the old one in a single swap.
    pub fn load_all(&self) -> Arc<ScriptRegistry> {
        let _guard = match self.load_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = self.registry();
        let known: HashMap<&Path, &Arc<ScriptProgram>> = previous
            .programs
            .iter()
            .map(|p| (p.path.as_path(), p))
            .collect();

        let mut programs = Vec::new();
        let mut errors = Vec::new();
        let (mut reused, mut compiled) = (0usize, 0usize);

        for root in &self.settings.roots {
            for path in script_files(root, &mut errors) {
                let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(err) => {
                        errors.push(io_error(&path, err));
                        continue;
                    }
                };
                if let Some(program) = known.get(path.as_path()) {
                    if program.modified == modified {
                        programs.push(Arc::clone(program));
                        reused += 1;
                        continue;
                    }
                }
                let source = match fs::read_to_string(&path) {
                    Ok(source) => source,
                    Err(err) => {
                        errors.push(io_error(&path, err));
                        continue;
                    }
                };
                match ScriptProgram::compile(&path, source, modified, &self.settings) {
                    Ok(program) => {
                        engine_debug!("compiled script {}", path.display());
                        programs.push(Arc::new(program));
                        compiled += 1;
                    }
                    Err(err) => errors.push(err),
                }
            }
        }

        for err in &errors {
            engine_warn!("script skipped: {err}");
        }
        if compiled > 0 || programs.len() != previous.len() {
            engine_info!(
                "scripts: {} loaded ({compiled} compiled, {reused} cached, {} skipped)",
                programs.len(),
                errors.len()
            );
        }

        let registry = Arc::new(ScriptRegistry { programs, errors });
        match self.registry.write() {
            Ok(mut slot) => *slot = registry.clone(),
            Err(poisoned) => *poisoned.into_inner() = registry.clone(),
        }
        registry
    }
}

fn script_files(root: &Path, errors: &mut Vec<ScriptError>) -> Vec<PathBuf> {
    if !root.is_dir() {
        errors.push(ScriptError::Io {
            path: root.to_path_buf(),
            message: "script root is not a directory".to_string(),
        });
        return Vec::new();
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(entry)
                if entry.file_type().is_file()
                    && entry.path().extension().and_then(|e| e.to_str()) == Some("lua") =>
            {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(err) => errors.push(ScriptError::Io {
                path: err.path().unwrap_or(root).to_path_buf(),
                message: err.to_string(),
            }),
        }
    }
    files
}

fn io_error(path: &Path, err: std::io::Error) -> ScriptError {
    ScriptError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
