use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use archiver_core::{RuleError, SiteRuleIndex};
use engine_logging::{engine_info, engine_warn};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("rule directory {path}: {message}")]
    Directory { path: PathBuf, message: String },
    #[error("{path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// Reads every `<domain>.json` file of `dir`. Problems are returned next to
/// the index; a broken file never prevents the others from loading.
pub fn load_rules_dir(dir: &Path) -> (SiteRuleIndex, Vec<RuleLoadError>) {
    let mut errors = Vec::new();
    if !dir.is_dir() {
        errors.push(RuleLoadError::Directory {
            path: dir.to_path_buf(),
            message: "not a directory".into(),
        });
        return (SiteRuleIndex::new(), errors);
    }

    let mut documents: Vec<(String, String)> = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                errors.push(RuleLoadError::Directory {
                    path: dir.to_path_buf(),
                    message: err.to_string(),
                });
                continue;
            }
        };
        let path = entry.path();
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        if !entry.file_type().is_file() || !is_json {
            continue;
        }
        let Some(domain) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match fs::read_to_string(path) {
            Ok(json) => documents.push((domain.to_string(), json)),
            Err(err) => errors.push(RuleLoadError::Read {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    let (index, rule_errors) =
        SiteRuleIndex::from_documents(documents.iter().map(|(d, j)| (d.as_str(), j.as_str())));
    errors.extend(rule_errors.into_iter().map(RuleLoadError::from));
    (index, errors)
}

/// The process-wide rule index. Runs take a snapshot; [`SiteRules::reload`]
/// swaps in a complete new index.
#[derive(Debug)]
pub struct SiteRules {
    dir: Option<PathBuf>,
    index: RwLock<Arc<SiteRuleIndex>>,
}

impl SiteRules {
    pub fn empty() -> Self {
        Self::from_index(SiteRuleIndex::new())
    }

    pub fn from_index(index: SiteRuleIndex) -> Self {
        Self {
            dir: None,
            index: RwLock::new(Arc::new(index)),
        }
    }

    /// Loads `dir`, logging every configuration problem.
    pub fn load(dir: impl Into<PathBuf>) -> (Self, Vec<RuleLoadError>) {
        let dir = dir.into();
        let (index, errors) = load_rules_dir(&dir);
        report(&dir, &index, &errors);
        (
            Self {
                dir: Some(dir),
                index: RwLock::new(Arc::new(index)),
            },
            errors,
        )
    }

    pub fn current(&self) -> Arc<SiteRuleIndex> {
        match self.index.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-reads the rule directory and replaces the whole index. Runs already
    /// holding the previous snapshot keep using it.
    pub fn reload(&self) -> Vec<RuleLoadError> {
        let Some(dir) = &self.dir else {
            return Vec::new();
        };
        let (index, errors) = load_rules_dir(dir);
        report(dir, &index, &errors);
        let index = Arc::new(index);
        match self.index.write() {
            Ok(mut guard) => *guard = index,
            Err(poisoned) => *poisoned.into_inner() = index,
        }
        errors
    }
}

fn report(dir: &Path, index: &SiteRuleIndex, errors: &[RuleLoadError]) {
    for err in errors {
        if !matches!(err, RuleLoadError::Rule(_)) {
            engine_warn!("{err}");
        }
    }
    engine_info!(
        "loaded {} site rules from {} ({} skipped)",
        index.len(),
        dir.display(),
        errors.len()
    );
}
