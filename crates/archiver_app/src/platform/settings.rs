//! `archiver.ron`: settings of the binary, mapped onto [`EngineConfig`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use archiver_engine::EngineConfig;
use engine_logging::engine_info;
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILENAME: &str = "archiver.ron";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub data_dir: PathBuf,
    pub rules_dir: Option<PathBuf>,
    pub script_dirs: Vec<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub request_timeout_secs: u64,
    pub max_image_width: u32,
    pub conversion_slots: usize,
    pub script_budget_ms: u64,
    pub readability: bool,
    pub enrich_links: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        let engine = EngineConfig::new("data");
        Self {
            data_dir: engine.data_dir,
            rules_dir: None,
            script_dirs: Vec::new(),
            log_file: None,
            user_agent: None,
            request_timeout_secs: engine.fetch.request_timeout.as_secs(),
            max_image_width: engine.images.max_width,
            conversion_slots: engine.conversion_slots,
            script_budget_ms: engine.scripts.budget.as_millis() as u64,
            readability: true,
            enrich_links: engine.links.enabled,
        }
    }
}

impl AppSettings {
    /// Reads `path`. A missing file yields the defaults; a malformed one is
    /// an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                engine_info!("No settings at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("cannot read settings {:?}", path))
            }
        };
        let settings =
            ron::from_str(&content).with_context(|| format!("malformed settings {:?}", path))?;
        engine_info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.data_dir.clone());
        config.rules_dir = self.rules_dir.clone();
        config.scripts.roots = self.script_dirs.clone();
        config.scripts.budget = Duration::from_millis(self.script_budget_ms.max(1));
        config.images.max_width = self.max_image_width.max(1);
        config.conversion_slots = self.conversion_slots.max(1);
        config.fetch.request_timeout = Duration::from_secs(self.request_timeout_secs.max(1));
        if let Some(agent) = &self.user_agent {
            config.fetch.user_agent = agent.clone();
        }
        config.links.enabled = self.enrich_links;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = AppSettings::load(&temp.path().join(SETTINGS_FILENAME)).unwrap();
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.engine_config().images.max_width, 1536);
    }

    #[test]
    fn partial_file_overrides_only_its_fields() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SETTINGS_FILENAME);
        fs::write(
            &path,
            r#"(
                data_dir: "/srv/archive",
                rules_dir: Some("/srv/rules"),
                script_dirs: ["/srv/scripts"],
                max_image_width: 1024,
            )"#,
        )
        .unwrap();

        let settings = AppSettings::load(&path).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/srv/archive"));
        assert!(settings.readability);

        let config = settings.engine_config();
        assert_eq!(config.rules_dir, Some(PathBuf::from("/srv/rules")));
        assert_eq!(config.scripts.roots, vec![PathBuf::from("/srv/scripts")]);
        assert_eq!(config.images.max_width, 1024);
        assert_eq!(config.conversion_slots, 2);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SETTINGS_FILENAME);
        fs::write(&path, "(data_dir: ").unwrap();
        assert!(AppSettings::load(&path).is_err());
    }
}
