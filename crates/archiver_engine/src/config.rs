use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use archiver_core::ReadabilitySettings;
use chrono::{DateTime, Utc};

use crate::FetchSettings;

/// Source of the `archived` timestamp written to `props.json`.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>);

impl Clock {
    pub fn system() -> Self {
        Self(Arc::new(Utc::now))
    }

    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self(Arc::new(move || at))
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Clock").field(&self.now()).finish()
    }
}

#[derive(Debug, Clone)]
pub struct ImageSettings {
    /// Wider images are downscaled to this width.
    pub max_width: u32,
    /// Near-square images up to this size are icons.
    pub icon_max: u32,
    /// Concurrent resource fetches within one run.
    pub fetch_concurrency: usize,
    pub resource_timeout: Duration,
    /// How long a run waits for a conversion slot before dropping the image.
    pub conversion_wait: Duration,
    pub jpeg_quality: u8,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            max_width: 1536,
            icon_max: 64,
            fetch_concurrency: 8,
            resource_timeout: Duration::from_secs(20),
            conversion_wait: Duration::from_secs(60),
            jpeg_quality: 75,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptSettings {
    /// Directories scanned for `*.lua` files, in declaration order.
    pub roots: Vec<PathBuf>,
    /// Wall-clock budget of one script run.
    pub budget: Duration,
    pub memory_limit: usize,
    /// Instructions between two budget checks.
    pub check_interval: u32,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            budget: Duration::from_millis(500),
            memory_limit: 32 * 1024 * 1024,
            check_interval: 1_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub enabled: bool,
    pub max_links: usize,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_links: 200,
            concurrency: 4,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub fetch: FetchSettings,
    pub images: ImageSettings,
    /// Conversion permits shared by every run of the process.
    pub conversion_slots: usize,
    pub scripts: ScriptSettings,
    pub rules_dir: Option<PathBuf>,
    pub readability: ReadabilitySettings,
    pub links: LinkSettings,
    pub clock: Clock,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            fetch: FetchSettings::default(),
            images: ImageSettings::default(),
            conversion_slots: 2,
            scripts: ScriptSettings::default(),
            rules_dir: None,
            readability: ReadabilitySettings::default(),
            links: LinkSettings::default(),
            clock: Clock::system(),
        }
    }
}
