use std::collections::BTreeMap;

use archiver_core::{Document, DocumentMeta, MetaMap, NodeId, Resource, SiteRule};
use engine_logging::DebugLog;
use serde::{Deserialize, Serialize};
use url::Url;

/// Stage names stamped on debug-log lines.
pub mod stage {
    pub const FETCH: &str = "fetch";
    pub const METADATA: &str = "metadata";
    pub const RULES: &str = "rules";
    pub const SCRIPTS: &str = "scripts";
    pub const BODY: &str = "body";
    pub const READABILITY: &str = "readability";
    pub const ARCHIVE: &str = "archive";
    pub const LINKS: &str = "links";
}

/// Where the archived body came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodySource {
    SiteRule,
    Readability,
    #[default]
    WholeBody,
}

/// State of one archival run. Each stage receives it by `&mut`; nothing in
/// here outlives the run.
#[derive(Debug)]
pub struct DocumentContext {
    pub source_url: Url,
    pub domain: String,
    pub raw_html: String,
    pub document: Document,
    pub meta_map: MetaMap,
    pub meta: DocumentMeta,
    pub rule: SiteRule,
    /// Key of the site rule in effect, if any.
    pub rule_key: Option<String>,
    pub scripts_run: Vec<String>,
    /// Readability mode: scorer fallback and icon dropping.
    pub readability: bool,
    pub body_source: BodySource,
    /// The `<section id="article">` holding the extracted body.
    pub article: Option<NodeId>,
    pub resources: Vec<Resource>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub log: DebugLog,
}

impl DocumentContext {
    pub fn new(source_url: Url, raw_html: String, readability: bool) -> Self {
        let domain = source_url
            .host_str()
            .unwrap_or_default()
            .trim_end_matches('.')
            .to_ascii_lowercase();
        Self {
            source_url,
            domain,
            document: Document::parse(""),
            raw_html,
            meta_map: MetaMap::new(),
            meta: DocumentMeta::default(),
            rule: SiteRule::default(),
            rule_key: None,
            scripts_run: Vec::new(),
            readability,
            body_source: BodySource::default(),
            article: None,
            resources: Vec::new(),
            files: BTreeMap::new(),
            log: DebugLog::new(),
        }
    }
}
