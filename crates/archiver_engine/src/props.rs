use archiver_core::{DocumentMeta, ExtractedLink, MetaMap, Resource};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::context::{BodySource, DocumentContext};

/// Metadata snapshot stored as `props.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Props<'a> {
    pub url: &'a str,
    pub domain: &'a str,
    #[serde(flatten)]
    pub meta: &'a DocumentMeta,
    pub archived: String,
    pub readability: bool,
    pub site_rule: Option<&'a str>,
    pub scripts: &'a [String],
    pub body_source: BodySource,
    pub resources: &'a [Resource],
    pub links: &'a [ExtractedLink],
    /// Every raw meta value collected from the page, keyed by name.
    pub raw_meta: &'a MetaMap,
}

impl<'a> Props<'a> {
    pub fn new(
        ctx: &'a DocumentContext,
        links: &'a [ExtractedLink],
        archived: DateTime<Utc>,
    ) -> Self {
        Self {
            url: ctx.source_url.as_str(),
            domain: &ctx.domain,
            meta: &ctx.meta,
            archived: archived.to_rfc3339_opts(SecondsFormat::Secs, true),
            readability: ctx.readability,
            site_rule: ctx.rule_key.as_deref(),
            scripts: &ctx.scripts_run,
            body_source: ctx.body_source,
            resources: &ctx.resources,
            links,
            raw_meta: &ctx.meta_map,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut out = serde_json::to_vec_pretty(self)?;
        out.push(b'\n');
        Ok(out)
    }
}
