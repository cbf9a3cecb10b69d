//! The archival pipeline.
//!
//! Stages run in a fixed order over one [`DocumentContext`]: decode, metadata,
//! site rules, scripts, body, readability, archive. Link enrichment runs after
//! the container is written. A stage either succeeds, degrades to a no-op with
//! a logged warning, or aborts the run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use archiver_core::{
    absolutize_links, all_texts, apply_oembed, apply_replace_strings, extract_meta, first_text,
    oembed_endpoint, remove_scripting, select_body, strip, unwrap_noscript_images, Document,
    DocumentMeta, DomError, ExtractedLink, LinkCollector, NodeId, Readability, Resource,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use engine_logging::{
    engine_info, engine_warn, stage_debug, stage_error, stage_info, stage_warn, DebugLog,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::EngineConfig;
use crate::container::{
    Container, ContainerError, ContainerWriter, INDEX_FILE, LOG_FILE, PROPS_FILE,
};
use crate::context::{stage, BodySource, DocumentContext};
use crate::decode::{decode_html, DecodeError};
use crate::enrich::{EnrichedLink, LinkEnricher};
use crate::images::{ConversionSlots, ImageArchiver};
use crate::locks::BookmarkLocks;
use crate::props::Props;
use crate::scripts::{ScriptCache, ScriptEnv, ScriptRunner};
use crate::site_rules::SiteRules;
use crate::storage::{PersistError, StoragePaths};
use crate::{Accept, Fetcher, ReqwestFetcher, SourceDocument};

/// Failures that abort a run.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid source url {url:?}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("cannot decode document: {0}")]
    Decode(#[from] DecodeError),
    #[error("document structure: {0}")]
    Dom(#[from] DomError),
    #[error("cannot serialize props: {0}")]
    Props(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] PersistError),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error("script worker failed: {0}")]
    ScriptWorker(String),
    #[error("cancelled")]
    Cancelled,
}

/// A fatal error together with everything logged up to it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExtractFailure {
    #[source]
    pub error: ExtractError,
    pub log: DebugLog,
}

/// Outcome of a single stage.
#[derive(Debug)]
pub enum StageError {
    /// Logged; the stage counts as a no-op.
    Recoverable(String),
    Fatal(ExtractError),
}

impl From<ExtractError> for StageError {
    fn from(err: ExtractError) -> Self {
        StageError::Fatal(err)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Readability mode: scorer fallback and icon dropping.
    pub readability: bool,
    /// Resolve outbound links once the container is written.
    pub enrich_links: bool,
    pub cancel: CancellationToken,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            readability: true,
            enrich_links: true,
            cancel: CancellationToken::new(),
        }
    }
}

/// Everything a run produces before it is persisted.
#[derive(Debug, Clone)]
pub struct ArchiveBundle {
    pub index_html: String,
    pub props: Vec<u8>,
    /// Resource files keyed by archive path.
    pub files: BTreeMap<String, Vec<u8>>,
    pub meta: DocumentMeta,
    pub resources: Vec<Resource>,
    pub links: Vec<ExtractedLink>,
    pub log: DebugLog,
}

impl ArchiveBundle {
    fn write_to(&self, writer: &mut ContainerWriter) -> Result<(), ContainerError> {
        writer.add(INDEX_FILE, self.index_html.as_bytes())?;
        writer.add(PROPS_FILE, self.props.clone())?;
        for (name, bytes) in &self.files {
            writer.add(name, bytes.clone())?;
        }
        writer.add(LOG_FILE, self.log.render())
    }
}

#[derive(Debug)]
pub struct ExtractOutcome {
    pub container: PathBuf,
    pub meta: DocumentMeta,
    pub resources: Vec<Resource>,
    pub links: Vec<ExtractedLink>,
    pub enriched: Vec<EnrichedLink>,
    /// The stored log plus anything recorded after the container was written.
    pub log: DebugLog,
}

/// Process-wide archival service. Share one instance between concurrent runs
/// so they share the conversion slots and the per-bookmark locks.
pub struct Archiver {
    config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    rules: Arc<SiteRules>,
    scripts: Arc<ScriptCache>,
    slots: ConversionSlots,
    storage: StoragePaths,
    locks: BookmarkLocks,
}

impl Archiver {
    pub fn new(config: EngineConfig) -> Self {
        let rules = match &config.rules_dir {
            Some(dir) => SiteRules::load(dir.clone()).0,
            None => SiteRules::empty(),
        };
        let scripts = ScriptCache::new(config.scripts.clone());
        scripts.load_all();
        Self {
            fetcher: Arc::new(ReqwestFetcher::new(config.fetch.clone())),
            rules: Arc::new(rules),
            scripts: Arc::new(scripts),
            slots: ConversionSlots::new(config.conversion_slots),
            storage: StoragePaths::new(config.data_dir.clone()),
            locks: BookmarkLocks::new(),
            config,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_rules(mut self, rules: Arc<SiteRules>) -> Self {
        self.rules = rules;
        self
    }

    /// Shares conversion permits with other archivers of the process.
    pub fn with_slots(mut self, slots: ConversionSlots) -> Self {
        self.slots = slots;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rules(&self) -> &SiteRules {
        &self.rules
    }

    pub fn scripts(&self) -> &ScriptCache {
        &self.scripts
    }

    pub fn storage(&self) -> &StoragePaths {
        &self.storage
    }

    /// Archives one document into the bookmark's container, replacing any
    /// previous one. Runs for the same `bookmark_id` never overlap.
    pub async fn extract(
        &self,
        bookmark_id: &str,
        source: SourceDocument,
        source_url: &str,
        options: ExtractOptions,
    ) -> Result<ExtractOutcome, ExtractFailure> {
        let path = match self.storage.container_path(bookmark_id) {
            Ok(path) => path,
            Err(err) => return Err(failure(DebugLog::new(), stage::ARCHIVE, err.into())),
        };
        let _guard = self.locks.lock(bookmark_id).await;
        engine_info!("archiving {bookmark_id} from {source_url}");

        let mut bundle = self.run(source, source_url, &options).await?;
        let mut writer = Container::create(&path);
        stage_info!(
            bundle.log,
            stage::ARCHIVE,
            "writing {} resources to {}",
            bundle.files.len(),
            path.display()
        );
        let committed = bundle.write_to(&mut writer).and_then(|()| writer.commit());
        let container = match committed {
            Ok(container) => container,
            Err(err) => return Err(failure(bundle.log, stage::ARCHIVE, err.into())),
        };

        let enriched = if options.enrich_links && self.config.links.enabled {
            self.enrich(&bundle.links, &options.cancel, &mut bundle.log).await
        } else {
            Vec::new()
        };

        Ok(ExtractOutcome {
            container,
            meta: bundle.meta,
            resources: bundle.resources,
            links: bundle.links,
            enriched,
            log: bundle.log,
        })
    }

    /// Runs every stage up to the archive in memory and returns what would be
    /// stored. Nothing is written.
    pub async fn preview(
        &self,
        source: SourceDocument,
        source_url: &str,
        options: ExtractOptions,
    ) -> Result<ArchiveBundle, ExtractFailure> {
        self.run(source, source_url, &options).await
    }

    async fn run(
        &self,
        source: SourceDocument,
        source_url: &str,
        options: &ExtractOptions,
    ) -> Result<ArchiveBundle, ExtractFailure> {
        let mut ctx = self.prepare(source, source_url, options)?;
        match self.run_stages(&mut ctx, options).await {
            Ok(bundle) => Ok(bundle),
            Err((stage, error)) => Err(failure(ctx.log, stage, error)),
        }
    }

    /// Decodes the source and sets up the context. The site rule is resolved
    /// here because its replacements apply to the raw HTML before parsing.
    fn prepare(
        &self,
        source: SourceDocument,
        source_url: &str,
        options: &ExtractOptions,
    ) -> Result<DocumentContext, ExtractFailure> {
        let mut log = DebugLog::new();
        let url = match Url::parse(source_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                let err = ExtractError::InvalidUrl {
                    url: source_url.to_string(),
                    message: format!("unsupported scheme {}", url.scheme()),
                };
                return Err(failure(log, stage::FETCH, err));
            }
            Err(err) => {
                let err = ExtractError::InvalidUrl {
                    url: source_url.to_string(),
                    message: err.to_string(),
                };
                return Err(failure(log, stage::FETCH, err));
            }
        };
        let decoded = match decode_html(&source.bytes, source.content_type.as_deref()) {
            Ok(decoded) => decoded,
            Err(err) => return Err(failure(log, stage::FETCH, err.into())),
        };
        stage_info!(
            log,
            stage::FETCH,
            "{} bytes from {url} decoded as {}",
            source.bytes.len(),
            decoded.encoding_label
        );

        let mut ctx = DocumentContext::new(url, decoded.html, options.readability);
        ctx.log = log;
        let index = self.rules.current();
        if let Some((key, rule)) = index.resolve(&ctx.domain) {
            ctx.rule = rule.clone();
            ctx.rule_key = Some(key.to_string());
        }
        if !ctx.rule.replace_strings.is_empty() {
            ctx.raw_html = apply_replace_strings(&ctx.raw_html, &ctx.rule);
            stage_debug!(
                ctx.log,
                stage::FETCH,
                "applied {} string replacements",
                ctx.rule.replace_strings.len()
            );
        }
        Ok(ctx)
    }

    async fn run_stages(
        &self,
        ctx: &mut DocumentContext,
        options: &ExtractOptions,
    ) -> Result<ArchiveBundle, (&'static str, ExtractError)> {
        let cancel = &options.cancel;

        checkpoint(cancel, stage::METADATA)?;
        let outcome = self.metadata(ctx).await;
        settle(ctx, stage::METADATA, outcome)?;

        checkpoint(cancel, stage::RULES)?;
        self.report_rule(ctx);

        checkpoint(cancel, stage::SCRIPTS)?;
        let outcome = self.scripts_stage(ctx).await;
        settle(ctx, stage::SCRIPTS, outcome)?;

        checkpoint(cancel, stage::BODY)?;
        let outcome = apply_field_rules(ctx);
        settle(ctx, stage::BODY, outcome)?;
        let outcome = select_rule_body(ctx);
        settle(ctx, stage::BODY, outcome)?;

        checkpoint(cancel, stage::READABILITY)?;
        let article = self.readability(ctx).map_err(|err| (stage::READABILITY, err))?;
        let outcome = clean_article(ctx, article);
        settle(ctx, stage::BODY, outcome)?;

        checkpoint(cancel, stage::ARCHIVE)?;
        let archiver =
            ImageArchiver::new(self.fetcher.as_ref(), &self.config.images, &self.slots, cancel);
        let images = archiver
            .archive(
                &mut ctx.document,
                article,
                &ctx.source_url,
                ctx.readability,
                &mut ctx.log,
            )
            .await;
        ctx.resources = images.resources;
        ctx.files.extend(images.files);
        checkpoint(cancel, stage::ARCHIVE)?;

        let removed = enforce_local_sources(&mut ctx.document, article, &ctx.files);
        if removed > 0 {
            stage_debug!(ctx.log, stage::ARCHIVE, "removed {removed} non-archived sources");
        }

        let links = LinkCollector::with_max_links(self.config.links.max_links).collect(
            &ctx.document,
            article,
            Some(&ctx.source_url),
        );
        stage_debug!(ctx.log, stage::LINKS, "{} outbound links", links.len());

        let index_html = ctx.document.outer_html(article);
        let props = Props::new(ctx, &links, self.config.clock.now())
            .to_json()
            .map_err(|err| (stage::ARCHIVE, err.into()))?;
        stage_info!(
            ctx.log,
            stage::ARCHIVE,
            "article of {} bytes, {} resources kept",
            index_html.len(),
            ctx.files.len()
        );

        Ok(ArchiveBundle {
            index_html,
            props,
            files: std::mem::take(&mut ctx.files),
            meta: ctx.meta.clone(),
            resources: std::mem::take(&mut ctx.resources),
            links,
            log: std::mem::take(&mut ctx.log),
        })
    }

    async fn metadata(&self, ctx: &mut DocumentContext) -> Result<(), StageError> {
        ctx.document = Document::parse(&ctx.raw_html);
        ctx.meta_map = extract_meta(&ctx.document);
        stage_debug!(ctx.log, stage::METADATA, "{} meta keys", ctx.meta_map.len());

        let oembed = match oembed_endpoint(&ctx.meta_map, &ctx.source_url) {
            Some(endpoint) => self.oembed(&endpoint).await,
            None => Ok(None),
        };
        let result = match oembed {
            Ok(Some(payload)) => {
                apply_oembed(&mut ctx.meta_map, &payload);
                stage_debug!(ctx.log, stage::METADATA, "oembed payload applied");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(message) => Err(StageError::Recoverable(format!("oembed: {message}"))),
        };

        ctx.meta = DocumentMeta::from_meta(&ctx.meta_map, &ctx.source_url);
        stage_info!(ctx.log, stage::METADATA, "title: {:?}", ctx.meta.title);
        result
    }

    async fn oembed(&self, endpoint: &Url) -> Result<Option<serde_json::Value>, String> {
        let timeout = self.config.images.resource_timeout;
        let fetch = self.fetcher.fetch(endpoint.as_str(), Accept::Json);
        let output = tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| format!("timed out after {timeout:?}"))?
            .map_err(|err| err.to_string())?;
        serde_json::from_slice(&output.bytes)
            .map(Some)
            .map_err(|err| format!("malformed payload: {err}"))
    }

    fn report_rule(&self, ctx: &mut DocumentContext) {
        match &ctx.rule_key {
            Some(key) => stage_info!(ctx.log, stage::RULES, "site rule {key}"),
            None => stage_debug!(ctx.log, stage::RULES, "no site rule for {}", ctx.domain),
        }
    }

    /// Runs the scripts on the blocking pool, since each one may spend its
    /// whole budget. The context moves there and back.
    async fn scripts_stage(&self, ctx: &mut DocumentContext) -> Result<(), StageError> {
        let scripts = Arc::clone(&self.scripts);
        let log = ctx.log.clone();
        let placeholder =
            DocumentContext::new(ctx.source_url.clone(), String::new(), ctx.readability);
        let mut taken = std::mem::replace(ctx, placeholder);
        let joined = tokio::task::spawn_blocking(move || {
            run_scripts(&scripts, &mut taken);
            taken
        })
        .await;
        match joined {
            Ok(done) => {
                *ctx = done;
                Ok(())
            }
            Err(err) => {
                ctx.log = log;
                Err(ExtractError::ScriptWorker(err.to_string()).into())
            }
        }
    }

    /// Falls back to the scorer, then to the whole body. Returns the article
    /// section.
    fn readability(&self, ctx: &mut DocumentContext) -> Result<NodeId, ExtractError> {
        if let Some(article) = ctx.article {
            return Ok(article);
        }
        let scorer = ctx.rule.readability.unwrap_or(ctx.readability);
        if scorer {
            match Readability::new(&self.config.readability).extract(&mut ctx.document) {
                Ok(outcome) => {
                    stage_info!(
                        ctx.log,
                        stage::READABILITY,
                        "score {:.1} over {} candidates, {} nodes pruned",
                        outcome.score,
                        outcome.candidates,
                        outcome.pruned
                    );
                    let article = ctx.document.replace_body_content(&outcome.nodes)?;
                    ctx.body_source = BodySource::Readability;
                    ctx.article = Some(article);
                    return Ok(article);
                }
                Err(miss) => {
                    stage_warn!(ctx.log, stage::READABILITY, "{miss}; keeping the whole body")
                }
            }
        } else {
            stage_debug!(ctx.log, stage::READABILITY, "scorer disabled");
        }
        let body = ctx.document.body().ok_or(DomError::Detached)?;
        let article = ctx.document.replace_body_content(&[body])?;
        ctx.body_source = BodySource::WholeBody;
        ctx.article = Some(article);
        Ok(article)
    }

    async fn enrich(
        &self,
        links: &[ExtractedLink],
        cancel: &CancellationToken,
        log: &mut DebugLog,
    ) -> Vec<EnrichedLink> {
        let enriched = LinkEnricher::new(self.fetcher.as_ref(), &self.config.links)
            .enrich(links, cancel)
            .await;
        let failed = enriched.iter().filter(|link| link.error.is_some()).count();
        stage_info!(
            log,
            stage::LINKS,
            "{} links enriched, {failed} unreachable",
            enriched.len()
        );
        enriched
    }
}

fn failure(mut log: DebugLog, stage: &str, error: ExtractError) -> ExtractFailure {
    stage_error!(log, stage, "{error}");
    engine_warn!("archival failed: {error}");
    ExtractFailure { error, log }
}

fn checkpoint(
    cancel: &CancellationToken,
    stage: &'static str,
) -> Result<(), (&'static str, ExtractError)> {
    if cancel.is_cancelled() {
        Err((stage, ExtractError::Cancelled))
    } else {
        Ok(())
    }
}

fn settle(
    ctx: &mut DocumentContext,
    stage: &'static str,
    outcome: Result<(), StageError>,
) -> Result<(), (&'static str, ExtractError)> {
    match outcome {
        Ok(()) => Ok(()),
        Err(StageError::Recoverable(message)) => {
            stage_warn!(ctx.log, stage, "{message}");
            Ok(())
        }
        Err(StageError::Fatal(err)) => Err((stage, err)),
    }
}

fn recoverable(err: DomError) -> StageError {
    StageError::Recoverable(err.to_string())
}

fn run_scripts(scripts: &ScriptCache, ctx: &mut DocumentContext) {
    let registry = scripts.load_all();
    let applicable = registry.applicable(&ctx.domain, &ctx.raw_html);
    if applicable.is_empty() {
        stage_debug!(ctx.log, stage::SCRIPTS, "no applicable scripts");
        return;
    }
    let runner = ScriptRunner::new(scripts.settings());
    for program in applicable {
        let document = ctx.document.clone();
        let meta = ctx.meta.clone();
        let env = ScriptEnv {
            host: &ctx.domain,
            url: ctx.source_url.as_str(),
            document: &mut ctx.document,
            meta: &mut ctx.meta,
            log: &mut ctx.log,
        };
        match runner.run(&program, env) {
            Ok(edits) => {
                stage_info!(
                    ctx.log,
                    stage::SCRIPTS,
                    "{} ran, {} rule edits",
                    program.name,
                    edits.len()
                );
                if !edits.is_empty() {
                    ctx.rule = ctx.rule.merge(&edits);
                }
                ctx.scripts_run.push(program.name.clone());
            }
            Err(err) => {
                ctx.document = document;
                ctx.meta = meta;
                stage_error!(ctx.log, stage::SCRIPTS, "{err}");
            }
        }
    }
}

/// A rule title overrides the extracted one. Rule authors are added to the
/// extracted ones, and a rule date only fills a missing one.
fn apply_field_rules(ctx: &mut DocumentContext) -> Result<(), StageError> {
    if let Some(title) = first_text(&ctx.document, &ctx.rule.title).map_err(recoverable)? {
        stage_debug!(ctx.log, stage::BODY, "title from site rule");
        ctx.meta.title = title;
    }
    for author in all_texts(&ctx.document, &ctx.rule.author).map_err(recoverable)? {
        if !ctx.meta.authors.contains(&author) {
            stage_debug!(ctx.log, stage::BODY, "author {author:?} from site rule");
            ctx.meta.authors.push(author);
        }
    }
    if ctx.meta.published.is_none() {
        let dates = all_texts(&ctx.document, &ctx.rule.date).map_err(recoverable)?;
        if let Some(date) = dates.iter().find_map(|text| parse_date(text)) {
            stage_debug!(ctx.log, stage::BODY, "date {date} from site rule");
            ctx.meta.published = Some(date);
        }
    }
    Ok(())
}

const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Parses a date as printed on a page into RFC 3339. Times without a zone
/// are taken as UTC, dates without a time as midnight.
fn parse_date(text: &str) -> Option<String> {
    let text = text.trim();
    let parsed = DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .map(|at| at.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            DATE_TIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .or_else(|| {
                    DATE_FORMATS
                        .iter()
                        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                })
                .map(|naive| naive.and_utc())
        })?;
    Some(parsed.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn select_rule_body(ctx: &mut DocumentContext) -> Result<(), StageError> {
    let root = ctx.document.root();
    let unwrapped = unwrap_noscript_images(&mut ctx.document, root);
    if unwrapped > 0 {
        stage_debug!(ctx.log, stage::BODY, "{unwrapped} images taken out of noscript");
    }
    let stripped = strip(&mut ctx.document, &ctx.rule).map_err(recoverable)?;
    if stripped > 0 {
        stage_debug!(ctx.log, stage::BODY, "stripped {stripped} elements");
    }
    match select_body(&ctx.document, &ctx.rule).map_err(recoverable)? {
        Some((css, nodes)) => {
            let article = ctx.document.replace_body_content(&nodes).map_err(ExtractError::from)?;
            stage_info!(ctx.log, stage::BODY, "body from {css:?}, {} nodes", nodes.len());
            ctx.article = Some(article);
            ctx.body_source = BodySource::SiteRule;
        }
        None if !ctx.rule.body.is_empty() => {
            stage_warn!(ctx.log, stage::BODY, "no body selector matched");
        }
        None => {}
    }
    Ok(())
}

fn clean_article(ctx: &mut DocumentContext, article: NodeId) -> Result<(), StageError> {
    let absolutized = absolutize_links(&mut ctx.document, article, &ctx.source_url);
    let removed = remove_scripting(&mut ctx.document).map_err(recoverable)?;
    stage_debug!(
        ctx.log,
        stage::BODY,
        "{absolutized} links absolutized, {removed} scripting elements removed"
    );
    Ok(())
}

/// Leaves only `src` values naming an archived file: other images go, other
/// elements lose the attribute, and `srcset` and `<source>` are removed.
fn enforce_local_sources(
    doc: &mut Document,
    scope: NodeId,
    files: &BTreeMap<String, Vec<u8>>,
) -> usize {
    let mut removed = 0;
    for node in doc.select_in(scope, "source").unwrap_or_default() {
        if doc.is_attached(node) && doc.detach(node).is_ok() {
            removed += 1;
        }
    }
    for node in doc.select_in(scope, "[src]").unwrap_or_default() {
        let Some(src) = doc.attr(node, "src") else {
            continue;
        };
        if files.contains_key(&src) || !doc.is_attached(node) {
            continue;
        }
        let done = if doc.tag(node).as_deref() == Some("img") {
            doc.detach(node)
        } else {
            doc.remove_attr(node, "src")
        };
        if done.is_ok() {
            removed += 1;
        }
    }
    for node in doc.select_in(scope, "[srcset]").unwrap_or_default() {
        let _ = doc.remove_attr(node, "srcset");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn only_archived_sources_survive() {
        let mut doc = Document::parse(
            r#"<body><section id="article">
                <img src="_resources/a.png"><img src="https://x.org/gone.png">
                <video src="https://x.org/v.mp4"><source src="https://x.org/v.webm"></video>
                <img src="_resources/a.png" srcset="https://x.org/big.png 2x">
            </section></body>"#,
        );
        let scope = doc.first("#article").unwrap().unwrap();
        let files = BTreeMap::from([("_resources/a.png".to_string(), Vec::new())]);

        assert_eq!(enforce_local_sources(&mut doc, scope, &files), 3);
        let html = doc.outer_html(scope);
        assert!(!html.contains("https://x.org"));
        assert_eq!(html.matches("_resources/a.png").count(), 2);
        assert!(html.contains("<video>"));
    }

    #[test]
    fn page_dates_are_normalized() {
        assert_eq!(parse_date(" 2024-03-02 ").as_deref(), Some("2024-03-02T00:00:00Z"));
        assert_eq!(
            parse_date("2024-03-02T10:30:00+02:00").as_deref(),
            Some("2024-03-02T08:30:00Z")
        );
        assert_eq!(
            parse_date("Sat, 02 Mar 2024 10:30:00 GMT").as_deref(),
            Some("2024-03-02T10:30:00Z")
        );
        assert_eq!(parse_date("March 2, 2024").as_deref(), Some("2024-03-02T00:00:00Z"));
        assert_eq!(parse_date("2 Mar 2024").as_deref(), Some("2024-03-02T00:00:00Z"));
        assert_eq!(parse_date("Last edited: yesterday"), None);
        assert_eq!(parse_date(""), None);
    }
}
