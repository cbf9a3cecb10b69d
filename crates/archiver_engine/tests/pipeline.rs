use std::fs;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use archiver_core::{Document, SiteRuleIndex};
use archiver_engine::{
    Accept, Archiver, Clock, Container, DecodeError, EngineConfig, ExtractError, ExtractOptions,
    FetchError, FetchMetadata, FetchOutput, Fetcher, SiteRules, SourceDocument, INDEX_FILE,
    LOG_FILE,
};
use chrono::{TimeZone, Utc};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const URL: &str = "https://example.com/notes/river";
const PARAGRAPH: &str = "The river was higher than last spring, the banks were soft, and the \
    path along the east side had washed out in two places, so we crossed at the old ford instead.";

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 90, 30])));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

fn page(image_base: &str) -> SourceDocument {
    let paragraphs = format!("<p>{PARAGRAPH}</p>").repeat(4);
    SourceDocument::from_html(format!(
        r#"<!doctype html><html><head><title>Field notes | Example</title>
        <meta property="og:title" content="Field notes">
        <script>track()</script></head>
        <body>
          <nav class="menu"><a href="/">Home</a> <a href="/about">About us</a></nav>
          <div class="story">
            <h1>Field notes</h1>
            {paragraphs}
            <p><img src="{image_base}/photo.jpg" width="1200" height="800"></p>
            <p><img src="{image_base}/gone.png" width="600" height="300"></p>
            <p class="ad">Buy the waders now</p>
            <p>See <a href="/notes/ford">the follow-up</a>, {PARAGRAPH}</p>
            <video src="https://cdn.example.com/clip.mp4"></video>
          </div>
          <footer class="footer">Copyright, all rights reserved</footer>
        </body></html>"#
    ))
}

async fn image_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/photo.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(jpeg(1200, 800), "image/jpeg"))
        .mount(&server)
        .await;
    server
}

fn config(data_dir: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::new(data_dir);
    config.clock = Clock::fixed(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    config
}

fn rules(documents: &[(&str, &str)]) -> Arc<SiteRules> {
    let (index, errors) = SiteRuleIndex::from_documents(documents.iter().copied());
    assert!(errors.is_empty(), "{errors:?}");
    Arc::new(SiteRules::from_index(index))
}

fn options() -> ExtractOptions {
    ExtractOptions {
        enrich_links: false,
        ..ExtractOptions::default()
    }
}

fn props(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn body_rule_is_kept_verbatim() {
    let server = image_server().await;
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path())).with_rules(rules(&[(
        "example.com",
        r#"{"body": [".story"], "strip": [{"css": ".ad"}]}"#,
    )]));

    let bundle = archiver.preview(page(&server.uri()), URL, options()).await.unwrap();

    assert!(bundle.index_html.starts_with("<section"));
    assert!(bundle.index_html.contains(r#"id="article""#));
    assert!(bundle.index_html.contains(r#"<div class="story">"#));
    assert!(!bundle.index_html.contains("waders"));
    assert!(!bundle.index_html.contains("About us"));
    assert!(!bundle.index_html.contains("<script"));
    assert!(bundle.index_html.contains(r#"href="https://example.com/notes/ford""#));

    let props = props(&bundle.props);
    assert_eq!(props["body_source"], "site_rule");
    assert_eq!(props["site_rule"], "example.com");
    assert_eq!(props["title"], "Field notes");
    assert_eq!(props["archived"], "2024-05-01T12:00:00Z");
}

#[tokio::test]
async fn readability_picks_the_body_without_a_body_rule() {
    let server = image_server().await;
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path()))
        .with_rules(rules(&[("example.com", r#"{"author": [".byline"]}"#)]));

    let bundle = archiver.preview(page(&server.uri()), URL, options()).await.unwrap();

    assert!(bundle.index_html.contains("washed out in two places"));
    assert!(!bundle.index_html.contains("About us"));
    assert_eq!(props(&bundle.props)["body_source"], "readability");
}

#[tokio::test]
async fn archived_document_has_no_dangling_sources() {
    let server = image_server().await;
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path()));

    let outcome = archiver
        .extract("river-1", page(&server.uri()), URL, options())
        .await
        .unwrap();

    let mut reader = Container::open(&outcome.container).unwrap();
    let html = reader.get_text(INDEX_FILE).unwrap();
    let doc = Document::parse(&html);
    let sources: Vec<String> = doc
        .select("[src]")
        .unwrap()
        .into_iter()
        .filter_map(|node| doc.attr(node, "src"))
        .collect();
    assert_eq!(sources.len(), 1);
    for src in &sources {
        assert!(reader.get_file(src).is_ok(), "{src} missing from container");
    }
    assert!(doc.select("[srcset]").unwrap().is_empty());
    assert_eq!(reader.list_resources(), sources);

    assert_eq!(outcome.resources.len(), 2);
    assert!(outcome.log.render().contains("[WARN] archive: dropped"));
}

#[tokio::test]
async fn same_input_gives_the_same_archive() {
    let server = image_server().await;
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path()));

    let first = archiver.preview(page(&server.uri()), URL, options()).await.unwrap();
    let second = archiver.preview(page(&server.uri()), URL, options()).await.unwrap();

    assert_eq!(first.index_html, second.index_html);
    assert_eq!(first.props, second.props);
    assert_eq!(first.files, second.files);
}

#[tokio::test]
async fn preview_writes_nothing() {
    let server = image_server().await;
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path()));

    let bundle = archiver.preview(page(&server.uri()), URL, options()).await.unwrap();

    assert_eq!(bundle.files.len(), 1);
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn empty_document_fails_with_its_log() {
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path()));

    let failure = archiver
        .extract("empty", SourceDocument::from_html(""), URL, options())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, ExtractError::Decode(DecodeError::Empty)));
    assert!(failure
        .log
        .render()
        .contains("[ERRO] fetch: cannot decode document: document is empty"));
    assert!(!archiver.storage().container_path("empty").unwrap().exists());
}

#[tokio::test]
async fn non_http_source_url_is_rejected() {
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path()));

    for url in ["ftp://example.com/a", "not a url"] {
        let failure = archiver
            .preview(SourceDocument::from_html("<p>x</p>"), url, options())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ExtractError::InvalidUrl { .. }), "{url}");
    }
}

#[tokio::test]
async fn invalid_bookmark_id_is_rejected_before_work() {
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path()));

    let failure = archiver
        .extract("../escape", SourceDocument::from_html("<p>x</p>"), URL, options())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ExtractError::Storage(_)));
}

#[tokio::test]
async fn cancelled_run_stops_at_the_next_stage() {
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path()));
    let options = options();
    options.cancel.cancel();

    let failure = archiver
        .extract("cancelled", SourceDocument::from_html("<p>x</p>"), URL, options)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ExtractError::Cancelled));
    assert!(failure.log.render().contains("[ERRO] metadata: cancelled"));
}

#[tokio::test]
async fn noscript_image_replaces_its_lazy_placeholder() {
    let server = image_server().await;
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path()))
        .with_rules(rules(&[("example.com", r#"{"body": ["article"]}"#)]));
    let source = SourceDocument::from_html(format!(
        r#"<body><article><p>{PARAGRAPH}</p>
           <p><img class="lazy" src="data:image/gif;base64,R0lGODlhAQABAAAAACw=">
           <noscript><img src="{}/photo.jpg" width="1200" height="800"></noscript></p>
           </article></body>"#,
        server.uri()
    ));

    let bundle = archiver.preview(source, URL, options()).await.unwrap();

    assert_eq!(bundle.files.len(), 1);
    let name = bundle.files.keys().next().unwrap();
    assert!(bundle.index_html.contains(&format!(r#"src="{name}""#)));
    assert!(!bundle.index_html.contains("lazy"));
    assert!(!bundle.index_html.contains("noscript"));
}

fn dated_page(head: &str) -> SourceDocument {
    SourceDocument::from_html(format!(
        r#"<html><head><title>Notes</title><meta name="author" content="Ann Meta">{head}</head>
        <body><article>
          <p class="byline">Bob</p><p class="byline">Ann Meta</p><span class="credit">Cy</span>
          <p class="updated">Last edited: yesterday</p><p class="updated">March 2, 2024</p>
          <p>{PARAGRAPH}</p>
        </article></body></html>"#
    ))
}

#[tokio::test]
async fn rule_fields_add_authors_and_only_fill_a_missing_date() {
    let temp = TempDir::new().unwrap();
    let archiver = Archiver::new(config(temp.path())).with_rules(rules(&[(
        "example.com",
        r#"{"body": ["article"], "author": [".byline", ".credit"], "date": [".updated"]}"#,
    )]));

    let published = r#"<meta property="article:published_time" content="2020-01-02T03:04:05Z">"#;
    let bundle = archiver.preview(dated_page(published), URL, options()).await.unwrap();
    assert_eq!(bundle.meta.published.as_deref(), Some("2020-01-02T03:04:05Z"));
    assert_eq!(
        bundle.meta.authors,
        vec!["Ann Meta".to_string(), "Bob".to_string(), "Cy".to_string()]
    );

    let bundle = archiver.preview(dated_page(""), URL, options()).await.unwrap();
    assert_eq!(bundle.meta.published.as_deref(), Some("2024-03-02T00:00:00Z"));
}

#[tokio::test]
async fn slow_oembed_endpoint_only_costs_a_warning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oembed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"type": "photo"}"#, "application/json")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let temp = TempDir::new().unwrap();
    let mut config = config(temp.path());
    config.images.resource_timeout = Duration::from_millis(200);
    let archiver = Archiver::new(config);
    let source = SourceDocument::from_html(format!(
        r#"<html><head><title>Field notes</title>
        <link rel="alternate" type="application/json+oembed" href="{}/oembed"></head>
        <body><article><p>{PARAGRAPH}</p><p>{PARAGRAPH}</p></article></body></html>"#,
        server.uri()
    ));

    let outcome = archiver.extract("slow-oembed", source, URL, options()).await.unwrap();

    assert!(outcome.container.exists());
    assert_eq!(outcome.meta.title, "Field notes");
    let log = outcome.log.render();
    assert!(log.contains("[WARN] metadata: oembed: timed out"), "{log}");
    let mut reader = Container::open(&outcome.container).unwrap();
    assert!(reader.get_text(LOG_FILE).unwrap().contains("oembed: timed out"));
}

fn scripted(temp: &TempDir, scripts: &[(&str, &str)]) -> Archiver {
    let dir = temp.path().join("scripts");
    fs::create_dir_all(&dir).unwrap();
    for (name, source) in scripts {
        fs::write(dir.join(name), source).unwrap();
    }
    let mut config = config(&temp.path().join("data"));
    config.scripts.roots = vec![dir];
    Archiver::new(config)
}

#[tokio::test]
async fn matching_script_edits_metadata_and_rule() {
    let server = image_server().await;
    let temp = TempDir::new().unwrap();
    let archiver = scripted(
        &temp,
        &[(
            "river.lua",
            r#"return {
                 domains = { "example.com" },
                 set_config = function(rule) rule.add_body(".story") end,
                 process_meta = function(meta) meta.title = "Retitled" end,
               }"#,
        )],
    );

    let bundle = archiver.preview(page(&server.uri()), URL, options()).await.unwrap();

    assert_eq!(bundle.meta.title, "Retitled");
    let props = props(&bundle.props);
    assert_eq!(props["scripts"], serde_json::json!(["river.lua"]));
    assert_eq!(props["body_source"], "site_rule");
}

#[tokio::test]
async fn non_matching_script_changes_nothing() {
    let server = image_server().await;
    let plain_dir = TempDir::new().unwrap();
    let plain = Archiver::new(config(plain_dir.path()));
    let temp = TempDir::new().unwrap();
    let archiver = scripted(
        &temp,
        &[(
            "other.lua",
            r#"return {
                 domains = { "other.org" },
                 document_ready = function(dom) dom.remove(dom.body()) end,
               }"#,
        )],
    );

    let expected = plain.preview(page(&server.uri()), URL, options()).await.unwrap();
    let bundle = archiver.preview(page(&server.uri()), URL, options()).await.unwrap();

    assert_eq!(bundle.index_html, expected.index_html);
    assert_eq!(bundle.props, expected.props);
}

#[tokio::test]
async fn failing_script_is_rolled_back() {
    let server = image_server().await;
    let temp = TempDir::new().unwrap();
    let archiver = scripted(
        &temp,
        &[(
            "broken.lua",
            r#"return {
                 domains = "*",
                 document_ready = function(dom)
                   for _, p in ipairs(dom.select("p")) do dom.remove(p) end
                   error("gave up")
                 end,
               }"#,
        )],
    );

    let bundle = archiver.preview(page(&server.uri()), URL, options()).await.unwrap();

    assert!(bundle.index_html.contains("washed out in two places"));
    assert_eq!(props(&bundle.props)["scripts"], serde_json::json!([]));
    assert!(bundle.log.render().contains("[ERRO] scripts:"));
}

#[tokio::test]
async fn spinning_script_leaves_the_runtime_free() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("scripts");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("spin.lua"),
        r#"return { domains = "*", document_ready = function(dom) while true do end end }"#,
    )
    .unwrap();
    let mut config = config(&temp.path().join("data"));
    config.scripts.roots = vec![dir];
    config.scripts.budget = Duration::from_millis(300);
    let archiver = Archiver::new(config);
    let source =
        SourceDocument::from_html(format!("<body><article><p>{PARAGRAPH}</p></article></body>"));

    let started = Instant::now();
    let ticker = async {
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        started.elapsed()
    };
    let run = async {
        let bundle = archiver.preview(source, URL, options()).await;
        (bundle, started.elapsed())
    };
    let (ticked, (bundle, finished)) = tokio::join!(ticker, run);

    let bundle = bundle.unwrap();
    assert!(bundle.log.render().contains("[ERRO] scripts:"));
    assert!(ticked < finished, "ticker {ticked:?}, run {finished:?}");
}

/// Serves one image per request and records how many requests overlap.
struct Gate {
    image: Vec<u8>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            image: jpeg(400, 300),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl Fetcher for Gate {
    async fn fetch(&self, url: &str, _accept: Accept) -> Result<FetchOutput, FetchError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(FetchOutput {
            bytes: self.image.clone(),
            metadata: FetchMetadata {
                original_url: url.to_string(),
                final_url: url.to_string(),
                redirect_count: 0,
                content_type: Some("image/jpeg".to_string()),
                byte_len: self.image.len() as u64,
            },
        })
    }
}

fn gated_page() -> SourceDocument {
    SourceDocument::from_html(format!(
        r#"<body><article><p>{PARAGRAPH}</p><p>{PARAGRAPH}</p>
           <p><img src="https://img.example.com/a.jpg"></p></article></body>"#
    ))
}

#[tokio::test]
async fn runs_for_one_bookmark_never_overlap() {
    let temp = TempDir::new().unwrap();
    let gate = Gate::new();
    let archiver = Archiver::new(config(temp.path())).with_fetcher(gate.clone());

    let (a, b) = tokio::join!(
        archiver.extract("same", gated_page(), URL, options()),
        archiver.extract("same", gated_page(), URL, options()),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(gate.peak.load(Ordering::SeqCst), 1);

    let gate = Gate::new();
    let archiver = Archiver::new(config(temp.path())).with_fetcher(gate.clone());
    let (a, b) = tokio::join!(
        archiver.extract("left", gated_page(), URL, options()),
        archiver.extract("right", gated_page(), URL, options()),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(gate.peak.load(Ordering::SeqCst), 2);
}
