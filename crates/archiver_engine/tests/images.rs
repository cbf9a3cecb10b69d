use std::io::Cursor;

use archiver_core::{resource_name, Document, ResourceState};
use archiver_engine::{
    ConversionSlots, FetchSettings, ImageArchiver, ImageSettings, ReqwestFetcher,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use engine_logging::DebugLog;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 120, 200])));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

async fn serve(server: &MockServer, route: &str, bytes: Vec<u8>, content_type: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(bytes, content_type))
        .expect(1)
        .mount(server)
        .await;
}

struct Harness {
    fetcher: ReqwestFetcher,
    settings: ImageSettings,
    slots: ConversionSlots,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        Self {
            fetcher: ReqwestFetcher::new(FetchSettings::default()),
            settings: ImageSettings::default(),
            slots: ConversionSlots::new(2),
            cancel: CancellationToken::new(),
        }
    }

    async fn archive(
        &self,
        doc: &mut Document,
        base: &str,
        readability: bool,
    ) -> archiver_engine::ArchivedImages {
        let scope = doc.first("#article").unwrap().unwrap();
        let base = Url::parse(base).unwrap();
        ImageArchiver::new(&self.fetcher, &self.settings, &self.slots, &self.cancel)
            .archive(doc, scope, &base, readability, &mut DebugLog::new())
            .await
    }
}

fn article(body: &str) -> Document {
    Document::parse(&format!(
        r#"<html><body><section id="article">{body}</section></body></html>"#
    ))
}

#[tokio::test]
async fn wide_webp_is_converted_and_downscaled() {
    let server = MockServer::start().await;
    serve(&server, "/a.webp", encode(2000, 1000, ImageFormat::WebP), "image/webp").await;
    let url = format!("{}/a.webp", server.uri());

    let mut doc = article(&format!(r#"<p>Intro</p><img src="{url}" width="2000" height="1000">"#));
    let archived = Harness::new().archive(&mut doc, &server.uri(), true).await;

    assert_eq!(archived.resources.len(), 1);
    let resource = &archived.resources[0];
    assert_eq!(resource.state, ResourceState::Converted);
    assert!(matches!(
        resource.content_type.as_deref(),
        Some("image/jpeg") | Some("image/png")
    ));
    assert_eq!((resource.width, resource.height), (1536, 768));
    let extension = if resource.name.ends_with(".png") { "png" } else { "jpg" };
    assert_eq!(resource.name, resource_name(&url, extension));

    let img = doc.first("img").unwrap().unwrap();
    assert_eq!(doc.attr(img, "src").as_deref(), Some(resource.name.as_str()));
    assert_eq!(doc.attr(img, "width").as_deref(), Some("1536"));
    assert_eq!(doc.attr(img, "height").as_deref(), Some("768"));
    assert_eq!(archived.files[0].0, resource.name);
}

#[tokio::test]
async fn icon_is_dropped_and_photo_kept() {
    let server = MockServer::start().await;
    serve(&server, "/icon.png", encode(32, 32, ImageFormat::Png), "image/png").await;
    serve(&server, "/photo.jpg", encode(1200, 800, ImageFormat::Jpeg), "image/jpeg").await;
    let icon = format!("{}/icon.png", server.uri());
    let photo = format!("{}/photo.jpg", server.uri());

    let mut doc = article(&format!(r#"<img src="{icon}"><img src="{photo}">"#));
    let archived = Harness::new().archive(&mut doc, &server.uri(), true).await;

    assert_eq!(archived.resources[0].state, ResourceState::Dropped("icon".into()));
    assert_eq!(archived.resources[1].state, ResourceState::Copied);
    assert_eq!(archived.files.len(), 1);
    assert_eq!(archived.files[0].0, resource_name(&photo, "jpg"));

    let imgs = doc.select("img").unwrap();
    assert_eq!(imgs.len(), 1);
    assert_eq!(
        doc.attr(imgs[0], "src"),
        Some(resource_name(&photo, "jpg"))
    );
}

#[tokio::test]
async fn icons_stay_without_readability_or_inside_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/star.png"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(encode(16, 16, ImageFormat::Png), "image/png"),
        )
        .mount(&server)
        .await;
    let star = format!("{}/star.png", server.uri());
    let harness = Harness::new();

    let mut plain = article(&format!(r#"<img src="{star}">"#));
    let archived = harness.archive(&mut plain, &server.uri(), false).await;
    assert_eq!(archived.resources[0].state, ResourceState::Copied);

    let mut inline = article(&format!(r#"<p>Rated <img src="{star}"> by readers</p>"#));
    let archived = harness.archive(&mut inline, &server.uri(), true).await;
    assert_eq!(archived.resources[0].state, ResourceState::Copied);
    assert_eq!(inline.select("img").unwrap().len(), 1);
}

#[tokio::test]
async fn declared_icon_size_skips_the_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    let mut doc = article(&format!(
        r#"<img src="{}/logo.png" width="24" height="24">"#,
        server.uri()
    ));

    let archived = Harness::new().archive(&mut doc, &server.uri(), true).await;
    assert_eq!(archived.resources[0].state, ResourceState::Dropped("icon".into()));
    assert!(doc.select("img").unwrap().is_empty());
}

#[tokio::test]
async fn repeated_references_share_one_fetch_and_name() {
    let server = MockServer::start().await;
    serve(&server, "/same.gif", encode(300, 200, ImageFormat::Gif), "image/gif").await;
    let url = format!("{}/same.gif", server.uri());

    let mut doc = article(&format!(r#"<img src="{url}"><p>between</p><img src="/same.gif">"#));
    let archived = Harness::new().archive(&mut doc, &server.uri(), true).await;

    assert_eq!(archived.resources.len(), 1);
    let name = resource_name(&url, "gif");
    for img in doc.select("img").unwrap() {
        assert_eq!(doc.attr(img, "src"), Some(name.clone()));
    }
}

#[tokio::test]
async fn failures_drop_only_the_affected_reference() {
    let server = MockServer::start().await;
    serve(&server, "/ok.png", encode(100, 40, ImageFormat::Png), "image/png").await;
    serve(&server, "/junk.png", b"definitely not an image".to_vec(), "image/png").await;
    let ok = format!("{}/ok.png", server.uri());

    let mut doc = article(&format!(
        r#"<img src="{ok}"><img src="{0}/junk.png"><img src="{0}/missing.png">"#,
        server.uri()
    ));
    let archived = Harness::new().archive(&mut doc, &server.uri(), true).await;

    let states: Vec<_> = archived.resources.iter().map(|r| r.state.clone()).collect();
    assert_eq!(states[0], ResourceState::Copied);
    assert!(matches!(states[1], ResourceState::Dropped(_)));
    assert!(matches!(states[2], ResourceState::Dropped(_)));
    assert_eq!(doc.select("img").unwrap().len(), 1);
}

#[tokio::test]
async fn data_uris_and_picture_sources_are_archived() {
    let server = MockServer::start().await;
    serve(&server, "/wide.png", encode(800, 400, ImageFormat::Png), "image/png").await;
    let png = STANDARD.encode(encode(120, 60, ImageFormat::Png));
    let data_uri = format!("data:image/png;base64,{png}");

    let mut doc = article(&format!(
        r#"<img src="{data_uri}">
           <picture><source srcset="/wide.png 800w"><img src="/narrow.png"></picture>"#
    ));
    let archived = Harness::new().archive(&mut doc, &server.uri(), true).await;

    assert_eq!(archived.resources.len(), 2);
    assert_eq!(archived.resources[0].name, resource_name(&data_uri, "png"));
    assert_eq!(
        archived.resources[1].source_uri,
        format!("{}/wide.png", server.uri())
    );
    assert!(doc.select("source").unwrap().is_empty());
    for img in doc.select("img").unwrap() {
        assert!(doc.attr(img, "src").unwrap().starts_with("_resources/"));
        assert_eq!(doc.attr(img, "srcset"), None);
    }
}

#[tokio::test]
async fn exhausted_slots_drop_images_that_need_conversion() {
    let server = MockServer::start().await;
    serve(&server, "/big.bmp", encode(200, 100, ImageFormat::Bmp), "image/bmp").await;
    let mut harness = Harness::new();
    harness.slots = ConversionSlots::new(1);
    harness.settings.conversion_wait = std::time::Duration::from_millis(20);
    let _held = harness
        .slots
        .acquire(std::time::Duration::from_secs(1), &harness.cancel)
        .await
        .unwrap();

    let mut doc = article(&format!(r#"<img src="{}/big.bmp">"#, server.uri()));
    let archived = harness.archive(&mut doc, &server.uri(), true).await;

    assert!(matches!(archived.resources[0].state, ResourceState::Dropped(_)));
    assert!(doc.select("img").unwrap().is_empty());
}
