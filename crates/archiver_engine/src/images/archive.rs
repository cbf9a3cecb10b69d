use std::borrow::Cow;

use archiver_core::{
    discover_images, is_icon_size, is_inline_with_text, merge_picture_sources, resource_name,
    Document, NodeId, Resource, ResourceState,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use engine_logging::{stage_debug, stage_info, stage_warn, DebugLog};
use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::convert::{self, SourceKind};
use super::slots::ConversionSlots;
use crate::config::ImageSettings;
use crate::context::stage;
use crate::{Accept, Fetcher};

/// One `<img>` pointing at a group's URL.
struct Reference {
    node: NodeId,
    width: Option<u32>,
    height: Option<u32>,
    inline: bool,
}

impl Reference {
    /// Rendered size: declared attributes win, a single declared side scales
    /// the other.
    fn rendered(&self, intrinsic: (u32, u32)) -> (u32, u32) {
        let (w, h) = intrinsic;
        match (self.width, self.height) {
            (Some(dw), Some(dh)) => (dw, dh),
            (Some(dw), None) if w > 0 => (dw, scale(h, dw, w)),
            (None, Some(dh)) if h > 0 => (scale(w, dh, h), dh),
            _ => intrinsic,
        }
    }
}

fn scale(value: u32, numerator: u32, denominator: u32) -> u32 {
    (u64::from(value) * u64::from(numerator) / u64::from(denominator.max(1))) as u32
}

/// Every reference to one unique source URL.
struct Group {
    url: String,
    refs: Vec<Reference>,
}

struct Stored {
    name: String,
    bytes: Vec<u8>,
    content_type: String,
    width: u32,
    height: u32,
    converted: bool,
}

enum Outcome {
    Stored(Stored),
    Icon,
    Failed(String),
}

struct Processed {
    outcome: Outcome,
    /// Per reference, whether it renders as an icon.
    icons: Vec<bool>,
}

/// Resources of one run and the container entries they produced.
#[derive(Debug, Default)]
pub struct ArchivedImages {
    pub resources: Vec<Resource>,
    pub files: Vec<(String, Vec<u8>)>,
}

/// Fetches, filters and stores the images of one document.
pub struct ImageArchiver<'a> {
    fetcher: &'a dyn Fetcher,
    settings: &'a ImageSettings,
    slots: &'a ConversionSlots,
    cancel: &'a CancellationToken,
}

impl<'a> ImageArchiver<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        settings: &'a ImageSettings,
        slots: &'a ConversionSlots,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            settings,
            slots,
            cancel,
        }
    }

    /// Archives every image under `scope`. Kept references point at their
    /// archive name afterwards; dropped ones are removed from the document.
    pub async fn archive(
        &self,
        doc: &mut Document,
        scope: NodeId,
        base: &Url,
        readability: bool,
        log: &mut DebugLog,
    ) -> ArchivedImages {
        let merged = merge_picture_sources(doc, scope);
        if merged > 0 {
            stage_debug!(log, stage::ARCHIVE, "merged {merged} picture source sets");
        }
        let groups = group_references(doc, scope, base);
        if groups.is_empty() {
            return ArchivedImages::default();
        }
        let total: usize = groups.iter().map(|g| g.refs.len()).sum();
        stage_info!(
            log,
            stage::ARCHIVE,
            "{total} image references, {} unique",
            groups.len()
        );

        let mut processed: Vec<Option<Processed>> = groups.iter().map(|_| None).collect();
        let mut results = stream::iter(groups.iter().enumerate())
            .map(|(index, group)| async move { (index, self.process(group, readability).await) })
            .buffer_unordered(self.settings.fetch_concurrency.max(1));
        while let Some((index, result)) = results.next().await {
            processed[index] = Some(result);
        }
        drop(results);

        let mut archived = ArchivedImages::default();
        for (group, result) in groups.iter().zip(processed) {
            let Some(Processed { outcome, icons }) = result else {
                continue;
            };
            let shown = display_uri(&group.url);
            match outcome {
                Outcome::Stored(stored) => {
                    for (reference, icon) in group.refs.iter().zip(&icons) {
                        if *icon {
                            let _ = doc.detach(reference.node);
                        } else {
                            point_to_archive(doc, reference.node, &stored);
                        }
                    }
                    let state = if stored.converted {
                        ResourceState::Converted
                    } else {
                        ResourceState::Copied
                    };
                    stage_debug!(
                        log,
                        stage::ARCHIVE,
                        "{:?} {shown} as {} ({}x{}, {})",
                        state,
                        stored.name,
                        stored.width,
                        stored.height,
                        stored.content_type
                    );
                    archived.resources.push(Resource {
                        source_uri: group.url.clone(),
                        content_type: Some(stored.content_type),
                        width: stored.width,
                        height: stored.height,
                        name: stored.name.clone(),
                        state,
                    });
                    archived.files.push((stored.name, stored.bytes));
                }
                Outcome::Icon => {
                    detach_all(doc, group);
                    stage_debug!(log, stage::ARCHIVE, "dropped icon {shown}");
                    archived.resources.push(dropped(&group.url, "icon"));
                }
                Outcome::Failed(reason) => {
                    detach_all(doc, group);
                    stage_warn!(log, stage::ARCHIVE, "dropped {shown}: {reason}");
                    archived.resources.push(dropped(&group.url, &reason));
                }
            }
        }
        archived
    }

    async fn process(&self, group: &Group, readability: bool) -> Processed {
        let is_icon = |reference: &Reference, intrinsic: (u32, u32)| {
            let (w, h) = reference.rendered(intrinsic);
            readability && !reference.inline && is_icon_size(w, h, self.settings.icon_max)
        };

        // Declared sizes alone can settle it without a fetch.
        let declared_icons = group
            .refs
            .iter()
            .all(|r| r.width.is_some() && r.height.is_some() && is_icon(r, (0, 0)));
        if declared_icons {
            return Processed {
                outcome: Outcome::Icon,
                icons: vec![true; group.refs.len()],
            };
        }

        let (bytes, content_type) = match self.load(&group.url).await {
            Ok(loaded) => loaded,
            Err(reason) => return failed(group, reason),
        };
        let probe = match convert::probe(&bytes, content_type.as_deref()) {
            Ok(probe) => probe,
            Err(err) => return failed(group, format!("unrecognised image: {err}")),
        };
        let icons: Vec<bool> = group
            .refs
            .iter()
            .map(|r| is_icon(r, (probe.width, probe.height)))
            .collect();
        if icons.iter().all(|icon| *icon) {
            return Processed {
                outcome: Outcome::Icon,
                icons,
            };
        }

        if probe.can_copy(self.settings.max_width) {
            let stored = Stored {
                name: resource_name(&group.url, probe.extension()),
                bytes,
                content_type: probe.content_type().to_string(),
                width: probe.width,
                height: probe.height,
                converted: false,
            };
            return Processed {
                outcome: Outcome::Stored(stored),
                icons,
            };
        }

        let SourceKind::Raster(format) = probe.kind else {
            return failed(group, "cannot convert vector image".to_string());
        };
        let _permit = match self
            .slots
            .acquire(self.settings.conversion_wait, self.cancel)
            .await
        {
            Ok(permit) => permit,
            Err(err) => return failed(group, err.to_string()),
        };
        let (max_width, quality) = (self.settings.max_width, self.settings.jpeg_quality);
        let converted = tokio::task::spawn_blocking(move || {
            convert::transcode(&bytes, format, max_width, quality)
        })
        .await;
        let outcome = match converted {
            Ok(Ok(encoded)) => Outcome::Stored(Stored {
                name: resource_name(&group.url, encoded.extension),
                content_type: encoded.content_type.to_string(),
                width: encoded.width,
                height: encoded.height,
                bytes: encoded.bytes,
                converted: true,
            }),
            Ok(Err(err)) => Outcome::Failed(format!("conversion failed: {err}")),
            Err(err) => Outcome::Failed(format!("conversion task failed: {err}")),
        };
        Processed { outcome, icons }
    }

    async fn load(&self, url: &str) -> Result<(Vec<u8>, Option<String>), String> {
        if url.starts_with("data:") {
            return decode_data_uri(url);
        }
        let timeout = self.settings.resource_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err("cancelled".to_string()),
            fetched = tokio::time::timeout(timeout, self.fetcher.fetch(url, Accept::Image)) => {
                match fetched {
                    Ok(Ok(output)) => Ok((output.bytes, output.metadata.content_type)),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err(format!("timed out after {timeout:?}")),
                }
            }
        }
    }
}

fn group_references(doc: &Document, scope: NodeId, base: &Url) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for image in discover_images(doc, scope, base) {
        let reference = Reference {
            node: image.node,
            width: image.declared_width,
            height: image.declared_height,
            inline: is_inline_with_text(doc, image.node),
        };
        match groups.iter_mut().find(|g| g.url == image.url) {
            Some(group) => group.refs.push(reference),
            None => groups.push(Group {
                url: image.url,
                refs: vec![reference],
            }),
        }
    }
    groups
}

fn failed(group: &Group, reason: String) -> Processed {
    Processed {
        outcome: Outcome::Failed(reason),
        icons: vec![false; group.refs.len()],
    }
}

fn dropped(url: &str, reason: &str) -> Resource {
    Resource {
        source_uri: url.to_string(),
        content_type: None,
        width: 0,
        height: 0,
        name: String::new(),
        state: ResourceState::Dropped(reason.to_string()),
    }
}

fn detach_all(doc: &mut Document, group: &Group) {
    for reference in &group.refs {
        let _ = doc.detach(reference.node);
    }
}

fn point_to_archive(doc: &mut Document, node: NodeId, stored: &Stored) {
    let _ = doc.set_attr(node, "src", &stored.name);
    for attr in ["srcset", "sizes", "data-src", "data-srcset", "data-original"] {
        let _ = doc.remove_attr(node, attr);
    }
    if stored.converted {
        let _ = doc.set_attr(node, "width", &stored.width.to_string());
        let _ = doc.set_attr(node, "height", &stored.height.to_string());
    }
}

/// `data:[<mime>][;base64],<payload>`
fn decode_data_uri(uri: &str) -> Result<(Vec<u8>, Option<String>), String> {
    let rest = uri.strip_prefix("data:").unwrap_or(uri);
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| "malformed data URI".to_string())?;
    let (mime, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    let bytes = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .map_err(|err| format!("bad base64 payload: {err}"))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };
    let mime = mime.split(';').next().unwrap_or_default().trim();
    Ok((bytes, (!mime.is_empty()).then(|| mime.to_string())))
}

fn display_uri(uri: &str) -> Cow<'_, str> {
    if !uri.starts_with("data:") {
        return Cow::Borrowed(uri);
    }
    match uri.char_indices().nth(40) {
        Some((cut, _)) => Cow::Owned(format!("{}... ({} bytes)", &uri[..cut], uri.len())),
        None => Cow::Borrowed(uri),
    }
}
