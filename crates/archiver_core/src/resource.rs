//! Embeddable resources and their archive names.

use std::fmt::Write as _;

use ego_tree::{NodeId, NodeRef};
use scraper::node::Node;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::dom::Document;

/// Directory holding resources inside a container.
pub const RESOURCE_DIR: &str = "_resources";

/// Stable identifier derived from a resource's source URI.
pub fn content_address(uri: &str) -> String {
    let digest = Sha256::digest(uri.as_bytes());
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

/// Archive path of a resource: `_resources/{hash}.{ext}`.
pub fn resource_name(uri: &str, extension: &str) -> String {
    format!("{RESOURCE_DIR}/{}.{extension}", content_address(uri))
}

/// Small and near-square. Zero dimensions are unknown, never icons.
pub fn is_icon_size(width: u32, height: u32, max: u32) -> bool {
    if width == 0 || height == 0 || width.max(height) > max {
        return false;
    }
    let ratio = width.min(height) as f64 / width.max(height) as f64;
    ratio >= 0.9
}

/// True when the element sits in running text, with non-blank inline text on
/// both sides inside its parent (an inline emoji or symbol rather than chrome).
pub fn is_inline_with_text(doc: &Document, node: NodeId) -> bool {
    let Some(node_ref) = doc.node(node) else {
        return false;
    };
    has_text_beside(doc, node_ref.prev_sibling(), false)
        && has_text_beside(doc, node_ref.next_sibling(), true)
}

fn has_text_beside(doc: &Document, mut cursor: Option<NodeRef<'_, Node>>, forward: bool) -> bool {
    while let Some(sibling) = cursor {
        match sibling.value() {
            Node::Text(text) if !text.trim().is_empty() => return true,
            Node::Element(el) if matches!(el.name(), "br" | "p" | "div" | "img") => return false,
            Node::Element(_) => {
                if !crate::metadata::collapse_whitespace(&doc.text(sibling.id())).is_empty() {
                    return true;
                }
            }
            _ => {}
        }
        cursor = if forward {
            sibling.next_sibling()
        } else {
            sibling.prev_sibling()
        };
    }
    false
}

/// An `<img>` reference found in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub node: NodeId,
    /// Absolute URL, or a `data:` URI.
    pub url: String,
    pub declared_width: Option<u32>,
    pub declared_height: Option<u32>,
}

/// Finds every image under `scope` in document order. `srcset` candidates win
/// over `src` when they carry a larger descriptor; lazy-loading attributes are
/// consulted when `src` is missing.
pub fn discover_images(doc: &Document, scope: NodeId, base: &Url) -> Vec<ImageRef> {
    let nodes = doc.select_in(scope, "img").unwrap_or_default();
    nodes
        .into_iter()
        .filter_map(|node| {
            let src = ["src", "data-src", "data-original"]
                .iter()
                .filter_map(|attr| doc.attr(node, attr))
                .find(|v| !v.trim().is_empty() && !v.starts_with("data:image/gif"));
            let from_srcset = doc
                .attr(node, "srcset")
                .or_else(|| doc.attr(node, "data-srcset"))
                .and_then(|s| largest_candidate(&s));
            let raw = from_srcset.or(src)?;
            let url = resolve_resource_url(raw.trim(), base)?;
            Some(ImageRef {
                node,
                url,
                declared_width: doc.attr(node, "width").and_then(|w| parse_dimension(&w)),
                declared_height: doc.attr(node, "height").and_then(|h| parse_dimension(&h)),
            })
        })
        .collect()
}

/// Folds `<picture><source srcset>` candidates into the inner `<img>` and
/// removes the sources, leaving one element per picture for discovery.
pub fn merge_picture_sources(doc: &mut Document, scope: NodeId) -> usize {
    let pictures = doc.select_in(scope, "picture").unwrap_or_default();
    let mut merged = 0;
    for picture in pictures {
        let Some(img) = doc
            .select_in(picture, "img")
            .ok()
            .and_then(|imgs| imgs.into_iter().next())
        else {
            continue;
        };
        let sources = doc.select_in(picture, "source").unwrap_or_default();
        let mut candidates: Vec<String> = doc.attr(img, "srcset").into_iter().collect();
        for &source in &sources {
            if let Some(srcset) = doc
                .attr(source, "srcset")
                .or_else(|| doc.attr(source, "data-srcset"))
                .filter(|s| !s.trim().is_empty())
            {
                candidates.push(srcset);
            }
        }
        for source in sources {
            let _ = doc.detach(source);
        }
        if !candidates.is_empty() && doc.set_attr(img, "srcset", &candidates.join(", ")).is_ok() {
            merged += 1;
        }
    }
    merged
}

/// Replaces every `<noscript>` holding a single image with that image. A
/// placeholder image right before the `<noscript>` is removed with it.
pub fn unwrap_noscript_images(doc: &mut Document, scope: NodeId) -> usize {
    let noscripts = doc.select_in(scope, "noscript").unwrap_or_default();
    let mut replaced = 0;
    for noscript in noscripts {
        if !doc.is_attached(noscript) {
            continue;
        }
        let Some(attrs) = noscript_image(doc, noscript) else {
            continue;
        };
        let Ok(img) = doc.create_element("img") else {
            continue;
        };
        if attrs.iter().any(|(name, value)| doc.set_attr(img, name, value).is_err()) {
            continue;
        }
        let placeholder = doc
            .node(noscript)
            .and_then(|node| node.prev_siblings().find(|n| n.value().is_element()))
            .map(|n| n.id())
            .filter(|&prev| is_single_image(doc, prev));
        if doc.insert_before(noscript, img).is_err() || doc.detach(noscript).is_err() {
            continue;
        }
        if let Some(placeholder) = placeholder {
            let _ = doc.detach(placeholder);
        }
        replaced += 1;
    }
    replaced
}

/// Attributes of the only image inside a `<noscript>`. With scripting enabled
/// the parser keeps the content as raw text, which is parsed on its own.
fn noscript_image(doc: &Document, noscript: NodeId) -> Option<Vec<(String, String)>> {
    if is_single_image(doc, noscript) {
        let img = doc.select_in(noscript, "img").ok()?.into_iter().next()?;
        return Some(attributes(doc, img));
    }
    let inner = Document::parse(&doc.text(noscript));
    let body = inner.body()?;
    if !is_single_image(&inner, body) {
        return None;
    }
    let img = inner.select_in(body, "img").ok()?.into_iter().next()?;
    Some(attributes(&inner, img))
}

/// An `img`, or an element whose only content is a single image.
fn is_single_image(doc: &Document, node: NodeId) -> bool {
    if doc.tag(node).as_deref() == Some("img") {
        return true;
    }
    let children = doc.children(node);
    children.len() == 1 && doc.text(node).trim().is_empty() && is_single_image(doc, children[0])
}

fn attributes(doc: &Document, node: NodeId) -> Vec<(String, String)> {
    doc.element(node)
        .map(|el| {
            el.value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn resolve_resource_url(raw: &str, base: &Url) -> Option<String> {
    if raw.starts_with("data:") {
        return Some(raw.to_string());
    }
    let url = base.join(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// The candidate with the largest `w` or `x` descriptor in a `srcset` value.
pub fn largest_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .filter_map(|candidate| {
            let mut parts = candidate.split_whitespace();
            let url = parts.next()?;
            let weight = match parts.next() {
                Some(d) if d.ends_with('w') => d.trim_end_matches('w').parse::<f64>().ok()?,
                Some(d) if d.ends_with('x') => {
                    d.trim_end_matches('x').parse::<f64>().ok()? * 1000.0
                }
                _ => 1.0,
            };
            Some((url.to_string(), weight))
        })
        .fold(None, |best: Option<(String, f64)>, (url, weight)| match best {
            Some((_, w)) if w >= weight => best,
            _ => Some((url, weight)),
        })
        .map(|(url, _)| url)
}

fn parse_dimension(value: &str) -> Option<u32> {
    let digits: String = value.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok().filter(|v| *v > 0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Copied,
    Converted,
    Dropped(String),
}

/// One archived or dropped resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub source_uri: String,
    pub content_type: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Archive path; empty when dropped.
    pub name: String,
    pub state: ResourceState,
}
