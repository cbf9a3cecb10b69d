use ego_tree::{NodeId, NodeRef};
use scraper::node::Node;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::dom::Document;

pub const DEFAULT_MAX_LINKS: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Hyperlink,
    Image,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedLink {
    pub url: String,
    pub text: Option<String>,
    pub kind: LinkKind,
}

/// Walks an article subtree and collects its outbound references.
pub struct LinkCollector {
    max_links: usize,
}

impl LinkCollector {
    pub fn new() -> Self {
        Self::with_max_links(DEFAULT_MAX_LINKS)
    }

    pub fn with_max_links(max_links: usize) -> Self {
        Self { max_links }
    }

    /// Links under `scope` in document order, deduplicated by URL.
    pub fn collect(&self, doc: &Document, scope: NodeId, base: Option<&Url>) -> Vec<ExtractedLink> {
        let mut links = Vec::new();
        if let Some(node) = doc.node(scope) {
            self.visit(node, base, &mut links);
        }
        links
    }

    fn visit(&self, node: NodeRef<'_, Node>, base: Option<&Url>, links: &mut Vec<ExtractedLink>) {
        for child in node.children() {
            if links.len() >= self.max_links {
                return;
            }
            let Node::Element(element) = child.value() else {
                continue;
            };
            match element.name() {
                "a" => {
                    let href = element.attr("href");
                    if let Some(url) = href.and_then(|href| resolve_url(href, base)) {
                        let kind = if url.scheme() == "mailto" {
                            LinkKind::Email
                        } else {
                            LinkKind::Hyperlink
                        };
                        let text = anchor_text(child);
                        push_link(links, url.into(), text, kind);
                    }
                }
                "img" => {
                    if let Some(url) = element.attr("src").and_then(|src| resolve_url(src, base)) {
                        let alt = element.attr("alt").map(str::to_string);
                        push_link(links, url.into(), alt, LinkKind::Image);
                    }
                }
                "script" | "style" | "noscript" | "template" => continue,
                _ => {}
            }
            self.visit(child, base, links);
        }
    }
}

impl Default for LinkCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn anchor_text(node: NodeRef<'_, Node>) -> Option<String> {
    let text: String = node
        .descendants()
        .filter_map(|n| n.value().as_text().map(|t| &**t))
        .collect();
    let text = crate::metadata::collapse_whitespace(&text);
    (!text.is_empty()).then_some(text)
}

fn push_link(links: &mut Vec<ExtractedLink>, url: String, text: Option<String>, kind: LinkKind) {
    if links.iter().any(|l| l.url == url) {
        return;
    }
    let text = text.filter(|t| !t.trim().is_empty());
    links.push(ExtractedLink { url, text, kind });
}

/// Resolves a reference against `base`; fragments, queries and scripts are skipped.
pub fn resolve_url(reference: &str, base: Option<&Url>) -> Option<Url> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with('#') || lower.starts_with('?') || lower.starts_with("javascript:") {
        return None;
    }
    if let Ok(url) = Url::parse(trimmed) {
        return Some(url);
    }
    base.and_then(|base| base.join(trimmed).ok())
}

/// Rewrites relative `a[href]` under `scope` to absolute URLs.
pub fn absolutize_links(doc: &mut Document, scope: NodeId, base: &Url) -> usize {
    let anchors = doc.select_in(scope, "a[href]").unwrap_or_default();
    let mut rewritten = 0;
    for anchor in anchors {
        let Some(href) = doc.attr(anchor, "href") else {
            continue;
        };
        let Some(url) = resolve_url(&href, Some(base)) else {
            continue;
        };
        let absolute = String::from(url);
        if absolute != href && doc.set_attr(anchor, "href", &absolute).is_ok() {
            rewritten += 1;
        }
    }
    rewritten
}
