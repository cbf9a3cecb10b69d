//! Content-density scoring for documents without a body rule.
//!
//! Paragraph-like blocks earn points for text length and commas. Each block
//! hands its points up the ancestor chain (parent in full, grandparent half,
//! deeper ancestors `score / (level * 3)`). Ancestors start from a tag bonus
//! plus a class/id weight, and their total is scaled by `1 - link density`.
//! The best candidate without a boilerplate ancestor wins; ties go to the
//! first in document order. The document is not touched unless a candidate
//! clears the threshold.

use std::collections::HashMap;
use std::sync::LazyLock;

use ego_tree::{NodeId, NodeRef};
use regex::Regex;
use scraper::node::Node;
use thiserror::Error;

use engine_logging::engine_debug;

use crate::dom::Document;

static UNLIKELY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)-ad-|ai2html|banner|breadcrumbs|combx|comment|community|cover-wrap|disqus|extra|footer|gdpr|header|legends|menu|related|remark|replies|rss|shoutbox|sidebar|skyscraper|social|sponsor|supplemental|ad-break|agegate|pagination|pager|popup|yom-remote",
    )
    .ok()
});
static MAYBE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)and|article|body|column|content|main|shadow").ok());
static POSITIVE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)article|body|content|entry|hentry|h-entry|main|page|pagination|post|text|blog|story").ok()
});
static NEGATIVE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)-ad-|hidden|^hid$| hid$| hid |^hid |banner|combx|comment|com-|contact|foot|footer|footnote|gdpr|masthead|media|meta|nav|outbrain|promo|related|scroll|share|shoutbox|sidebar|skyscraper|sponsor|shopping|tags|tool|widget",
    )
    .ok()
});

fn is_match(re: &LazyLock<Option<Regex>>, haystack: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(haystack))
}

const BLOCK_CHILDREN: &[&str] = &[
    "a", "blockquote", "dl", "div", "img", "ol", "p", "pre", "table", "ul", "section", "article",
    "aside", "figure", "header", "footer", "h1", "h2", "h3", "h4", "h5", "h6",
];

const SCORED_TAGS: &[&str] = &["p", "pre", "td", "section", "h2", "h3", "h4", "h5", "h6"];

const NEVER_SCORED: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "svg", "form", "button", "input",
    "select", "textarea", "nav",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ReadabilitySettings {
    pub min_score: f64,
    pub min_text_length: usize,
    pub class_weight: f64,
    pub ancestor_levels: usize,
    pub join_siblings: bool,
    pub sibling_ratio: f64,
    pub prune: bool,
}

impl Default for ReadabilitySettings {
    fn default() -> Self {
        Self {
            min_score: 20.0,
            min_text_length: 25,
            class_weight: 25.0,
            ancestor_levels: 5,
            join_siblings: true,
            sibling_ratio: 0.2,
            prune: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadabilityOutcome {
    /// Article root followed by any joined siblings, in document order.
    pub nodes: Vec<NodeId>,
    pub score: f64,
    pub candidates: usize,
    pub pruned: usize,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReadabilityMiss {
    #[error("document has no body")]
    NoBody,
    #[error("no candidate scored above {threshold} (best {best:.1})")]
    BelowThreshold { best: f64, threshold: f64 },
}

pub struct Readability<'a> {
    settings: &'a ReadabilitySettings,
}

impl<'a> Readability<'a> {
    pub fn new(settings: &'a ReadabilitySettings) -> Self {
        Self { settings }
    }

    /// Picks the article nodes and prunes boilerplate inside them.
    pub fn extract(&self, doc: &mut Document) -> Result<ReadabilityOutcome, ReadabilityMiss> {
        let body = doc.body().ok_or(ReadabilityMiss::NoBody)?;
        let (top, score, scores, candidates) = self.rank(doc, body)?;
        engine_debug!("readability: best of {candidates} candidates scored {score:.1}");

        let nodes = if self.settings.join_siblings {
            self.siblings(doc, top, score, &scores)
        } else {
            vec![top]
        };

        let pruned = if self.settings.prune {
            nodes.iter().map(|&n| self.prune(doc, n)).sum()
        } else {
            0
        };

        Ok(ReadabilityOutcome {
            nodes,
            score,
            candidates,
            pruned,
        })
    }

    #[allow(clippy::type_complexity)]
    fn rank(
        &self,
        doc: &Document,
        body: NodeId,
    ) -> Result<(NodeId, f64, HashMap<NodeId, f64>, usize), ReadabilityMiss> {
        let Some(body_ref) = doc.node(body) else {
            return Err(ReadabilityMiss::NoBody);
        };

        let mut scorable = Vec::new();
        self.collect_scorable(body_ref, &mut scorable);

        let mut order: Vec<NodeId> = Vec::new();
        let mut scores: HashMap<NodeId, f64> = HashMap::new();
        for node in scorable {
            let text = normalized_text(node);
            if text.chars().count() < self.settings.min_text_length {
                continue;
            }
            let points = 1.0
                + text.matches([',', '，']).count() as f64
                + (text.chars().count() as f64 / 100.0).floor().min(3.0);

            for (level, ancestor) in node
                .ancestors()
                .filter(|a| a.value().is_element())
                .take(self.settings.ancestor_levels)
                .enumerate()
            {
                if tag_name(ancestor) == Some("html") {
                    break;
                }
                let entry = scores.entry(ancestor.id()).or_insert_with(|| {
                    order.push(ancestor.id());
                    self.initial_score(ancestor)
                });
                let divider = match level {
                    0 => 1.0,
                    1 => 2.0,
                    n => n as f64 * 3.0,
                };
                *entry += points / divider;
            }
        }

        // Candidates were discovered bottom-up; rank them in document order.
        let position: HashMap<NodeId, usize> = body_ref
            .descendants()
            .enumerate()
            .map(|(i, n)| (n.id(), i))
            .collect();
        order.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));

        let mut best: Option<(NodeId, f64)> = None;
        for id in &order {
            let Some(node) = doc.node(*id) else { continue };
            let raw = scores.get(id).copied().unwrap_or_default();
            let score = raw * (1.0 - link_density(node));
            scores.insert(*id, score);
            if self.has_boilerplate_ancestor(node, body) {
                continue;
            }
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((*id, score));
            }
        }

        match best {
            Some((id, score)) if score >= self.settings.min_score => {
                Ok((id, score, scores, order.len()))
            }
            other => Err(ReadabilityMiss::BelowThreshold {
                best: other.map(|(_, s)| s).unwrap_or_default(),
                threshold: self.settings.min_score,
            }),
        }
    }

    fn collect_scorable<'n>(&self, node: NodeRef<'n, Node>, out: &mut Vec<NodeRef<'n, Node>>) {
        for child in node.children() {
            let Some(tag) = tag_name(child) else { continue };
            if NEVER_SCORED.contains(&tag) {
                continue;
            }
            let signature = class_and_id(child);
            if !matches!(tag, "body" | "article" | "a" | "main")
                && is_match(&UNLIKELY, &signature)
                && !is_match(&MAYBE, &signature)
            {
                continue;
            }
            if SCORED_TAGS.contains(&tag) || (tag == "div" && !has_block_children(child)) {
                out.push(child);
            }
            self.collect_scorable(child, out);
        }
    }

    fn initial_score(&self, node: NodeRef<'_, Node>) -> f64 {
        let base = match tag_name(node).unwrap_or_default() {
            "div" => 5.0,
            "pre" | "td" | "blockquote" => 3.0,
            "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" | "form" => -3.0,
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
            _ => 0.0,
        };
        base + self.class_weight(node)
    }

    fn class_weight(&self, node: NodeRef<'_, Node>) -> f64 {
        let Some(el) = node.value().as_element() else {
            return 0.0;
        };
        let mut weight = 0.0;
        for value in [el.attr("class"), el.id()].into_iter().flatten() {
            if is_match(&NEGATIVE, value) {
                weight -= self.settings.class_weight;
            }
            if is_match(&POSITIVE, value) {
                weight += self.settings.class_weight;
            }
        }
        weight
    }

    fn has_boilerplate_ancestor(&self, node: NodeRef<'_, Node>, body: NodeId) -> bool {
        node.ancestors()
            .take_while(|a| a.id() != body)
            .any(|a| self.class_weight(a) < 0.0)
    }

    fn siblings(
        &self,
        doc: &Document,
        top: NodeId,
        score: f64,
        scores: &HashMap<NodeId, f64>,
    ) -> Vec<NodeId> {
        let Some(parent) = doc.node(top).and_then(|n| n.parent()) else {
            return vec![top];
        };
        if tag_name(parent) == Some("html") {
            return vec![top];
        }
        let threshold = (score * self.settings.sibling_ratio).max(10.0);
        let top_class = doc.attr(top, "class").unwrap_or_default();

        parent
            .children()
            .filter(|c| c.value().is_element())
            .filter(|sibling| {
                if sibling.id() == top {
                    return true;
                }
                let mut bonus = 0.0;
                if !top_class.is_empty()
                    && doc.attr(sibling.id(), "class").unwrap_or_default() == top_class
                {
                    bonus += score * 0.2;
                }
                if let Some(s) = scores.get(&sibling.id()) {
                    if s + bonus >= threshold {
                        return true;
                    }
                }
                if tag_name(*sibling) != Some("p") {
                    return false;
                }
                let text = normalized_text(*sibling);
                let len = text.chars().count();
                let density = link_density(*sibling);
                (len > 80 && density < 0.25)
                    || (len > 0 && density == 0.0 && (text.contains(". ") || text.ends_with('.')))
            })
            .map(|c| c.id())
            .collect()
    }

    /// Removes boilerplate blocks under `root`; returns how many were removed.
    fn prune(&self, doc: &mut Document, root: NodeId) -> usize {
        let Some(root_ref) = doc.node(root) else {
            return 0;
        };
        let mut doomed: Vec<NodeId> = Vec::new();
        for node in root_ref.descendants().skip(1) {
            if doomed.iter().any(|d| node.ancestors().any(|a| a.id() == *d)) {
                continue;
            }
            let Some(tag) = tag_name(node) else { continue };
            if matches!(
                tag,
                "script" | "style" | "noscript" | "form" | "button" | "iframe" | "object" | "embed"
            ) && !is_embed_video(node)
            {
                doomed.push(node.id());
                continue;
            }
            let weight = self.class_weight(node);
            let signature = class_and_id(node);
            if weight < 0.0 && is_match(&UNLIKELY, &signature) && !is_match(&MAYBE, &signature) {
                doomed.push(node.id());
                continue;
            }
            if matches!(tag, "table" | "ul" | "ol" | "div" | "aside" | "section")
                && self.should_clean(node, weight)
            {
                doomed.push(node.id());
            }
        }
        let count = doomed.len();
        for id in doomed {
            let _ = doc.detach(id);
        }
        count
    }

    fn should_clean(&self, node: NodeRef<'_, Node>, weight: f64) -> bool {
        if weight < 0.0 {
            return true;
        }
        let text = normalized_text(node);
        if text.matches(',').count() >= 10 {
            return false;
        }
        let count = |tag: &str| {
            node.descendants()
                .skip(1)
                .filter(|n| tag_name(*n) == Some(tag))
                .count()
        };
        let paragraphs = count("p");
        let images = count("img");
        let items = count("li") as isize - 100;
        let inputs = count("input");
        let embeds = count("iframe") + count("video");
        let length = text.chars().count();
        let density = link_density(node);
        let tag = tag_name(node).unwrap_or_default();
        let in_figure = node.descendants().any(|n| tag_name(n) == Some("figure"));

        (images > 1 && paragraphs * 2 < images && !in_figure)
            || (!matches!(tag, "ul" | "ol") && items > paragraphs as isize)
            || (inputs > paragraphs / 3)
            || (length < self.settings.min_text_length
                && images == 0
                && embeds == 0
                && !has_heading(node))
            || (weight < 25.0 && density > 0.2 && length > 0)
            || (weight >= 25.0 && density > 0.5)
            || (embeds > 1 && length < 75)
    }
}

fn tag_name<'n>(node: NodeRef<'n, Node>) -> Option<&'n str> {
    node.value().as_element().map(|el| el.name())
}

fn class_and_id(node: NodeRef<'_, Node>) -> String {
    match node.value().as_element() {
        Some(el) => format!(
            "{} {}",
            el.attr("class").unwrap_or_default(),
            el.id().unwrap_or_default()
        ),
        None => String::new(),
    }
}

fn has_block_children(node: NodeRef<'_, Node>) -> bool {
    node.descendants()
        .skip(1)
        .filter_map(tag_name)
        .any(|tag| BLOCK_CHILDREN.contains(&tag))
}

fn has_heading(node: NodeRef<'_, Node>) -> bool {
    node.descendants()
        .filter_map(tag_name)
        .any(|tag| matches!(tag, "h1" | "h2" | "h3" | "h4" | "h5" | "h6"))
}

fn is_embed_video(node: NodeRef<'_, Node>) -> bool {
    let Some(el) = node.value().as_element() else {
        return false;
    };
    el.attr("src").is_some_and(|src| {
        src.contains("youtube") || src.contains("vimeo") || src.contains("dailymotion")
    })
}

fn normalized_text(node: NodeRef<'_, Node>) -> String {
    let raw: String = node
        .descendants()
        .filter_map(|n| n.value().as_text().map(|t| &**t))
        .collect();
    crate::metadata::collapse_whitespace(&raw)
}

/// Share of a node's text that sits inside links.
pub(crate) fn link_density(node: NodeRef<'_, Node>) -> f64 {
    let total = normalized_text(node).chars().count();
    if total == 0 {
        return 0.0;
    }
    let linked: usize = node
        .descendants()
        .filter(|n| tag_name(*n) == Some("a"))
        .map(|a| normalized_text(a).chars().count())
        .sum();
    (linked as f64 / total as f64).min(1.0)
}
