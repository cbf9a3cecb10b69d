//! Site-rule application: raw string replacement, stripping, body selection
//! and per-field overrides.

use ego_tree::NodeId;

use crate::dom::{compile_selector, Document, DomError};
use crate::rules::SiteRule;

/// Applies the rule's literal replacements to raw HTML.
pub fn apply_replace_strings(html: &str, rule: &SiteRule) -> String {
    rule.replace_strings
        .iter()
        .filter(|(from, _)| !from.is_empty())
        .fold(html.to_string(), |acc, (from, to)| acc.replace(from, to))
}

/// Removes every element matched by the rule's strip selectors.
pub fn strip(doc: &mut Document, rule: &SiteRule) -> Result<usize, DomError> {
    let mut removed = 0;
    for selector in &rule.strip {
        for node in doc.select(&selector.to_css())? {
            // An earlier match may already have taken this node with it.
            if doc.is_attached(node) {
                doc.detach(node)?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

/// Matches of the first body selector that yields elements with element
/// children. Empty matches (placeholders, lazy containers) do not count.
pub fn select_body(
    doc: &Document,
    rule: &SiteRule,
) -> Result<Option<(String, Vec<NodeId>)>, DomError> {
    for css in &rule.body {
        let selector = compile_selector(css)?;
        let nodes: Vec<NodeId> = doc
            .select_compiled(doc.root(), &selector)
            .into_iter()
            .filter(|&n| !doc.children(n).is_empty())
            .collect();
        let outermost: Vec<NodeId> = nodes
            .iter()
            .copied()
            .filter(|&n| {
                !nodes.iter().any(|&other| {
                    other != n
                        && doc
                            .element(n)
                            .is_some_and(|el| el.ancestors().any(|a| a.id() == other))
                })
            })
            .collect();
        if !outermost.is_empty() {
            return Ok(Some((css.clone(), outermost)));
        }
    }
    Ok(None)
}

/// Text of the first non-empty match among `selectors`.
pub fn first_text(doc: &Document, selectors: &[String]) -> Result<Option<String>, DomError> {
    for css in selectors {
        for node in doc.select(css)? {
            let text = crate::metadata::collapse_whitespace(&doc.text(node));
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }
    Ok(None)
}

/// Texts of all matches of every selector, in order and without duplicates.
pub fn all_texts(doc: &Document, selectors: &[String]) -> Result<Vec<String>, DomError> {
    let mut texts: Vec<String> = Vec::new();
    for css in selectors {
        for node in doc.select(css)? {
            let text = crate::metadata::collapse_whitespace(&doc.text(node));
            if !text.is_empty() && !texts.contains(&text) {
                texts.push(text);
            }
        }
    }
    Ok(texts)
}

/// Removes elements that never belong in an archive.
pub fn remove_scripting(doc: &mut Document) -> Result<usize, DomError> {
    let nodes = doc.select("script, style, noscript, template, link[rel=stylesheet]")?;
    let mut removed = 0;
    for node in nodes {
        if doc.is_attached(node) {
            doc.detach(node)?;
            removed += 1;
        }
    }
    Ok(removed)
}
