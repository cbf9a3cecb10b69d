//! Domain-keyed site rules.
//!
//! A rule set is a collection of JSON documents, one per domain. The key of a
//! document is its domain; a key starting with `.` (for example `.example.com`)
//! matches the domain itself and every subdomain. Lookup never guesses beyond
//! what the keys encode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use engine_logging::engine_warn;

use crate::dom::compile_selector;

/// A selector whose matches are removed from the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StripSelector {
    /// Plain CSS selector.
    Css(String),
    /// Elements whose `id` equals the value or whose `class` list contains it.
    IdOrClass(String),
    /// Images whose `src` contains the substring.
    ImageSrc(String),
}

impl StripSelector {
    pub fn to_css(&self) -> String {
        match self {
            StripSelector::Css(css) => css.clone(),
            StripSelector::IdOrClass(needle) => {
                let needle = css_string(needle);
                format!("[id={needle}], [class~={needle}]")
            }
            StripSelector::ImageSrc(needle) => format!("img[src*={}]", css_string(needle)),
        }
    }
}

fn css_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteRule {
    pub title: Vec<String>,
    pub author: Vec<String>,
    pub date: Vec<String>,
    pub body: Vec<String>,
    pub strip: Vec<StripSelector>,
    /// Literal `[from, to]` replacements applied to the raw HTML before parsing.
    pub replace_strings: Vec<(String, String)>,
    pub http_headers: BTreeMap<String, String>,
    /// `Some(false)` disables the readability scorer for the site.
    pub readability: Option<bool>,
}

/// One amendment to a [`SiteRule`], as produced by a content script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEdit {
    AddBody(String),
    AddStrip(StripSelector),
    AddTitle(String),
    AddAuthor(String),
    AddDate(String),
    ClearBody,
    ClearStrip,
    SetReadability(bool),
}

impl SiteRule {
    /// Returns an amended copy of the rule. Edits apply in order; additions
    /// keep their relative order and skip values already present.
    pub fn merge(&self, edits: &[RuleEdit]) -> SiteRule {
        let mut rule = self.clone();
        for edit in edits {
            match edit {
                RuleEdit::AddBody(css) => push_unique(&mut rule.body, css.clone()),
                RuleEdit::AddStrip(sel) => push_unique(&mut rule.strip, sel.clone()),
                RuleEdit::AddTitle(css) => push_unique(&mut rule.title, css.clone()),
                RuleEdit::AddAuthor(css) => push_unique(&mut rule.author, css.clone()),
                RuleEdit::AddDate(css) => push_unique(&mut rule.date, css.clone()),
                RuleEdit::ClearBody => rule.body.clear(),
                RuleEdit::ClearStrip => rule.strip.clear(),
                RuleEdit::SetReadability(enabled) => rule.readability = Some(*enabled),
            }
        }
        rule
    }

    /// Every selector the rule carries, for validation.
    fn selectors(&self) -> impl Iterator<Item = String> + '_ {
        self.title
            .iter()
            .chain(&self.author)
            .chain(&self.date)
            .chain(&self.body)
            .cloned()
            .chain(self.strip.iter().map(StripSelector::to_css))
    }

    pub fn validate(&self, domain: &str) -> Result<(), RuleError> {
        for css in self.selectors() {
            compile_selector(&css).map_err(|err| RuleError::Selector {
                domain: domain.to_string(),
                message: err.to_string(),
            })?;
        }
        Ok(())
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, value: T) {
    if !items.contains(&value) {
        items.push(value);
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("site rule {domain}: malformed: {message}")]
    Malformed { domain: String, message: String },
    #[error("site rule {domain}: {message}")]
    Selector { domain: String, message: String },
    #[error("site rule {domain}: duplicate key")]
    Duplicate { domain: String },
}

/// Parses and validates one rule document.
pub fn parse_rule(domain: &str, json: &str) -> Result<SiteRule, RuleError> {
    let rule: SiteRule = serde_json::from_str(json).map_err(|err| RuleError::Malformed {
        domain: domain.to_string(),
        message: err.to_string(),
    })?;
    rule.validate(domain)?;
    Ok(rule)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteRuleIndex {
    rules: BTreeMap<String, SiteRule>,
}

impl SiteRuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from `(domain, json)` pairs. Malformed documents are
    /// skipped and reported; later duplicates of a key are rejected.
    pub fn from_documents<'a>(
        documents: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> (Self, Vec<RuleError>) {
        let mut index = Self::new();
        let mut errors = Vec::new();
        for (domain, json) in documents {
            let domain = domain.trim().to_ascii_lowercase();
            match parse_rule(&domain, json) {
                Ok(rule) => {
                    if let Err(err) = index.insert(&domain, rule) {
                        engine_warn!("{err}");
                        errors.push(err);
                    }
                }
                Err(err) => {
                    engine_warn!("{err}");
                    errors.push(err);
                }
            }
        }
        (index, errors)
    }

    pub fn insert(&mut self, domain: &str, rule: SiteRule) -> Result<(), RuleError> {
        let key = domain.to_ascii_lowercase();
        if self.rules.contains_key(&key) {
            return Err(RuleError::Duplicate { domain: key });
        }
        self.rules.insert(key, rule);
        Ok(())
    }

    /// Exact-key lookup.
    pub fn lookup(&self, domain: &str) -> Option<&SiteRule> {
        self.rules.get(&domain.to_ascii_lowercase())
    }

    /// Finds the rule for a host: the exact host first, then the host without
    /// `www.`, then wildcard keys (`.parent`) from the most to the least specific.
    pub fn resolve(&self, host: &str) -> Option<(&str, &SiteRule)> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let bare = host.strip_prefix("www.").unwrap_or(&host).to_string();
        let mut keys = vec![host.clone(), bare.clone()];
        let mut suffix = bare.as_str();
        loop {
            keys.push(format!(".{suffix}"));
            match suffix.split_once('.') {
                Some((_, rest)) if rest.contains('.') => suffix = rest,
                _ => break,
            }
        }
        keys.iter()
            .find_map(|key| self.rules.get_key_value(key))
            .map(|(key, rule)| (key.as_str(), rule))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
