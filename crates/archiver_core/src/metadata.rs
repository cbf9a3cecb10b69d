//! Structured metadata scraping.
//!
//! [`extract_meta`] collects raw values under namespaced keys:
//!
//! | prefix | source |
//! |--------|--------|
//! | `html.` | `<title>`, `lang`, `dir`, plain `<meta name>` |
//! | `graph.` | Open Graph `og:*` |
//! | `article.` | `article:*` properties |
//! | `twitter.` | Twitter cards |
//! | `dc.` | Dublin Core |
//! | `schema.` | microdata and JSON-LD article nodes |
//! | `fediverse.` | `fediverse:creator` |
//! | `oembed.` | oEmbed payload, once fetched |
//!
//! [`DocumentMeta::from_meta`] then picks the final properties by priority.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::dom::Document;

const DESCRIPTION_WORDS: usize = 60;

const MICRODATA_PROPS: &[&str] = &[
    "headline",
    "name",
    "description",
    "author",
    "datePublished",
    "dateModified",
    "image",
    "inLanguage",
    "publisher",
];

const ARTICLE_TYPES: &[&str] = &[
    "Article",
    "NewsArticle",
    "BlogPosting",
    "Report",
    "ScholarlyArticle",
    "TechArticle",
    "SocialMediaPosting",
    "VideoObject",
];

/// Ordered multimap of raw metadata values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaMap(BTreeMap<String, Vec<String>>);

impl MetaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value; blank values are ignored.
    pub fn add(&mut self, key: &str, value: &str) {
        let value = collapse_whitespace(value);
        if value.is_empty() {
            return;
        }
        let values = self.0.entry(key.to_string()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    /// Replaces all values of a key.
    pub fn set(&mut self, key: &str, value: &str) {
        self.0.remove(key);
        self.add(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value of the first key that has one.
    pub fn lookup(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    #[default]
    Article,
    Photo,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    Ltr,
    Rtl,
}

impl TextDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ltr" => Some(TextDirection::Ltr),
            "rtl" => Some(TextDirection::Rtl),
            _ => None,
        }
    }
}

impl DocumentType {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        let head = value.split('.').next().unwrap_or_default();
        match head {
            "article" => Some(DocumentType::Article),
            "photo" | "image" => Some(DocumentType::Photo),
            "video" => Some(DocumentType::Video),
            _ => None,
        }
    }
}

/// Final metadata of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub title: String,
    pub description: Option<String>,
    pub site_name: Option<String>,
    pub authors: Vec<String>,
    pub published: Option<String>,
    pub lang: Option<String>,
    pub direction: Option<TextDirection>,
    pub doc_type: DocumentType,
    pub picture_url: Option<String>,
}

impl DocumentMeta {
    pub fn from_meta(meta: &MetaMap, source: &Url) -> Self {
        let host = source
            .host_str()
            .map(|h| h.strip_prefix("www.").unwrap_or(h).to_string());

        let title = meta
            .lookup(&["graph.title", "twitter.title", "schema.headline", "html.title", "dc.title"])
            .map(str::to_string)
            .or_else(|| host.clone())
            .unwrap_or_default();

        let description = meta
            .lookup(&[
                "graph.description",
                "twitter.description",
                "schema.description",
                "html.description",
                "dc.description",
            ])
            .map(truncate_words);

        let site_name = meta
            .lookup(&["graph.site_name", "schema.publisher", "oembed.provider_name"])
            .map(str::to_string)
            .or(host);

        let authors = [
            "oembed.author_name",
            "schema.author",
            "html.author",
            "dc.creator",
            "article.author",
            "html.byl",
            "fediverse.creator",
        ]
        .iter()
        .map(|key| {
            meta.get_all(key)
                .iter()
                .filter(|a| !looks_like_url(a))
                .cloned()
                .collect::<Vec<_>>()
        })
        .find(|values| !values.is_empty())
        .unwrap_or_default();

        let published = meta
            .lookup(&[
                "schema.datePublished",
                "article.published_time",
                "html.date",
                "dc.date",
                "dc.issued",
            ])
            .map(str::to_string);

        let lang = meta
            .lookup(&["html.lang", "graph.locale", "schema.inLanguage", "dc.language"])
            .and_then(|l| {
                let short: String = l.chars().take(2).collect::<String>().to_ascii_lowercase();
                (short.len() == 2 && short.chars().all(|c| c.is_ascii_alphabetic()))
                    .then_some(short)
            });

        let direction = meta.get("html.dir").and_then(TextDirection::parse);

        let doc_type = ["oembed.type", "graph.type", "dc.type"]
            .iter()
            .filter_map(|k| meta.get(k))
            .find_map(DocumentType::parse)
            .unwrap_or_default();

        let picture_url = meta
            .lookup(&["graph.image", "twitter.image", "schema.image", "oembed.thumbnail_url"])
            .and_then(|u| source.join(u).ok())
            .map(String::from);

        Self {
            title,
            description,
            site_name,
            authors,
            published,
            lang,
            direction,
            doc_type,
            picture_url,
        }
    }
}

/// Scrapes every supported metadata source of a parsed document.
pub fn extract_meta(doc: &Document) -> MetaMap {
    let mut meta = MetaMap::new();

    if let Ok(Some(title)) = doc.first("title") {
        meta.add("html.title", &doc.text(title));
    }
    if let Ok(Some(html)) = doc.first("html") {
        if let Some(lang) = doc.attr(html, "lang") {
            meta.add("html.lang", &lang);
        }
        if let Some(dir) = doc.attr(html, "dir") {
            meta.add("html.dir", &dir);
        }
    }
    if meta.get("html.dir").is_none() {
        if let Some(dir) = doc.body().and_then(|b| doc.attr(b, "dir")) {
            meta.add("html.dir", &dir);
        }
    }

    for node in doc.select("meta[content]").unwrap_or_default() {
        let Some(content) = doc.attr(node, "content") else {
            continue;
        };
        let key = doc
            .attr(node, "property")
            .or_else(|| doc.attr(node, "name"))
            .and_then(|name| meta_key(&name));
        if let Some(key) = key {
            meta.add(&key, &content);
        }
        if let Some(prop) = doc.attr(node, "itemprop") {
            if MICRODATA_PROPS.contains(&prop.as_str()) {
                meta.add(&format!("schema.{prop}"), &content);
            }
        }
    }

    for node in doc.select("[itemprop]:not(meta)").unwrap_or_default() {
        let Some(prop) = doc.attr(node, "itemprop") else {
            continue;
        };
        if !MICRODATA_PROPS.contains(&prop.as_str()) {
            continue;
        }
        let value = doc
            .attr(node, "content")
            .or_else(|| doc.attr(node, "datetime"))
            .unwrap_or_else(|| doc.text(node));
        if value.len() <= 300 {
            meta.add(&format!("schema.{prop}"), &value);
        }
    }

    for node in doc
        .select(r#"script[type="application/ld+json"]"#)
        .unwrap_or_default()
    {
        if let Ok(value) = serde_json::from_str::<Value>(&doc.text(node)) {
            if let Some(article) = find_article_node(&value) {
                add_json_ld(&mut meta, article);
            }
        }
    }

    for node in doc
        .select(r#"link[rel~="alternate"][type="application/json+oembed"][href]"#)
        .unwrap_or_default()
    {
        if let Some(href) = doc.attr(node, "href") {
            meta.add("link.oembed", &href);
        }
    }

    meta
}

fn meta_key(name: &str) -> Option<String> {
    let name = name.trim().to_ascii_lowercase();
    if name.is_empty() {
        return None;
    }
    let key = if let Some(rest) = name.strip_prefix("og:") {
        format!("graph.{rest}")
    } else if let Some(rest) = name.strip_prefix("article:") {
        format!("article.{rest}")
    } else if let Some(rest) = name.strip_prefix("twitter:") {
        format!("twitter.{rest}")
    } else if let Some(rest) = name
        .strip_prefix("dcterms.")
        .or_else(|| name.strip_prefix("dc."))
    {
        format!("dc.{rest}")
    } else if let Some(rest) = name.strip_prefix("fediverse:") {
        format!("fediverse.{rest}")
    } else {
        format!("html.{name}")
    };
    Some(key)
}

fn find_article_node(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_article_node),
        Value::Object(map) => {
            if is_article_type(map.get("@type")) {
                return Some(value);
            }
            map.get("@graph").and_then(find_article_node)
        }
        _ => None,
    }
}

fn is_article_type(kind: Option<&Value>) -> bool {
    match kind {
        Some(Value::String(s)) => ARTICLE_TYPES.contains(&s.as_str()),
        Some(Value::Array(items)) => items.iter().any(|i| is_article_type(Some(i))),
        _ => false,
    }
}

fn add_json_ld(meta: &mut MetaMap, node: &Value) {
    for (field, key) in [
        ("headline", "schema.headline"),
        ("description", "schema.description"),
        ("inLanguage", "schema.inLanguage"),
        ("datePublished", "schema.datePublished"),
    ] {
        if let Some(text) = node.get(field).and_then(Value::as_str) {
            meta.add(key, text);
        }
    }
    for image in json_names(node.get("image"), "url") {
        meta.add("schema.image", &image);
    }
    for publisher in json_names(node.get("publisher"), "name") {
        meta.add("schema.publisher", &publisher);
    }
    for author in json_names(node.get("author"), "name") {
        meta.add("schema.author", &author);
    }
}

/// Strings, or the `field` of objects, in a scalar-or-array JSON value.
fn json_names(value: Option<&Value>, field: &str) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Object(map)) => map
            .get(field)
            .and_then(Value::as_str)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        Some(Value::Array(items)) => items
            .iter()
            .flat_map(|item| json_names(Some(item), field))
            .collect(),
        _ => Vec::new(),
    }
}

/// The oEmbed discovery URL, when the page advertises one.
pub fn oembed_endpoint(meta: &MetaMap, base: &Url) -> Option<Url> {
    meta.get("link.oembed").and_then(|href| base.join(href).ok())
}

/// Stores the scalar fields of an oEmbed payload under `oembed.*`.
pub fn apply_oembed(meta: &mut MetaMap, payload: &Value) {
    let Some(map) = payload.as_object() else {
        return;
    };
    for (key, value) in map {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        meta.set(&format!("oembed.{key}"), &text);
    }
}

fn truncate_words(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= DESCRIPTION_WORDS {
        return words.join(" ");
    }
    format!("{}...", words[..DESCRIPTION_WORDS].join(" "))
}

fn looks_like_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

pub(crate) fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn priority_and_normalization() {
        let html = r#"<html lang="fr-FR" dir="RTL"><head>
            <title>HTML title</title>
            <meta name="twitter:title" content="Card title">
            <meta property="og:title" content="Graph title">
            <meta property="og:type" content="video.other">
            <meta name="author" content="Jane Roe">
            <meta property="article:author" content="https://example.com/jane">
        </head><body></body></html>"#;
        let doc = Document::parse(html);
        let meta = extract_meta(&doc);
        let url = Url::parse("https://www.example.com/a").unwrap();
        let props = DocumentMeta::from_meta(&meta, &url);

        assert_eq!(props.title, "Graph title");
        assert_eq!(props.lang.as_deref(), Some("fr"));
        assert_eq!(props.direction, Some(TextDirection::Rtl));
        assert_eq!(props.doc_type, DocumentType::Video);
        assert_eq!(props.authors, vec!["Jane Roe".to_string()]);
        assert_eq!(props.site_name.as_deref(), Some("example.com"));
    }

    #[test]
    fn description_is_cut_at_sixty_words() {
        let long = vec!["word"; 70].join(" ");
        let mut meta = MetaMap::new();
        meta.add("html.description", &long);
        let props = DocumentMeta::from_meta(&meta, &Url::parse("http://x.org").unwrap());
        let description = props.description.unwrap();

        assert!(description.ends_with("..."));
        assert_eq!(description.trim_end_matches("...").split(' ').count(), 60);
    }
}
