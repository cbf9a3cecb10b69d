//! Archiver core: pure extraction logic (DOM, rules, metadata, scoring).
//! No IO happens here; fetching, scripting and storage live in the engine.
mod body;
mod dom;
mod links;
mod metadata;
mod readability;
mod resource;
mod rules;

pub use body::{
    all_texts, apply_replace_strings, first_text, remove_scripting, select_body, strip,
};
pub use dom::{compile_selector, Document, DomError};
pub use ego_tree::NodeId;
pub use links::{
    absolutize_links, resolve_url, ExtractedLink, LinkCollector, LinkKind, DEFAULT_MAX_LINKS,
};
pub use metadata::{
    apply_oembed, extract_meta, oembed_endpoint, DocumentMeta, DocumentType, MetaMap,
    TextDirection,
};
pub use readability::{Readability, ReadabilityMiss, ReadabilityOutcome, ReadabilitySettings};
pub use resource::{
    content_address, discover_images, is_icon_size, is_inline_with_text, largest_candidate,
    merge_picture_sources, resource_name, unwrap_noscript_images, ImageRef, Resource,
    ResourceState, RESOURCE_DIR,
};
pub use rules::{parse_rule, RuleEdit, RuleError, SiteRule, SiteRuleIndex, StripSelector};
