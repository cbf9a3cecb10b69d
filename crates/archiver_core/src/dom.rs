//! Mutable DOM over `scraper::Html`.
//!
//! Nodes are addressed by [`NodeId`]. Detached nodes stay in the underlying
//! arena but are never returned by selection, which always walks from the
//! document root.

use ego_tree::{NodeId, NodeRef};
use scraper::node::{Element, Node, Text};
use scraper::{ElementRef, Html, Selector, StrTendril};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("unknown node")]
    UnknownNode,
    #[error("node is not an element")]
    NotElement,
    #[error("invalid attribute name {0:?}")]
    InvalidAttribute(String),
    #[error("invalid tag name {0:?}")]
    InvalidTag(String),
    #[error("cannot move a node into itself or its own subtree")]
    Cycle,
    #[error("node has no parent")]
    Detached,
}

pub fn compile_selector(selector: &str) -> Result<Selector, DomError> {
    Selector::parse(selector).map_err(|err| DomError::InvalidSelector {
        selector: selector.to_string(),
        message: err.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct Document {
    html: Html,
}

impl Document {
    pub fn parse(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
        }
    }

    /// Serializes the whole document.
    pub fn html(&self) -> String {
        self.html.html()
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<NodeRef<'_, Node>> {
        self.html.tree.get(id)
    }

    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.node(id).and_then(ElementRef::wrap)
    }

    pub fn root(&self) -> NodeId {
        self.html.tree.root().id()
    }

    /// All attached elements matching `css`, in document order.
    pub fn select(&self, css: &str) -> Result<Vec<NodeId>, DomError> {
        let selector = compile_selector(css)?;
        Ok(self.select_compiled(self.root(), &selector))
    }

    /// Elements below `scope` (excluding it) matching `css`, in document order.
    pub fn select_in(&self, scope: NodeId, css: &str) -> Result<Vec<NodeId>, DomError> {
        let selector = compile_selector(css)?;
        if !self.is_attached(scope) {
            return Err(DomError::UnknownNode);
        }
        Ok(self.select_compiled(scope, &selector))
    }

    pub fn first(&self, css: &str) -> Result<Option<NodeId>, DomError> {
        Ok(self.select(css)?.into_iter().next())
    }

    pub(crate) fn select_compiled(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        let Some(scope) = self.node(scope) else {
            return Vec::new();
        };
        scope
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .filter(|el| selector.matches(el))
            .map(|el| el.id())
            .collect()
    }

    pub fn body(&self) -> Option<NodeId> {
        self.first_named("body")
    }

    pub fn head(&self) -> Option<NodeId> {
        self.first_named("head")
    }

    fn first_named(&self, tag: &str) -> Option<NodeId> {
        self.html
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == tag)
            .map(|el| el.id())
    }

    pub fn tag(&self, id: NodeId) -> Option<String> {
        self.element(id).map(|el| el.value().name().to_string())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<String> {
        self.element(id)
            .and_then(|el| el.value().attr(name))
            .map(str::to_string)
    }

    /// Concatenated descendant text of a node.
    pub fn text(&self, id: NodeId) -> String {
        match self.node(id) {
            Some(node) => node
                .descendants()
                .filter_map(|n| n.value().as_text().map(|t| &**t))
                .collect(),
            None => String::new(),
        }
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        self.element(id).map(|el| el.inner_html()).unwrap_or_default()
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        self.element(id).map(|el| el.html()).unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?
            .parent()
            .filter(|p| p.value().is_element())
            .map(|p| p.id())
    }

    /// Element children of a node.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match self.node(id) {
            Some(node) => node
                .children()
                .filter(|c| c.value().is_element())
                .map(|c| c.id())
                .collect(),
            None => Vec::new(),
        }
    }

    /// True when the node is reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let root = self.root();
        match self.node(id) {
            Some(node) => node.id() == root || node.ancestors().any(|a| a.id() == root),
            None => false,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        validate_attr_name(name)?;
        let name = name.to_ascii_lowercase();
        self.rewrite_attrs(id, |attrs| {
            match attrs.iter_mut().find(|(k, _)| *k == name) {
                Some(slot) => slot.1 = value.to_string(),
                None => attrs.push((name.clone(), value.to_string())),
            }
        })
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<(), DomError> {
        let name = name.to_ascii_lowercase();
        if self.attr(id, &name).is_none() {
            return if self.element(id).is_some() {
                Ok(())
            } else {
                Err(DomError::NotElement)
            };
        }
        self.rewrite_attrs(id, |attrs| attrs.retain(|(k, _)| *k != name))
    }

    // scraper caches id and class lookups per element, so attribute edits
    // rebuild the element from a parsed stand-in and keep the original name.
    fn rewrite_attrs(
        &mut self,
        id: NodeId,
        edit: impl FnOnce(&mut Vec<(String, String)>),
    ) -> Result<(), DomError> {
        let original = self.element(id).ok_or(DomError::NotElement)?.value().clone();
        let mut attrs: Vec<(String, String)> = original
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        edit(&mut attrs);

        let mut markup = String::from("<span");
        for (key, value) in &attrs {
            markup.push(' ');
            markup.push_str(key);
            markup.push_str("=\"");
            markup.push_str(&escape_attr(value));
            markup.push('"');
        }
        markup.push_str("></span>");

        let mut rebuilt = parsed_element(&markup, "span").ok_or(DomError::NotElement)?;
        rebuilt.name = original.name.clone();
        let mut node = self.html.tree.get_mut(id).ok_or(DomError::UnknownNode)?;
        *node.value() = Node::Element(rebuilt);
        Ok(())
    }

    /// Creates a detached element.
    pub fn create_element(&mut self, tag: &str) -> Result<NodeId, DomError> {
        let tag = tag.to_ascii_lowercase();
        if !is_valid_tag(&tag) {
            return Err(DomError::InvalidTag(tag));
        }
        let markup = match tag.as_str() {
            "td" | "th" => format!("<table><tbody><tr><{tag}></{tag}></tr></tbody></table>"),
            "tr" => "<table><tbody><tr></tr></tbody></table>".to_string(),
            "tbody" | "thead" | "tfoot" | "caption" | "colgroup" => {
                format!("<table><{tag}></{tag}></table>")
            }
            "col" => "<table><colgroup><col></colgroup></table>".to_string(),
            _ => format!("<{tag}></{tag}>"),
        };
        let element = parsed_element(&markup, &tag).ok_or(DomError::InvalidTag(tag))?;
        Ok(self.html.tree.orphan(Node::Element(element)).id())
    }

    /// Creates a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        let node = Node::Text(Text {
            text: StrTendril::from_slice(text),
        });
        self.html.tree.orphan(node).id()
    }

    /// Removes a node (and its subtree) from the document.
    pub fn detach(&mut self, id: NodeId) -> Result<(), DomError> {
        if id == self.root() {
            return Err(DomError::Detached);
        }
        let mut node = self.html.tree.get_mut(id).ok_or(DomError::UnknownNode)?;
        node.detach();
        Ok(())
    }

    /// Moves `child` to the end of `parent`'s children.
    pub fn append(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.guard_move(parent, child)?;
        let mut parent = self.html.tree.get_mut(parent).ok_or(DomError::UnknownNode)?;
        parent.append_id(child);
        Ok(())
    }

    /// Moves `node` right before `sibling`.
    pub fn insert_before(&mut self, sibling: NodeId, node: NodeId) -> Result<(), DomError> {
        let parent = self
            .node(sibling)
            .ok_or(DomError::UnknownNode)?
            .parent()
            .map(|p| p.id())
            .ok_or(DomError::Detached)?;
        self.guard_move(parent, node)?;
        if sibling == node {
            return Err(DomError::Cycle);
        }
        let mut sibling = self.html.tree.get_mut(sibling).ok_or(DomError::UnknownNode)?;
        sibling.insert_id_before(node);
        Ok(())
    }

    fn guard_move(&self, target: NodeId, moved: NodeId) -> Result<(), DomError> {
        let target_ref = self.node(target).ok_or(DomError::UnknownNode)?;
        if self.node(moved).is_none() {
            return Err(DomError::UnknownNode);
        }
        if moved == self.root() {
            return Err(DomError::Cycle);
        }
        if target == moved || target_ref.ancestors().any(|a| a.id() == moved) {
            return Err(DomError::Cycle);
        }
        Ok(())
    }

    /// Replaces the whole `<body>` content with a single
    /// `<section class="article" id="article">` holding `nodes`.
    pub fn replace_body_content(&mut self, nodes: &[NodeId]) -> Result<NodeId, DomError> {
        let body = self.body().ok_or(DomError::Detached)?;
        let section = self.create_element("section")?;
        self.set_attr(section, "class", "article")?;
        self.set_attr(section, "id", "article")?;
        for &node in nodes {
            let holds_body = node == body
                || self.node(body).is_some_and(|b| b.ancestors().any(|a| a.id() == node));
            if holds_body {
                for child in self.all_children(body) {
                    self.append(section, child)?;
                }
            } else {
                self.append(section, node)?;
            }
        }
        for child in self.all_children(body) {
            self.detach(child)?;
        }
        self.append(body, section)?;
        Ok(section)
    }

    /// All child nodes, text included.
    pub(crate) fn all_children(&self, id: NodeId) -> Vec<NodeId> {
        match self.node(id) {
            Some(node) => node.children().map(|c| c.id()).collect(),
            None => Vec::new(),
        }
    }

    pub fn rename(&mut self, id: NodeId, tag: &str) -> Result<(), DomError> {
        let probe = parsed_element(&format!("<{tag}></{tag}>"), tag)
            .ok_or_else(|| DomError::InvalidTag(tag.to_string()))?;
        let mut node = self.html.tree.get_mut(id).ok_or(DomError::UnknownNode)?;
        match node.value() {
            Node::Element(el) => {
                el.name = probe.name;
                Ok(())
            }
            _ => Err(DomError::NotElement),
        }
    }
}

fn parsed_element(markup: &str, tag: &str) -> Option<Element> {
    let fragment = Html::parse_fragment(markup);
    let found = fragment
        .tree
        .root()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == tag)
        .map(|el| el.value().clone());
    found
}

fn validate_attr_name(name: &str) -> Result<(), DomError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => chars
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DomError::InvalidAttribute(name.to_string()))
    }
}

fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    let well_formed = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
        }
        _ => false,
    };
    well_formed && !matches!(tag, "html" | "head" | "body" | "frameset")
}

pub(crate) fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
