//! Owned element tree for component fragments.
//!
//! DESIGN
//! ======
//! `scraper` (html5ever) does the parsing; the result is copied into a small
//! owned tree so a fragment can be cloned per use and mutated freely without
//! touching the cached template. Serialization escapes every text node and
//! attribute value, so record values reach the output only as data.
//!
//! Rich content goes through `sanitize_rich`, which keeps a short tag
//! allowlist, drops every attribute except safe `href` on links, unwraps
//! unknown elements and removes script-like elements with their content.

use std::fmt::Write;

use scraper::{ElementRef, Html};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

const RICH_TAGS: &[&str] = &["a", "b", "br", "code", "em", "i", "li", "ol", "p", "pre", "span", "strong", "ul"];

const DROPPED_TAGS: &[&str] = &["script", "style", "iframe", "object", "embed", "template", "noscript", "svg", "math"];

// =============================================================================
// TREE
// =============================================================================

/// A node in the owned tree: an element or a run of text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with ordered attributes and children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into(), attrs: Vec::new(), children: Vec::new() }
    }

    #[must_use]
    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set an attribute, replacing any existing value in place.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.attrs.iter_mut().find(|(key, _)| key == name) {
            slot.1 = value;
        } else {
            self.attrs.push((name.to_owned(), value));
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self.attrs.iter().position(|(key, _)| key == name)?;
        Some(self.attrs.remove(idx).1)
    }

    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    pub fn add_class(&mut self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let classes = match self.attr("class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {class}", existing.trim()),
            _ => class.to_owned(),
        };
        self.set_attr("class", classes);
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![Node::Text(text.into())];
    }

    /// Replace all children with the given nodes.
    pub fn set_children(&mut self, nodes: Vec<Node>) {
        self.children = nodes;
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    pub fn append(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Concatenated text of all descendant text nodes.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Element(el) => el.collect_text(out),
                Node::Text(text) => out.push_str(text),
            }
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// First element (pre-order, self included) matching `pred`.
    pub fn find<P: Fn(&Element) -> bool>(&self, pred: &P) -> Option<&Element> {
        if pred(self) {
            return Some(self);
        }
        self.child_elements().find_map(|el| el.find(pred))
    }

    pub fn find_mut<P: Fn(&Element) -> bool>(&mut self, pred: &P) -> Option<&mut Element> {
        if pred(self) {
            return Some(self);
        }
        for child in &mut self.children {
            if let Node::Element(el) = child {
                if let Some(found) = el.find_mut(pred) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// All elements (pre-order, self included) matching `pred`.
    pub fn find_all<P: Fn(&Element) -> bool>(&self, pred: &P) -> Vec<&Element> {
        let mut out = Vec::new();
        self.collect_matching(pred, &mut out);
        out
    }

    fn collect_matching<'a, P: Fn(&Element) -> bool>(&'a self, pred: &P, out: &mut Vec<&'a Element>) {
        if pred(self) {
            out.push(self);
        }
        for el in self.child_elements() {
            el.collect_matching(pred, out);
        }
    }

    /// Visit every element (pre-order, self included) mutably.
    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
        f(self);
        for child in &mut self.children {
            if let Node::Element(el) = child {
                el.visit_mut(f);
            }
        }
    }

    /// Element whose `data-container` attribute equals `name`.
    pub fn container_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.find_mut(&|el: &Element| el.attr("data-container") == Some(name))
    }

    #[must_use]
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (name, value) in &self.attrs {
            let _ = write!(out, " {name}=\"{}\"", html_escape::encode_double_quoted_attribute(value));
        }
        out.push('>');
        if VOID_ELEMENTS.contains(&self.tag.as_str()) {
            return;
        }
        for child in &self.children {
            match child {
                Node::Element(el) => el.write_html(out),
                Node::Text(text) => out.push_str(&html_escape::encode_text(text)),
            }
        }
        let _ = write!(out, "</{}>", self.tag);
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Parse markup as body content into owned nodes. Comments are dropped.
#[must_use]
pub fn parse_fragment(markup: &str) -> Vec<Node> {
    let html = Html::parse_fragment(markup);
    convert_children(html.root_element())
}

fn convert_children(el: ElementRef<'_>) -> Vec<Node> {
    let mut nodes = Vec::new();
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            nodes.push(Node::Element(convert_element(child_el)));
        } else if let scraper::Node::Text(text) = child.value() {
            nodes.push(Node::Text(String::from(&**text)));
        }
    }
    nodes
}

fn convert_element(el: ElementRef<'_>) -> Element {
    let value = el.value();
    Element {
        tag: value.name().to_owned(),
        attrs: value
            .attrs()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect(),
        children: convert_children(el),
    }
}

// =============================================================================
// SANITIZING
// =============================================================================

/// Parse untrusted markup and keep only the rich-text allowlist.
#[must_use]
pub fn sanitize_rich(markup: &str) -> Vec<Node> {
    clean_nodes(parse_fragment(markup))
}

fn clean_nodes(nodes: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::new();
    for node in nodes {
        match node {
            Node::Text(text) => out.push(Node::Text(text)),
            Node::Element(el) => {
                if DROPPED_TAGS.contains(&el.tag.as_str()) {
                    continue;
                }
                let href = if el.tag == "a" {
                    el.attr("href").filter(|href| is_safe_href(href)).map(str::to_owned)
                } else {
                    None
                };
                let children = clean_nodes(el.children);
                if RICH_TAGS.contains(&el.tag.as_str()) {
                    let mut kept = Element::new(el.tag);
                    if let Some(href) = href {
                        kept.set_attr("href", href);
                    }
                    kept.children = children;
                    out.push(Node::Element(kept));
                } else {
                    out.extend(children);
                }
            }
        }
    }
    out
}

/// Whether `href` is relative or uses an http, https or mailto scheme.
pub(crate) fn is_safe_href(href: &str) -> bool {
    let href = href.trim().to_ascii_lowercase();
    if ["http://", "https://", "mailto:"].iter().any(|scheme| href.starts_with(scheme)) {
        return true;
    }
    // Relative references carry no scheme before the first path, query or fragment delimiter.
    let scheme_end = href.find(':');
    let path_start = href.find(['/', '?', '#']);
    match (scheme_end, path_start) {
        (None, _) => true,
        (Some(colon), Some(delim)) => delim < colon,
        (Some(_), None) => false,
    }
}

#[cfg(test)]
#[path = "markup_test.rs"]
mod tests;
