//! Field binding: projects record values onto a fragment instance's slots.
//!
//! DESIGN
//! ======
//! A slot is any element carrying `data-field`. Its `data-bind` attribute
//! picks one rule from a closed set:
//!
//! - absent / `text`: escaped text content (input value for form controls)
//! - `attr:<name>`: attribute value (`attr:src`, `attr:href`, `attr:data-id`);
//!   URL attributes drop values with a script or other non-web scheme
//! - `status`: status code through the fixed badge table
//! - `rich`: sanitized markup, the only way markup reaches the output
//!
//! Binding only mutates the instance it is given. Record keys without a slot
//! and slots without a record key are skipped silently.

use serde_json::Value;
use tracing::{debug, warn};

use crate::markup::{self, Element};
use crate::record::{self, Record};

pub const FIELD_ATTR: &str = "data-field";
pub const BIND_ATTR: &str = "data-bind";
pub const TITLE_ATTR: &str = "data-title";

/// Attributes the browser resolves as URLs; bound values must pass the link check.
const URL_ATTRS: &[&str] = &["href", "src", "action", "formaction", "poster", "cite"];

// =============================================================================
// BINDING KINDS
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Text,
    Attribute(String),
    Status,
    Rich,
}

impl BindingKind {
    /// Parse a `data-bind` value.
    ///
    /// # Errors
    ///
    /// Returns the offending value when it names no known rule.
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        match raw.map(str::trim) {
            None | Some("" | "text") => Ok(Self::Text),
            Some("status") => Ok(Self::Status),
            Some("rich") => Ok(Self::Rich),
            Some(other) => match other.strip_prefix("attr:") {
                Some(name) if is_attribute_name(name) => Ok(Self::Attribute(name.to_ascii_lowercase())),
                _ => Err(other.to_owned()),
            },
        }
    }
}

fn is_attribute_name(name: &str) -> bool {
    !name.is_empty()
        && !name.to_ascii_lowercase().starts_with("on")
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// One declared slot of a fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub title: Option<String>,
    pub kind: BindingKind,
}

impl FieldDecl {
    /// Column title: declared title, else the field name capitalized.
    #[must_use]
    pub fn display_title(&self) -> String {
        self.title.clone().unwrap_or_else(|| capitalize(&self.name))
    }
}

pub(crate) fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Collect slot declarations in document order, first declaration per name wins.
///
/// # Errors
///
/// Returns a message naming the field and value for an unknown `data-bind`.
pub fn declared_fields(template: &Element) -> Result<Vec<FieldDecl>, String> {
    let mut fields: Vec<FieldDecl> = Vec::new();
    for el in template.find_all(&|el: &Element| el.attr(FIELD_ATTR).is_some()) {
        let name = el.attr(FIELD_ATTR).unwrap_or_default().trim().to_owned();
        if name.is_empty() {
            continue;
        }
        let kind = BindingKind::parse(el.attr(BIND_ATTR))
            .map_err(|raw| format!("field `{name}` has unknown binding `{raw}`"))?;
        if fields.iter().any(|f| f.name == name) {
            continue;
        }
        let title = el.attr(TITLE_ATTR).map(str::to_owned);
        fields.push(FieldDecl { name, title, kind });
    }
    Ok(fields)
}

// =============================================================================
// STATUS BADGES
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusBadge {
    pub label: String,
    /// `None` renders unstyled.
    pub color: Option<&'static str>,
}

/// Map a job status code to its badge.
#[must_use]
pub fn status_badge(code: i64) -> StatusBadge {
    let (label, color) = match code {
        1 => ("Active", "black"),
        2 => ("Preprocessed", "orange"),
        3 => ("Complete", "green"),
        4 | 5 => ("(placeholder)", "black"),
        14 => ("Other", "black"),
        90..=95 => ("Error", "red"),
        other => return StatusBadge { label: other.to_string(), color: None },
    };
    StatusBadge { label: label.to_owned(), color: Some(color) }
}

fn status_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// BINDING
// =============================================================================

/// Bind `record` onto every declared slot of `instance`.
pub fn bind(instance: &mut Element, record: &Record) {
    instance.visit_mut(&mut |el: &mut Element| {
        let Some(field) = el.attr(FIELD_ATTR).map(str::to_owned) else {
            return;
        };
        let Some(value) = record.get(field.trim()) else {
            return;
        };
        match BindingKind::parse(el.attr(BIND_ATTR)) {
            Ok(kind) => apply(el, &kind, value),
            Err(raw) => warn!(field = %field, binding = %raw, "skipping slot with unknown binding"),
        }
    });
}

fn apply(el: &mut Element, kind: &BindingKind, value: &Value) {
    let Some(text) = record::display_value(value) else {
        debug!(tag = %el.tag, "skipping non-scalar value");
        return;
    };
    match kind {
        BindingKind::Text => set_value(el, text),
        BindingKind::Attribute(name) if URL_ATTRS.contains(&name.as_str()) && !markup::is_safe_href(&text) => {
            warn!(attr = %name, "dropping unsafe url value");
            el.remove_attr(name);
        }
        BindingKind::Attribute(name) => el.set_attr(name, text),
        BindingKind::Status => match status_code(value) {
            Some(code) => {
                let badge = status_badge(code);
                el.set_text(badge.label);
                if let Some(color) = badge.color {
                    el.set_attr("style", format!("color: {color}"));
                }
            }
            None => el.set_text(text),
        },
        BindingKind::Rich => el.set_children(markup::sanitize_rich(&text)),
    }
}

/// Text binding; form controls receive the value instead of content.
fn set_value(el: &mut Element, text: String) {
    match el.tag.as_str() {
        "input" => el.set_attr("value", text),
        "select" => el.visit_mut(&mut |option: &mut Element| {
            if option.tag != "option" {
                return;
            }
            let option_value = option.attr("value").map_or_else(|| option.text(), str::to_owned);
            if option_value == text {
                option.set_attr("selected", "");
            } else {
                option.remove_attr("selected");
            }
        }),
        _ => el.set_text(text),
    }
}

#[cfg(test)]
#[path = "binder_test.rs"]
mod tests;
