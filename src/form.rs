//! Form dialog controller.
//!
//! DESIGN
//! ======
//! A dialog is a form fragment instance plus the table it saves to. Opening
//! it for edit binds the record into the form controls; submitting reads
//! them back, checks `data-len-min` constraints and sends POST (no `id`) or
//! PUT (`{table}/{id}`).
//!
//! ERROR HANDLING
//! ==============
//! Validation runs to completion and reports every violation as one
//! aggregated `FormError::Invalid`; no request is made in that case. The
//! dialog only closes after the backend accepted the record.

use serde_json::Value;
use tracing::info;

use crate::api::{ApiError, Backend, Table};
use crate::binder::{self, FIELD_ATTR, TITLE_ATTR};
use crate::fragment::Fragment;
use crate::markup::Element;
use crate::record::Record;

pub const LEN_MIN_ATTR: &str = "data-len-min";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{title} must be at least {min} characters")]
pub struct ValidationError {
    pub field: String,
    pub title: String,
    pub min: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    /// One or more fields failed validation; nothing was submitted.
    #[error("{}", join_messages(.0))]
    Invalid(Vec<ValidationError>),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("form dialog is not open")]
    Closed,
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

// =============================================================================
// SERIALIZING
// =============================================================================

fn is_control(el: &Element) -> bool {
    matches!(el.tag.as_str(), "input" | "textarea" | "select")
        && el.attr(FIELD_ATTR).is_some_and(|f| !f.trim().is_empty())
        && !matches!(el.attr("type"), Some("file" | "submit" | "button" | "reset"))
}

fn control_value(el: &Element) -> Value {
    match el.tag.as_str() {
        "textarea" => Value::String(el.text()),
        "select" => {
            let options = el.find_all(&|e: &Element| e.tag == "option");
            let chosen = options
                .iter()
                .find(|o| o.attr("selected").is_some())
                .or_else(|| options.first());
            let value = chosen.map_or_else(String::new, |o| o.attr("value").map_or_else(|| o.text(), str::to_owned));
            Value::String(value)
        }
        _ if el.attr("type") == Some("checkbox") => Value::Bool(el.attr("checked").is_some()),
        _ => Value::String(el.attr("value").unwrap_or_default().to_owned()),
    }
}

/// Read every bound control of `form` into a record.
#[must_use]
pub fn serialize(form: &Element) -> Record {
    form.find_all(&is_control)
        .into_iter()
        .map(|el| (el.attr(FIELD_ATTR).unwrap_or_default().trim().to_owned(), control_value(el)))
        .collect()
}

// =============================================================================
// VALIDATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthRule {
    pub field: String,
    pub title: String,
    pub min: usize,
}

/// Minimum-length rules declared with `data-len-min` on bound controls.
#[must_use]
pub fn rules(form: &Element) -> Vec<LengthRule> {
    form.find_all(&is_control)
        .into_iter()
        .filter_map(|el| {
            let min = el.attr(LEN_MIN_ATTR)?.trim().parse::<usize>().ok()?;
            let field = el.attr(FIELD_ATTR)?.trim().to_owned();
            let title = el
                .attr(TITLE_ATTR)
                .map_or_else(|| binder::capitalize(&field), str::to_owned);
            Some(LengthRule { field, title, min })
        })
        .collect()
}

/// Check every rule; surrounding whitespace does not count toward length.
#[must_use]
pub fn validate(record: &Record, rules: &[LengthRule]) -> Vec<ValidationError> {
    rules
        .iter()
        .filter(|rule| {
            let value = record.display(&rule.field).unwrap_or_default();
            value.trim().chars().count() < rule.min
        })
        .map(|rule| ValidationError { field: rule.field.clone(), title: rule.title.clone(), min: rule.min })
        .collect()
}

/// POST when the record has no id, PUT keyed by id otherwise.
///
/// # Errors
///
/// Returns the backend's [`ApiError`].
pub async fn submit_record(backend: &dyn Backend, table: Table, mut record: Record) -> Result<Record, ApiError> {
    match record.id() {
        Some(id) => {
            info!(%table, %id, "updating record");
            backend.update(table, &id, &record).await
        }
        None => {
            record.remove("id");
            info!(%table, "creating record");
            backend.create(table, &record).await
        }
    }
}

// =============================================================================
// DIALOG
// =============================================================================

pub struct FormDialog {
    table: Table,
    template: Element,
    form: Option<Element>,
}

impl FormDialog {
    #[must_use]
    pub fn new(table: Table, fragment: &Fragment) -> Self {
        Self { table, template: fragment.instantiate(), form: None }
    }

    #[must_use]
    pub fn table(&self) -> Table {
        self.table
    }

    /// Open with empty fields for a new record.
    pub fn open_new(&mut self) {
        self.form = Some(self.template.clone());
    }

    /// Open with fields populated from `record`.
    pub fn open_edit(&mut self, record: &Record) {
        let mut form = self.template.clone();
        binder::bind(&mut form, record);
        self.form = Some(form);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.form.is_some()
    }

    pub fn close(&mut self) {
        self.form = None;
    }

    #[must_use]
    pub fn form(&self) -> Option<&Element> {
        self.form.as_ref()
    }

    /// Set one field as a user would. Returns false when the dialog is closed.
    pub fn set_value(&mut self, field: &str, value: impl Into<Value>) -> bool {
        let Some(form) = self.form.as_mut() else {
            return false;
        };
        let mut record = Record::new();
        record.insert(field, value);
        binder::bind(form, &record);
        true
    }

    /// Validate and save the open form, closing the dialog on success.
    ///
    /// # Errors
    ///
    /// Returns [`FormError::Invalid`] without calling the backend when any
    /// rule fails, [`FormError::Api`] when the backend rejects the record.
    pub async fn submit(&mut self, backend: &dyn Backend) -> Result<Record, FormError> {
        let form = self.form.as_ref().ok_or(FormError::Closed)?;
        let record = serialize(form);
        let errors = validate(&record, &rules(form));
        if !errors.is_empty() {
            return Err(FormError::Invalid(errors));
        }
        let saved = submit_record(backend, self.table, record).await?;
        self.close();
        Ok(saved)
    }
}

#[cfg(test)]
#[path = "form_test.rs"]
mod tests;
