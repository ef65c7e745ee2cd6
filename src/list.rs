//! List rendering: one bound fragment instance per record.

use crate::binder::{self, FieldDecl};
use crate::fragment::Fragment;
use crate::markup::Element;
use crate::record::Record;

/// Whether a list gets a header row derived from the fragment's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    None,
    Columns,
}

/// One header column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub field: String,
    pub title: String,
}

/// Header columns in slot declaration order.
#[must_use]
pub fn columns(fragment: &Fragment) -> Vec<Column> {
    fragment
        .fields()
        .iter()
        .map(|field: &FieldDecl| Column { field: field.name.clone(), title: field.display_title() })
        .collect()
}

/// Header row matching the fragment's root tag: `<tr><th>` for table rows,
/// otherwise a `header` element of the same tag with one `span` per column.
#[must_use]
pub fn header_row(fragment: &Fragment) -> Element {
    let template = fragment.instantiate();
    let (row_tag, cell_tag) = if template.tag == "tr" { ("tr", "th") } else { (template.tag.as_str(), "span") };
    let mut row = Element::new(row_tag).with_attr("class", "header");
    for column in columns(fragment) {
        row.append(
            Element::new(cell_tag)
                .with_attr("data-column", column.field)
                .with_text(column.title),
        );
    }
    row
}

/// Clear `container` and append one bound clone per record, in input order.
pub fn render(container: &mut Element, fragment: &Fragment, records: &[Record], header: Header) {
    container.clear();
    if header == Header::Columns {
        container.append(header_row(fragment));
    }
    for record in records {
        let mut instance = fragment.instantiate();
        binder::bind(&mut instance, record);
        container.append(instance);
    }
}

#[cfg(test)]
#[path = "list_test.rs"]
mod tests;
