//! Record rules: id allocation, field ordering, summaries and search.
//!
//! A record is an ordered JSON object. One field, the display name, must be
//! present and non-empty. Everything else is free-form.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// An ordered field map.
pub type Record = Map<String, Value>;

/// Record values starting with this prefix point at an uploaded image.
pub const IMAGE_PREFIX: &str = "/static/img/";

const ID_PREFIX: &str = "data_";

/// Field stripped from incoming records; it belongs to the transport.
const CSRF_FIELD: &str = "csrf_token";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("field '{0}' is required")]
    MissingName(String),

    #[error("record must be a JSON object")]
    NotAnObject,
}

/// Numeric part of a `data_<n>` id.
pub fn parse_id(id: &str) -> Option<u64> {
    id.strip_prefix(ID_PREFIX)?.parse().ok()
}

/// `data_<max + 1>` over the well-formed ids; `data_1` when there are none.
pub fn next_id<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    let max = ids.into_iter().filter_map(parse_id).max().unwrap_or(0);
    format!("{ID_PREFIX}{}", max + 1)
}

/// Whether a value counts as filled in: not null, false, zero, or empty.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn require_name(record: &Record, name_field: &str) -> Result<(), RecordError> {
    match record.get(name_field) {
        Some(value) if is_present(value) => Ok(()),
        _ => Err(RecordError::MissingName(name_field.to_string())),
    }
}

/// Interpret a JSON value as a record.
pub fn into_record(value: Value) -> Result<Record, RecordError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(RecordError::NotAnObject),
    }
}

/// Lay out a new record in the order the client asked for. Fields missing
/// from `fields_order` are dropped; the name field is always kept, first if
/// the order does not mention it.
pub fn order_for_create(
    mut data: Record,
    fields_order: &[String],
    name_field: &str,
) -> Result<Record, RecordError> {
    data.shift_remove(CSRF_FIELD);
    require_name(&data, name_field)?;

    let mut ordered = Record::new();
    if !fields_order.iter().any(|f| f == name_field) {
        if let Some(name) = data.shift_remove(name_field) {
            ordered.insert(name_field.to_string(), name);
        }
    }
    for field in fields_order {
        if let Some(value) = data.shift_remove(field) {
            ordered.insert(field.clone(), value);
        }
    }
    Ok(ordered)
}

/// Merge a replacement into the layout of the record it replaces: the name
/// first, then previously existing fields in their old order, then new
/// fields in the order given. Fields absent from `incoming` are removed.
pub fn order_for_update(
    previous: &Record,
    mut incoming: Record,
    name_field: &str,
) -> Result<Record, RecordError> {
    incoming.shift_remove(CSRF_FIELD);
    require_name(&incoming, name_field)?;

    let mut ordered = Record::new();
    if let Some(name) = incoming.shift_remove(name_field) {
        ordered.insert(name_field.to_string(), name);
    }
    for key in previous.keys().filter(|k| k.as_str() != name_field) {
        if let Some(value) = incoming.shift_remove(key) {
            ordered.insert(key.clone(), value);
        }
    }
    // Whatever is left is new, still in client order.
    ordered.extend(incoming);
    Ok(ordered)
}

/// Listing entry for the index page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub name: Value,
    pub first_value: Option<Value>,
}

/// The display name plus the first other field's value.
pub fn summarize(record: &Record, name_field: &str) -> Summary {
    Summary {
        name: record.get(name_field).cloned().unwrap_or(Value::Null),
        first_value: record
            .iter()
            .find(|(key, _)| key.as_str() != name_field)
            .map(|(_, value)| value.clone()),
    }
}

/// Text form used for searching: strings as-is, everything else as JSON.
fn searchable_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

/// True if any field value contains `query`, case-insensitively.
/// An empty query matches everything.
pub fn matches(record: &Record, query: &str) -> bool {
    let query = query.to_lowercase();
    record
        .values()
        .any(|value| searchable_text(value).contains(&query))
}

/// File names (relative to the upload directory) of images the record points at.
pub fn image_references(record: &Record) -> impl Iterator<Item = &str> {
    record.values().filter_map(|value| {
        value
            .as_str()
            .and_then(|s| s.strip_prefix(IMAGE_PREFIX))
            .filter(|name| !name.is_empty())
    })
}
