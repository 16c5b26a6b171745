//! Projection of extracted records into table rows

use crate::config::Merger;
use crate::storage::schema::{foreign_key_column, TableSchema, ID_COLUMN};
use crate::storage::traits::Row;
use crate::url::{complete_url, url_hash, UrlParts};
use serde_json::Value;

/// Flattens `record` along the merger path into rows of `schema`
///
/// Arrays met along the path are flattened, so a path through two nested
/// lists yields one row per innermost object. Rows keep only schema columns;
/// target fields gain their foreign key and every row gets a deterministic
/// id: `hash(url)` for the first, `hash(url)-n` for the rest.
pub fn project(schema: &TableSchema, merger: &Merger, url: &str, record: &Value) -> Vec<Row> {
    if !merger.is_enabled() {
        return Vec::new();
    }

    let mut level: Vec<&Value> = vec![record];
    for segment in merger.path() {
        let mut next = Vec::new();
        for value in level {
            match value.get(segment.as_str()) {
                Some(Value::Array(items)) => next.extend(items.iter()),
                Some(value @ Value::Object(_)) => next.push(value),
                _ => {}
            }
        }
        level = next;
    }

    let base = UrlParts::parse(url).ok();
    let hash = url_hash(url);

    level
        .into_iter()
        .filter_map(Value::as_object)
        .enumerate()
        .map(|(index, object)| {
            let mut row = Row::new();
            for key in &schema.keys {
                if let Some(value) = object.get(key) {
                    row.insert(key.clone(), value.clone());
                }
            }
            for field in &schema.target_fields {
                if let Some(value) = object.get(field) {
                    row.insert(
                        foreign_key_column(field),
                        target_key(value, base.as_ref()),
                    );
                }
            }
            let id = if index == 0 {
                hash.clone()
            } else {
                format!("{}-{}", hash, index)
            };
            row.insert(ID_COLUMN.to_string(), Value::String(id));
            row
        })
        .collect()
}

/// Hash of the completed target URL, or of each URL for multi-valued fields
fn target_key(value: &Value, base: Option<&UrlParts>) -> Value {
    let key = |raw: &str| {
        let completed = base
            .and_then(|b| complete_url(raw, b))
            .unwrap_or_else(|| raw.to_string());
        Value::String(url_hash(&completed))
    };
    match value {
        Value::String(s) => key(s.as_str()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(key)
                .collect(),
        ),
        _ => Value::Null,
    }
}
