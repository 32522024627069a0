//! Structured-record (JSON) sources

use crate::error::{EtlError, Result};
use crate::record::{RecordBatch, Row, Value};
use serde_json::Map;
use std::path::Path;

/// Read structured records
///
/// Accepts a single object (one row), an array of objects, or
/// newline-delimited objects. Nested objects are flattened into dotted
/// column names; arrays are kept as JSON text.
pub fn read_records(path: &Path, bytes: &[u8]) -> Result<RecordBatch> {
    let content = std::str::from_utf8(bytes).map_err(|e| EtlError::source_read(path, e))?;
    let mut batch = RecordBatch::new();

    if content.trim().is_empty() {
        return Ok(batch);
    }

    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(object)) => push_object(&mut batch, &object),
        Ok(serde_json::Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                let object = item.as_object().ok_or_else(|| {
                    EtlError::source_read(path, format!("array element {} is not an object", index))
                })?;
                push_object(&mut batch, object);
            }
        }
        Ok(other) => {
            return Err(EtlError::source_read(
                path,
                format!("expected an object or array, found {}", type_name(&other)),
            ));
        }
        // Not a single document; try one object per line
        Err(_) => {
            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
                    EtlError::source_read(path, format!("line {}: {}", index + 1, e))
                })?;
                let object = value.as_object().ok_or_else(|| {
                    EtlError::source_read(path, format!("line {} is not an object", index + 1))
                })?;
                push_object(&mut batch, object);
            }
        }
    }

    Ok(batch)
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn push_object(batch: &mut RecordBatch, object: &Map<String, serde_json::Value>) {
    let mut cells = Vec::new();
    flatten("", object, &mut cells);
    for (column, _) in &cells {
        batch.add_column(column.clone());
    }
    batch.push(cells.into_iter().collect::<Row>());
}

fn flatten(prefix: &str, object: &Map<String, serde_json::Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in object {
        let column = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            serde_json::Value::Object(inner) if !inner.is_empty() => flatten(&column, inner, out),
            other => out.push((column, Value::from_json(other))),
        }
    }
}
