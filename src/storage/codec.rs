//! Serialisations used for the blob sink
//!
//! Both formats read back into an equal batch when the batch is uniform:
//! - CSV with a header row. Floats keep their decimal point and empty cells
//!   decode as null. A column whose cells would not read back as the same
//!   values carries a tag in its header: `zip:text` holds only text, and
//!   `code:json` holds one JSON literal per cell.
//! - NDJSON, one object per row with keys in column order.

use crate::record::{RecordBatch, Row, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobFormat {
    #[default]
    Csv,
    Ndjson,
}

impl BlobFormat {
    /// Format implied by an object path's extension
    pub fn for_path(path: &str) -> Option<Self> {
        let (_, extension) = path.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "csv" => Some(BlobFormat::Csv),
            "ndjson" | "jsonl" => Some(BlobFormat::Ndjson),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            BlobFormat::Csv => "text/csv",
            BlobFormat::Ndjson => "application/x-ndjson",
        }
    }
}

impl fmt::Display for BlobFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobFormat::Csv => write!(f, "csv"),
            BlobFormat::Ndjson => write!(f, "ndjson"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error on line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
    #[error("line {0} is not a JSON object")]
    NotAnObject(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn encode_batch(batch: &RecordBatch, format: BlobFormat) -> Result<Vec<u8>, CodecError> {
    match format {
        BlobFormat::Csv => encode_csv(batch),
        BlobFormat::Ndjson => encode_ndjson(batch),
    }
}

pub fn decode_batch(bytes: &[u8], format: BlobFormat) -> Result<RecordBatch, CodecError> {
    match format {
        BlobFormat::Csv => decode_csv(bytes),
        BlobFormat::Ndjson => decode_ndjson(bytes),
    }
}

/// How a CSV column's cells are written and read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsvColumn {
    /// Plain rendering, read back with [`Value::infer`]
    Inferred,
    /// Non-empty text only; empty cells are null
    Text,
    /// One JSON literal per cell
    Json,
}

impl CsvColumn {
    fn tag(self) -> &'static str {
        match self {
            CsvColumn::Inferred => "auto",
            CsvColumn::Text => "text",
            CsvColumn::Json => "json",
        }
    }

    fn for_cells<'a>(mut cells: impl Iterator<Item = &'a Value> + Clone) -> Self {
        if cells.clone().all(|v| Value::infer(&v.to_string()) == *v) {
            CsvColumn::Inferred
        } else if cells.all(|v| match v {
            Value::Null => true,
            Value::Text(s) => !s.is_empty(),
            _ => false,
        }) {
            CsvColumn::Text
        } else {
            CsvColumn::Json
        }
    }

    /// Split `name:tag` into the column name and its encoding
    fn parse_header(header: &str) -> (String, Self) {
        match header.rsplit_once(':') {
            Some((name, "auto")) => (name.to_string(), CsvColumn::Inferred),
            Some((name, "text")) => (name.to_string(), CsvColumn::Text),
            Some((name, "json")) => (name.to_string(), CsvColumn::Json),
            _ => (header.to_string(), CsvColumn::Inferred),
        }
    }

    fn header(self, name: &str) -> String {
        if self == CsvColumn::Inferred && !has_tag(name) {
            name.to_string()
        } else {
            format!("{}:{}", name, self.tag())
        }
    }

    fn encode(self, value: &Value) -> String {
        match (self, value) {
            (_, Value::Null) => String::new(),
            (CsvColumn::Json, other) => other.to_json().to_string(),
            (_, other) => other.to_string(),
        }
    }

    fn decode(self, field: &str, line: usize) -> Result<Value, CodecError> {
        if field.is_empty() {
            return Ok(Value::Null);
        }
        match self {
            CsvColumn::Inferred => Ok(Value::infer(field)),
            CsvColumn::Text => Ok(Value::text(field)),
            CsvColumn::Json => serde_json::from_str(field)
                .map(|v| Value::from_json(&v))
                .map_err(|source| CodecError::Json { line, source }),
        }
    }
}

/// True when `name` already ends in something that reads as a tag
fn has_tag(name: &str) -> bool {
    matches!(name.rsplit_once(':'), Some((_, "auto" | "text" | "json")))
}

fn encode_csv(batch: &RecordBatch) -> Result<Vec<u8>, CodecError> {
    let kinds: Vec<CsvColumn> = batch
        .columns()
        .iter()
        .map(|c| {
            CsvColumn::for_cells(
                batch
                    .rows()
                    .iter()
                    .map(|r| r.get(c).unwrap_or(&Value::Null)),
            )
        })
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(
        batch
            .columns()
            .iter()
            .zip(&kinds)
            .map(|(c, kind)| kind.header(c)),
    )?;
    for row in batch.rows() {
        writer.write_record(
            batch
                .columns()
                .iter()
                .zip(&kinds)
                .map(|(c, kind)| kind.encode(row.get(c).unwrap_or(&Value::Null))),
        )?;
    }
    writer
        .into_inner()
        .map_err(|e| CodecError::Io(e.into_error()))
}

fn decode_csv(bytes: &[u8]) -> Result<RecordBatch, CodecError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let headers: Vec<(String, CsvColumn)> = reader
        .headers()?
        .iter()
        .map(CsvColumn::parse_header)
        .collect();

    let columns = headers.iter().map(|(h, _)| h.clone()).collect();
    let mut batch = RecordBatch::with_columns(columns);
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|((h, kind), field)| Ok((h.clone(), kind.decode(field, index + 2)?)))
            .collect::<Result<Row, CodecError>>()?;
        batch.push(row);
    }
    Ok(batch)
}

fn encode_ndjson(batch: &RecordBatch) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    for (index, row) in batch.rows().iter().enumerate() {
        let object: serde_json::Map<String, serde_json::Value> = batch
            .columns()
            .iter()
            .filter_map(|c| row.get(c).map(|v| (c.clone(), v.to_json())))
            .collect();
        let line = serde_json::to_string(&object).map_err(|source| CodecError::Json {
            line: index + 1,
            source,
        })?;
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

fn decode_ndjson(bytes: &[u8]) -> Result<RecordBatch, CodecError> {
    let content = String::from_utf8_lossy(bytes);
    let mut batch = RecordBatch::new();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|source| CodecError::Json {
                line: index + 1,
                source,
            })?;
        let object = value.as_object().ok_or(CodecError::NotAnObject(index + 1))?;

        for key in object.keys() {
            batch.add_column(key.clone());
        }
        batch.push(
            object
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
        );
    }
    Ok(batch)
}
