//! Delimited text sources

use crate::error::{EtlError, Result};
use crate::record::{RecordBatch, Row, Value};
use std::collections::BTreeSet;
use std::path::Path;

/// Read delimited text with a mandatory header row
///
/// Cells are kept as raw text; typing happens in the transform stage. Blank
/// lines are ignored and a record with the wrong number of fields fails the
/// whole source. A repeated header name gets a numeric suffix (`name_2`)
/// so no column is lost.
pub fn read_delimited(path: &Path, bytes: &[u8], delimiter: u8) -> Result<RecordBatch> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(bytes);

    let headers = unique_headers(
        path,
        reader
            .headers()
            .map_err(|e| EtlError::source_read(path, e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect(),
    );

    let mut batch = RecordBatch::with_columns(headers.clone());
    for record in reader.records() {
        let record = record.map_err(|e| EtlError::source_read(path, e))?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(header, field)| (header.clone(), Value::text(field)))
            .collect::<Row>();
        batch.push(row);
    }

    Ok(batch)
}

fn unique_headers(path: &Path, headers: Vec<String>) -> Vec<String> {
    let mut taken: BTreeSet<String> = headers.iter().cloned().collect();
    let mut seen = BTreeSet::new();

    headers
        .into_iter()
        .map(|header| {
            if seen.insert(header.clone()) {
                return header;
            }
            let renamed = (2..)
                .map(|n| format!("{}_{}", header, n))
                .find(|candidate| !taken.contains(candidate))
                .unwrap_or_default();
            log::warn!(
                "Duplicate column '{}' in {} renamed to '{}'",
                header,
                path.display(),
                renamed
            );
            taken.insert(renamed.clone());
            renamed
        })
        .collect()
}
