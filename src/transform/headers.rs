//! Column name rules

use super::{BatchRule, TransformReport};
use crate::record::RecordBatch;
use regex::Regex;
use std::sync::LazyLock;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("header pattern is valid"));

/// Lowercase a header and collapse every run of other characters to `_`
///
/// ```
/// use etl_pipeline::transform::normalize_header;
///
/// assert_eq!(normalize_header(" Distance (KM) "), "distance_km");
/// assert_eq!(normalize_header("body.height"), "body_height");
/// ```
pub fn normalize_header(header: &str) -> String {
    let lower = header.trim().to_lowercase();
    NON_ALNUM
        .replace_all(&lower, "_")
        .trim_matches('_')
        .to_string()
}

pub struct HeaderNormalizer;

impl HeaderNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HeaderNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRule for HeaderNormalizer {
    fn name(&self) -> &'static str {
        "normalize_headers"
    }

    fn apply(&self, mut batch: RecordBatch, _report: &mut TransformReport) -> RecordBatch {
        for column in batch.columns().to_vec() {
            let normalized = normalize_header(&column);
            if !normalized.is_empty() && normalized != column {
                batch.rename_column(&column, &normalized);
            }
        }
        batch
    }
}

/// Renames columns; pairs whose source column is absent are skipped
pub struct ColumnRenamer {
    pairs: Vec<(String, String)>,
}

impl ColumnRenamer {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }
}

impl BatchRule for ColumnRenamer {
    fn name(&self) -> &'static str {
        "rename_columns"
    }

    fn apply(&self, mut batch: RecordBatch, _report: &mut TransformReport) -> RecordBatch {
        for (from, to) in &self.pairs {
            batch.rename_column(from, to);
        }
        batch
    }
}
