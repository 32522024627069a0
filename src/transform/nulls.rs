//! Null handling rules

use super::{BatchRule, TransformReport};
use crate::record::{RecordBatch, Value};

/// Trims text cells and turns null tokens into real nulls
pub struct NullCleaner {
    trim: bool,
    tokens: Vec<String>,
}

impl NullCleaner {
    pub fn new(trim: bool, tokens: Vec<String>) -> Self {
        Self { trim, tokens }
    }

    fn clean(&self, value: &mut Value) {
        let Value::Text(text) = value else {
            return;
        };
        if self.trim {
            let trimmed = text.trim();
            if trimmed.len() != text.len() {
                *text = trimmed.to_string();
            }
        }
        if self.tokens.iter().any(|token| token.as_str() == text.as_str()) {
            *value = Value::Null;
        }
    }
}

impl BatchRule for NullCleaner {
    fn name(&self) -> &'static str {
        "clean_nulls"
    }

    fn apply(&self, mut batch: RecordBatch, _report: &mut TransformReport) -> RecordBatch {
        for row in batch.rows_mut() {
            let columns: Vec<String> = row.columns().cloned().collect();
            for column in columns {
                if let Some(value) = row.get_mut(&column) {
                    self.clean(value);
                }
            }
        }
        batch
    }
}

/// Removes rows with a null or missing value in any required column
pub struct RequiredColumns {
    columns: Vec<String>,
}

impl RequiredColumns {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }
}

impl BatchRule for RequiredColumns {
    fn name(&self) -> &'static str {
        "required_columns"
    }

    fn apply(&self, mut batch: RecordBatch, report: &mut TransformReport) -> RecordBatch {
        let before = batch.len();
        batch.rows_mut().retain(|row| {
            self.columns
                .iter()
                .all(|column| row.get(column).is_some_and(|v| !v.is_null()))
        });
        report.missing_required += before - batch.len();
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Row;

    fn cleaner() -> NullCleaner {
        NullCleaner::new(true, vec!["".into(), "NA".into(), "null".into()])
    }

    #[test]
    fn test_tokens_become_null_after_trimming() {
        let batch = RecordBatch::from_rows(vec![
            [("a", Value::text("  NA ")), ("b", Value::text(" x "))]
                .into_iter()
                .collect::<Row>(),
            [("a", Value::text("   ")), ("b", Value::Integer(0))]
                .into_iter()
                .collect::<Row>(),
        ]);
        let out = cleaner().apply(batch, &mut TransformReport::default());
        let rows = out.rows();

        assert_eq!(rows[0].get("a"), Some(&Value::Null));
        assert_eq!(rows[0].get("b"), Some(&Value::text("x")));
        assert_eq!(rows[1].get("a"), Some(&Value::Null));
        assert_eq!(rows[1].get("b"), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_tokens_match_exactly_without_trim() {
        let batch = RecordBatch::from_rows(vec![
            [("a", Value::text(" NA"))].into_iter().collect::<Row>(),
        ]);
        let cleaner = NullCleaner::new(false, vec!["NA".into()]);
        let out = cleaner.apply(batch, &mut TransformReport::default());
        assert_eq!(out.rows()[0].get("a"), Some(&Value::text(" NA")));
    }

    #[test]
    fn test_required_drops_missing_and_null() {
        let batch = RecordBatch::from_rows(vec![
            [("id", Value::Integer(1))].into_iter().collect::<Row>(),
            [("id", Value::Null)].into_iter().collect::<Row>(),
            [("other", Value::Integer(3))].into_iter().collect::<Row>(),
        ]);
        let mut report = TransformReport::default();
        let out = RequiredColumns::new(vec!["id".into()]).apply(batch, &mut report);

        assert_eq!(out.len(), 1);
        assert_eq!(report.missing_required, 2);
    }
}
