//! Cleaning and unit-conversion rules
//!
//! A [`RuleSet`] applies an ordered list of [`BatchRule`]s to a batch:
//! header normalisation, renames, null handling, required columns, type
//! coercion, unit conversion and finally schema alignment. Every rule is a
//! pure function of its input, and the set as a whole is idempotent: running
//! it over its own output leaves the batch unchanged.

mod coerce;
mod headers;
mod nulls;
mod units;

pub use coerce::{ColumnType, TypeCoercer, TypeInference};
pub use headers::{ColumnRenamer, HeaderNormalizer, normalize_header};
pub use nulls::{NullCleaner, RequiredColumns};
pub use units::{Linear, UnitConversion, UnitConverter, lookup, round_to};

use crate::error::{ConversionError, Result};
use crate::etl::Transformer;
use crate::record::{RecordBatch, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How many conversion failures are kept verbatim in a report
pub const MAX_SAMPLES: usize = 5;

/// What happens to a row when one of its cells fails to convert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Keep the row with the offending cell set to null
    #[default]
    Null,
    /// Remove the row from the batch
    Drop,
}

/// Counts of everything the rules changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    pub rows_in: usize,
    pub rows_out: usize,
    /// Rows removed because a conversion failed under [`ErrorPolicy::Drop`]
    pub dropped: usize,
    /// Rows removed because a required column was null
    pub missing_required: usize,
    /// Rows kept with at least one cell nulled by a failed conversion
    pub nulled: usize,
    /// Individual cells that failed to convert
    pub conversion_failures: usize,
    /// The first few failures, in the order they happened
    pub samples: Vec<ConversionError>,
    /// Batch indices behind `nulled`; rows only leave the batch before the
    /// converting rules run under [`ErrorPolicy::Null`], so indices are stable
    nulled_rows: BTreeSet<usize>,
}

impl TransformReport {
    /// Count `failed` cells and apply `policy` to the rows they belong to
    ///
    /// Cells are expected to be nulled already by the rule; under
    /// [`ErrorPolicy::Drop`] the affected rows are removed as well.
    pub fn apply_failures(
        &mut self,
        batch: &mut RecordBatch,
        failed: Vec<ConversionError>,
        policy: ErrorPolicy,
    ) {
        if failed.is_empty() {
            return;
        }

        let rows: BTreeSet<usize> = failed.iter().map(|f| f.row).collect();
        self.conversion_failures += failed.len();
        let room = MAX_SAMPLES.saturating_sub(self.samples.len());
        self.samples.extend(failed.into_iter().take(room));

        match policy {
            ErrorPolicy::Null => {
                self.nulled_rows.extend(rows);
                self.nulled = self.nulled_rows.len();
            }
            ErrorPolicy::Drop => {
                self.dropped += rows.len();
                let mut index = 0;
                batch.rows_mut().retain(|_| {
                    let keep = !rows.contains(&index);
                    index += 1;
                    keep
                });
            }
        }
    }

    /// True when nothing was dropped, nulled or failed
    pub fn is_clean(&self) -> bool {
        self.dropped == 0
            && self.missing_required == 0
            && self.nulled == 0
            && self.conversion_failures == 0
    }
}

/// One step of the cleaning pipeline
pub trait BatchRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply the rule, recording anything it drops or nulls in `report`
    fn apply(&self, batch: RecordBatch, report: &mut TransformReport) -> RecordBatch;
}

/// Fills every missing cell with null so all rows share the batch's columns
pub struct SchemaAligner;

impl BatchRule for SchemaAligner {
    fn name(&self) -> &'static str {
        "align_schema"
    }

    fn apply(&self, mut batch: RecordBatch, _report: &mut TransformReport) -> RecordBatch {
        let columns = batch.columns().to_vec();
        for row in batch.rows_mut() {
            for column in &columns {
                if !row.contains(column) {
                    row.insert(column.clone(), Value::Null);
                }
            }
        }
        batch
    }
}

fn default_true() -> bool {
    true
}

fn default_null_tokens() -> Vec<String> {
    ["", "NA", "N/A", "null", "NULL", "NaN"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Declarative rule configuration, as read from the `transform` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSettings {
    /// Lowercase headers and collapse anything non-alphanumeric to `_`
    #[serde(default)]
    pub normalize_headers: bool,
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
    /// Trim surrounding whitespace from text cells
    #[serde(default = "default_true")]
    pub trim: bool,
    /// Text cells equal to one of these become null
    #[serde(default = "default_null_tokens")]
    pub null_tokens: Vec<String>,
    /// Rows with a null in any of these columns are removed
    #[serde(default)]
    pub required: Vec<String>,
    /// Type text cells of columns not listed in `types`
    #[serde(default = "default_true")]
    pub infer_types: bool,
    #[serde(default)]
    pub types: BTreeMap<String, ColumnType>,
    #[serde(default)]
    pub conversions: Vec<UnitConversion>,
    #[serde(default)]
    pub on_conversion_error: ErrorPolicy,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            normalize_headers: false,
            rename: BTreeMap::new(),
            trim: true,
            null_tokens: default_null_tokens(),
            required: Vec::new(),
            infer_types: true,
            types: BTreeMap::new(),
            conversions: Vec::new(),
            on_conversion_error: ErrorPolicy::default(),
        }
    }
}

/// Output of a [`RuleSet`]
#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned {
    pub batch: RecordBatch,
    pub report: TransformReport,
}

/// An ordered list of rules applied as one transformation
///
/// # Example
/// ```
/// use etl_pipeline::etl::Transformer;
/// use etl_pipeline::record::{RecordBatch, Row, Value};
/// use etl_pipeline::transform::{RuleSet, TransformSettings, UnitConversion};
///
/// let settings = TransformSettings {
///     conversions: vec![UnitConversion::new("distance", "km", "mi").with_precision(3)],
///     ..Default::default()
/// };
/// let rules = RuleSet::from_settings(&settings).unwrap();
///
/// let row: Row = [("distance", Value::text("10"))].into_iter().collect();
/// let cleaned = rules.transform(RecordBatch::from_rows(vec![row])).unwrap();
///
/// assert_eq!(cleaned.batch.rows()[0].get("distance_mi"), Some(&Value::Float(6.214)));
/// ```
pub struct RuleSet {
    rules: Vec<Box<dyn BatchRule>>,
}

impl RuleSet {
    pub fn new(rules: Vec<Box<dyn BatchRule>>) -> Self {
        Self { rules }
    }

    /// Build the standard rule order from settings
    ///
    /// # Errors
    /// Returns [`crate::error::EtlError::Config`] for conversions that write
    /// over their own source or use units without a known transform.
    pub fn from_settings(settings: &TransformSettings) -> Result<Self> {
        let policy = settings.on_conversion_error;

        // With normalised headers every column name the other rules see is
        // normalised too, so the rule targets must be.
        let name = |column: &str| {
            if settings.normalize_headers {
                normalize_header(column)
            } else {
                column.to_string()
            }
        };

        let mut rules: Vec<Box<dyn BatchRule>> = Vec::new();
        if settings.normalize_headers {
            rules.push(Box::new(HeaderNormalizer::new()));
        }
        if !settings.rename.is_empty() {
            rules.push(Box::new(ColumnRenamer::new(
                settings
                    .rename
                    .iter()
                    .map(|(from, to)| (name(from), name(to)))
                    .collect(),
            )));
        }
        rules.push(Box::new(NullCleaner::new(
            settings.trim,
            settings.null_tokens.clone(),
        )));
        if !settings.required.is_empty() {
            rules.push(Box::new(RequiredColumns::new(
                settings.required.iter().map(|c| name(c)).collect(),
            )));
        }
        let types: BTreeMap<String, ColumnType> = settings
            .types
            .iter()
            .map(|(column, ty)| (name(column), *ty))
            .collect();
        if settings.infer_types {
            rules.push(Box::new(TypeInference::new(types.keys().cloned().collect())));
        }
        if !types.is_empty() {
            rules.push(Box::new(TypeCoercer::new(types, policy)));
        }
        if !settings.conversions.is_empty() {
            let conversions = settings
                .conversions
                .iter()
                .map(|c| {
                    let mut c = c.clone();
                    c.column = name(&c.column);
                    c.target = Some(name(&c.target_column()));
                    c
                })
                .collect();
            rules.push(Box::new(UnitConverter::new(conversions, policy)?));
        }
        rules.push(Box::new(SchemaAligner));

        Ok(Self { rules })
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }
}

impl Transformer for RuleSet {
    type Input = RecordBatch;
    type Output = Cleaned;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        let mut report = TransformReport {
            rows_in: input.len(),
            ..Default::default()
        };

        let mut batch = input;
        for rule in &self.rules {
            let before = batch.len();
            batch = rule.apply(batch, &mut report);
            if batch.len() != before {
                log::debug!(
                    "Rule {} removed {} row(s)",
                    rule.name(),
                    before - batch.len()
                );
            }
        }

        report.rows_out = batch.len();
        Ok(Cleaned { batch, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Row;

    fn distances() -> RecordBatch {
        RecordBatch::from_parts(
            vec!["id".into(), "Distance KM".into(), "note".into()],
            vec![
                [("id", "1"), ("Distance KM", "10"), ("note", " ok ")],
                [("id", "2"), ("Distance KM", "-5"), ("note", "NA")],
                [("id", "3"), ("Distance KM", "0.5"), ("note", "")],
            ]
            .into_iter()
            .map(|cells| {
                cells
                    .into_iter()
                    .map(|(k, v)| (k, Value::text(v)))
                    .collect::<Row>()
            })
            .collect(),
        )
    }

    fn km_to_mi() -> TransformSettings {
        TransformSettings {
            normalize_headers: true,
            conversions: vec![UnitConversion::new("distance_km", "km", "mi").with_precision(4)],
            ..Default::default()
        }
    }

    #[test]
    fn test_negative_distance_is_converted() {
        let rules = RuleSet::from_settings(&km_to_mi()).unwrap();
        let cleaned = rules.transform(distances()).unwrap();
        let rows = cleaned.batch.rows();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].get("distance_km"), Some(&Value::Integer(-5)));
        assert_eq!(rows[1].get("distance_km_mi"), Some(&Value::Float(-3.1069)));
        assert_eq!(rows[0].get("distance_km_mi"), Some(&Value::Float(6.2137)));
        assert_eq!(rows[2].get("distance_km_mi"), Some(&Value::Float(0.3107)));
        assert!(cleaned.report.is_clean());
    }

    #[test]
    fn test_nulls_and_trimming() {
        let rules = RuleSet::from_settings(&km_to_mi()).unwrap();
        let cleaned = rules.transform(distances()).unwrap();
        let rows = cleaned.batch.rows();

        assert_eq!(rows[0].get("note"), Some(&Value::text("ok")));
        assert_eq!(rows[1].get("note"), Some(&Value::Null));
        assert_eq!(rows[2].get("note"), Some(&Value::Null));
    }

    #[test]
    fn test_rule_set_is_idempotent() {
        let mut settings = km_to_mi();
        settings.rename.insert("Note".into(), "Comment".into());
        settings.required.push("id".into());
        settings.types.insert("ID".into(), ColumnType::Integer);
        let rules = RuleSet::from_settings(&settings).unwrap();

        let once = rules.transform(distances()).unwrap();
        let twice = rules.transform(once.batch.clone()).unwrap();

        assert_eq!(once.batch, twice.batch);
        assert!(once.batch.has_column("comment"));
        assert!(once.batch.is_uniform());
    }

    #[test]
    fn test_default_target_with_symbol_unit_is_idempotent() {
        let settings = TransformSettings {
            normalize_headers: true,
            conversions: vec![
                UnitConversion::new("speed", "km/h", "m/s").with_factor(0.277778),
            ],
            ..Default::default()
        };
        let batch = RecordBatch::from_rows(vec![
            [("Speed", Value::text("36"))].into_iter().collect::<Row>(),
        ]);
        let rules = RuleSet::from_settings(&settings).unwrap();

        let once = rules.transform(batch).unwrap();
        let twice = rules.transform(once.batch.clone()).unwrap();

        assert_eq!(once.batch.columns(), ["speed", "speed_m_s"]);
        assert_eq!(once.batch, twice.batch);
    }

    #[test]
    fn test_dropping_source_is_idempotent() {
        let settings = TransformSettings {
            normalize_headers: true,
            conversions: vec![
                UnitConversion::new("Distance KM", "km", "mi")
                    .with_target("distance_mi")
                    .with_precision(4)
                    .dropping_source(),
            ],
            ..Default::default()
        };
        let rules = RuleSet::from_settings(&settings).unwrap();

        let once = rules.transform(distances()).unwrap();
        let twice = rules.transform(once.batch.clone()).unwrap();

        assert!(!once.batch.has_column("distance_km"));
        assert_eq!(
            once.batch.rows()[1].get("distance_mi"),
            Some(&Value::Float(-3.1069))
        );
        assert!(once.batch.rows().iter().all(|r| !r.contains("distance_km")));
        assert_eq!(once.batch, twice.batch);
    }

    #[test]
    fn test_nulled_rows_are_counted_once() {
        let batch = RecordBatch::from_rows(vec![
            [("n", Value::text("x")), ("m", Value::text("y"))]
                .into_iter()
                .collect::<Row>(),
            [("n", Value::text("1")), ("m", Value::text("2"))]
                .into_iter()
                .collect::<Row>(),
        ]);
        let settings = TransformSettings {
            types: [("n".to_string(), ColumnType::Integer)].into_iter().collect(),
            conversions: vec![UnitConversion::new("m", "km", "mi")],
            ..Default::default()
        };
        let cleaned = RuleSet::from_settings(&settings)
            .unwrap()
            .transform(batch)
            .unwrap();

        assert_eq!(cleaned.report.conversion_failures, 2);
        assert_eq!(cleaned.report.nulled, 1);
        assert_eq!(cleaned.batch.len(), 2);
    }

    #[test]
    fn test_rows_are_aligned_to_the_column_union() {
        let batch = RecordBatch::from_rows(vec![
            [("a", Value::Integer(1))].into_iter().collect::<Row>(),
            [("b", Value::Integer(2))].into_iter().collect::<Row>(),
        ]);
        let rules = RuleSet::from_settings(&TransformSettings::default()).unwrap();
        let cleaned = rules.transform(batch).unwrap();

        assert!(cleaned.batch.is_uniform());
        assert_eq!(cleaned.batch.rows()[0].get("b"), Some(&Value::Null));
    }

    #[test]
    fn test_report_counts_drops() {
        let batch = RecordBatch::from_rows(
            ["1", "x", "", "4"]
                .into_iter()
                .map(|v| [("n", Value::text(v))].into_iter().collect::<Row>())
                .collect(),
        );
        let settings = TransformSettings {
            required: vec!["n".into()],
            types: [("n".to_string(), ColumnType::Integer)].into_iter().collect(),
            on_conversion_error: ErrorPolicy::Drop,
            ..Default::default()
        };
        let cleaned = RuleSet::from_settings(&settings)
            .unwrap()
            .transform(batch)
            .unwrap();
        let report = &cleaned.report;

        assert_eq!(report.rows_in, 4);
        assert_eq!(report.rows_out, 2);
        assert_eq!(report.missing_required, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.samples[0].value, "x");
        assert_eq!(
            report.rows_out + report.dropped + report.missing_required,
            report.rows_in
        );
    }

    #[test]
    fn test_invalid_conversion_is_rejected_up_front() {
        let settings = TransformSettings {
            conversions: vec![UnitConversion::new("d", "km", "furlong")],
            ..Default::default()
        };
        assert!(RuleSet::from_settings(&settings).is_err());
    }

    #[test]
    fn test_rule_order() {
        let rules = RuleSet::from_settings(&km_to_mi()).unwrap();
        assert_eq!(
            rules.rule_names(),
            vec![
                "normalize_headers",
                "clean_nulls",
                "infer_types",
                "unit_conversion",
                "align_schema"
            ]
        );
    }
}
