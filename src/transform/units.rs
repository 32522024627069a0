//! Unit conversion rules
//!
//! A conversion reads a numeric source column, applies `value * scale + offset`
//! and writes the rounded result to a target column. The target must differ
//! from the source, so re-running a rule recomputes the same value from the
//! same input instead of converting twice.

use super::{BatchRule, ErrorPolicy, TransformReport};
use crate::error::{ConversionError, EtlError, Result};
use crate::record::{RecordBatch, Value};
use serde::{Deserialize, Serialize};

/// `value * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    pub scale: f64,
    pub offset: f64,
}

impl Linear {
    pub const fn factor(scale: f64) -> Self {
        Self { scale, offset: 0.0 }
    }

    pub fn apply(self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    fn inverse(self) -> Self {
        Self {
            scale: 1.0 / self.scale,
            offset: -self.offset / self.scale,
        }
    }

    /// `next` applied after `self`
    fn then(self, next: Self) -> Self {
        Self {
            scale: self.scale * next.scale,
            offset: self.offset * next.scale + next.offset,
        }
    }
}

/// Conversions with conventional factors, checked before [`TO_BASE`]
const UNIT_TABLE: &[(&str, &str, Linear)] = &[
    ("km", "mi", Linear::factor(0.621371)),
    ("mi", "km", Linear::factor(1.609344)),
    ("in", "m", Linear::factor(0.0254)),
    ("in", "cm", Linear::factor(2.54)),
    ("ft", "m", Linear::factor(0.3048)),
    ("lb", "kg", Linear::factor(0.453592)),
    ("kg", "lb", Linear::factor(2.20462)),
    ("c", "f", Linear { scale: 1.8, offset: 32.0 }),
];

/// Every known unit as a transform into its dimension's base unit
const TO_BASE: &[(&str, &str, Linear)] = &[
    ("mm", "length", Linear::factor(0.001)),
    ("cm", "length", Linear::factor(0.01)),
    ("m", "length", Linear::factor(1.0)),
    ("km", "length", Linear::factor(1000.0)),
    ("in", "length", Linear::factor(0.0254)),
    ("ft", "length", Linear::factor(0.3048)),
    ("yd", "length", Linear::factor(0.9144)),
    ("mi", "length", Linear::factor(1609.344)),
    ("g", "mass", Linear::factor(0.001)),
    ("kg", "mass", Linear::factor(1.0)),
    ("lb", "mass", Linear::factor(0.45359237)),
    ("oz", "mass", Linear::factor(0.028349523125)),
    ("k", "temperature", Linear::factor(1.0)),
    ("c", "temperature", Linear { scale: 1.0, offset: 273.15 }),
    ("f", "temperature", Linear { scale: 5.0 / 9.0, offset: 273.15 - 160.0 / 9.0 }),
];

fn to_base(unit: &str) -> Option<(&'static str, Linear)> {
    TO_BASE
        .iter()
        .find(|(name, _, _)| *name == unit)
        .map(|(_, dimension, linear)| (*dimension, *linear))
}

/// Look up the transform from `from` to `to`
///
/// Unit names are case-insensitive. Listed pairs use their conventional
/// factor in either direction; any other pair of units of the same
/// dimension goes through the base unit. Returns `None` for unknown units
/// and mismatched dimensions.
pub fn lookup(from: &str, to: &str) -> Option<Linear> {
    let from = from.trim().to_ascii_lowercase();
    let to = to.trim().to_ascii_lowercase();
    if from == to {
        return to_base(&from).map(|_| Linear::factor(1.0));
    }

    let forward = UNIT_TABLE
        .iter()
        .find(|(a, b, _)| *a == from && *b == to)
        .map(|(_, _, linear)| *linear);
    let reverse = || {
        UNIT_TABLE
            .iter()
            .find(|(a, b, _)| *a == to && *b == from)
            .map(|(_, _, linear)| linear.inverse())
    };
    let via_base = || {
        let (from_dim, into_base) = to_base(&from)?;
        let (to_dim, out_of_base) = to_base(&to)?;
        (from_dim == to_dim).then(|| into_base.then(out_of_base.inverse()))
    };

    forward.or_else(reverse).or_else(via_base)
}

/// Round half away from zero to `precision` decimal places
pub fn round_to(value: f64, precision: u32) -> f64 {
    let p = 10f64.powi(precision as i32);
    (value * p).round() / p
}

fn default_keep_source() -> bool {
    true
}

/// Declarative conversion of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub column: String,
    pub from: String,
    pub to: String,
    /// Target column; defaults to `{column}_{to}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Explicit scale, overriding the unit table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    /// Decimal places to round to; no rounding when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Keep the source column next to the converted one
    #[serde(default = "default_keep_source")]
    pub keep_source: bool,
}

impl UnitConversion {
    pub fn new(column: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            from: from.into(),
            to: to.into(),
            target: None,
            factor: None,
            offset: None,
            precision: None,
            keep_source: true,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = Some(factor);
        self
    }

    pub fn dropping_source(mut self) -> Self {
        self.keep_source = false;
        self
    }

    pub fn target_column(&self) -> String {
        self.target
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.column, self.to.to_ascii_lowercase()))
    }

    /// Resolve the numeric transform, checking the rule is usable
    pub fn linear(&self) -> Result<Linear> {
        if self.target_column() == self.column {
            return Err(EtlError::Config(format!(
                "conversion of '{}' must write to a different column",
                self.column
            )));
        }
        match (self.factor, lookup(&self.from, &self.to)) {
            (Some(scale), _) => Ok(Linear {
                scale,
                offset: self.offset.unwrap_or(0.0),
            }),
            (None, Some(linear)) => Ok(linear),
            (None, None) => Err(EtlError::Config(format!(
                "no conversion from '{}' to '{}' for column '{}'; set a factor",
                self.from, self.to, self.column
            ))),
        }
    }

    /// Convert one numeric value, rounding to the configured precision
    pub fn apply(&self, linear: Linear, value: f64) -> f64 {
        let converted = linear.apply(value);
        match self.precision {
            Some(p) => round_to(converted, p),
            None => converted,
        }
    }
}

/// Applies every configured conversion in order
pub struct UnitConverter {
    rules: Vec<(UnitConversion, Linear)>,
    policy: ErrorPolicy,
}

impl UnitConverter {
    pub fn new(conversions: Vec<UnitConversion>, policy: ErrorPolicy) -> Result<Self> {
        let rules = conversions
            .into_iter()
            .map(|c| c.linear().map(|linear| (c, linear)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules, policy })
    }
}

impl BatchRule for UnitConverter {
    fn name(&self) -> &'static str {
        "unit_conversion"
    }

    fn apply(&self, mut batch: RecordBatch, report: &mut TransformReport) -> RecordBatch {
        for (rule, linear) in &self.rules {
            if !batch.has_column(&rule.column) {
                continue;
            }
            let target = rule.target_column();
            batch.add_column(target.clone());

            let mut failed = Vec::new();
            for (index, row) in batch.rows_mut().iter_mut().enumerate() {
                let value = row.value_or_null(&rule.column);
                let converted = match &value {
                    Value::Null => Value::Null,
                    other => match other.as_f64() {
                        Some(number) => Value::Float(rule.apply(*linear, number)),
                        None => {
                            failed.push(ConversionError {
                                row: index,
                                column: rule.column.clone(),
                                value: other.to_string(),
                                reason: format!("cannot convert {} to {}", rule.from, rule.to),
                            });
                            Value::Null
                        }
                    },
                };
                row.insert(target.clone(), converted);
            }

            report.apply_failures(&mut batch, failed, self.policy);

            if !rule.keep_source {
                batch.drop_column(&rule.column);
            }
        }
        batch
    }
}
