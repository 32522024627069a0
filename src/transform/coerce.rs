//! Type inference and coercion rules

use super::{BatchRule, ErrorPolicy, TransformReport};
use crate::error::ConversionError;
use crate::record::{RecordBatch, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Boolean => write!(f, "boolean"),
        }
    }
}

impl ColumnType {
    /// Convert a cell to this type
    ///
    /// Null stays null. Floats only become integers when they have no
    /// fractional part.
    pub fn coerce(self, value: &Value) -> Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ColumnType::Text, Value::Text(_)) => Ok(value.clone()),
            (ColumnType::Text, other) => Ok(Value::Text(other.to_string())),

            (ColumnType::Integer, Value::Integer(_)) => Ok(value.clone()),
            (ColumnType::Integer, Value::Float(f)) => float_to_int(*f),
            (ColumnType::Integer, Value::Text(s)) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(i) => Ok(Value::Integer(i)),
                    Err(_) => match s.parse::<f64>() {
                        Ok(f) => float_to_int(f),
                        Err(_) => Err("not an integer".to_string()),
                    },
                }
            }
            (ColumnType::Integer, Value::Bool(_)) => Err("boolean is not an integer".to_string()),

            (ColumnType::Float, Value::Float(_)) => Ok(value.clone()),
            (ColumnType::Float, Value::Integer(i)) => Ok(Value::Float(*i as f64)),
            (ColumnType::Float, Value::Text(_)) => value
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| "not a number".to_string()),
            (ColumnType::Float, Value::Bool(_)) => Err("boolean is not a number".to_string()),

            (ColumnType::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (ColumnType::Boolean, Value::Integer(0)) => Ok(Value::Bool(false)),
            (ColumnType::Boolean, Value::Integer(1)) => Ok(Value::Bool(true)),
            (ColumnType::Boolean, Value::Text(s)) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
                    "false" | "no" | "n" | "0" => Ok(Value::Bool(false)),
                    _ => Err("not a boolean".to_string()),
                }
            }
            (ColumnType::Boolean, _) => Err("not a boolean".to_string()),
        }
    }
}

fn float_to_int(f: f64) -> Result<Value, String> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Ok(Value::Integer(f as i64))
    } else {
        Err("has a fractional part".to_string())
    }
}

/// Coerces configured columns, reporting cells that do not fit
pub struct TypeCoercer {
    types: BTreeMap<String, ColumnType>,
    policy: ErrorPolicy,
}

impl TypeCoercer {
    pub fn new(types: BTreeMap<String, ColumnType>, policy: ErrorPolicy) -> Self {
        Self { types, policy }
    }
}

impl BatchRule for TypeCoercer {
    fn name(&self) -> &'static str {
        "coerce_types"
    }

    fn apply(&self, mut batch: RecordBatch, report: &mut TransformReport) -> RecordBatch {
        let mut failed = Vec::new();
        for (index, row) in batch.rows_mut().iter_mut().enumerate() {
            for (column, ty) in &self.types {
                let Some(value) = row.get_mut(column) else {
                    continue;
                };
                match ty.coerce(value) {
                    Ok(coerced) => *value = coerced,
                    Err(reason) => {
                        failed.push(ConversionError {
                            row: index,
                            column: column.clone(),
                            value: value.to_string(),
                            reason: format!("expected {}: {}", ty, reason),
                        });
                        *value = Value::Null;
                    }
                }
            }
        }
        report.apply_failures(&mut batch, failed, self.policy);
        batch
    }
}

/// Types text cells that look like numbers or booleans
///
/// Columns with an explicit type are left to [`TypeCoercer`].
pub struct TypeInference {
    skip: BTreeSet<String>,
}

impl TypeInference {
    pub fn new(skip: BTreeSet<String>) -> Self {
        Self { skip }
    }
}

impl BatchRule for TypeInference {
    fn name(&self) -> &'static str {
        "infer_types"
    }

    fn apply(&self, mut batch: RecordBatch, _report: &mut TransformReport) -> RecordBatch {
        for row in batch.rows_mut() {
            let columns: Vec<String> = row
                .columns()
                .filter(|c| !self.skip.contains(*c))
                .cloned()
                .collect();
            for column in columns {
                if let Some(value) = row.get_mut(&column)
                    && let Value::Text(text) = value
                {
                    *value = Value::infer(text);
                }
            }
        }
        batch
    }
}
