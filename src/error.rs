//! Error taxonomy shared by the pipeline stages

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which sink a write error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Blob,
    Relational,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Blob => write!(f, "blob"),
            SinkKind::Relational => write!(f, "relational"),
        }
    }
}

/// A single row that failed a type coercion or unit conversion
#[derive(Debug, Clone, PartialEq, Error)]
#[error("row {row}: column '{column}' value {value:?}: {reason}")]
pub struct ConversionError {
    /// Zero-based row index within the batch being transformed
    pub row: usize,
    pub column: String,
    pub value: String,
    pub reason: String,
}

/// A row refused by the relational sink
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub row: usize,
    pub reason: String,
}

/// Outcome of a relational load where some rows were rejected
#[derive(Debug, Clone, PartialEq)]
pub struct PartialLoad {
    pub table: String,
    pub inserted: usize,
    pub rejected: usize,
    /// The first few rejected rows
    pub samples: Vec<RejectedRow>,
}

impl fmt::Display for PartialLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "table '{}': {} row(s) inserted, {} rejected",
            self.table, self.inserted, self.rejected
        )?;
        if let Some(first) = self.samples.first() {
            write!(f, " (first: row {}: {})", first.row, first.reason)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("unsupported format '{tag}' for source {}", .path.display())]
    UnsupportedFormat { tag: String, path: PathBuf },

    #[error("failed to read source {}: {reason}", .path.display())]
    SourceRead { path: PathBuf, reason: String },

    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("{sink} sink write to '{target}' failed: {reason}")]
    SinkWrite {
        sink: SinkKind,
        target: String,
        reason: String,
    },

    #[error("partial load: {0}")]
    PartialLoad(PartialLoad),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid run transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl EtlError {
    pub fn source_read(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::SourceRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn blob_write(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::SinkWrite {
            sink: SinkKind::Blob,
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn table_write(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::SinkWrite {
            sink: SinkKind::Relational,
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Short stable name used in run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::UnsupportedFormat { .. } => "UnsupportedFormatError",
            EtlError::SourceRead { .. } => "SourceReadError",
            EtlError::Conversion(_) => "ConversionError",
            EtlError::SinkWrite { .. } => "SinkWriteError",
            EtlError::PartialLoad(_) => "PartialLoadError",
            EtlError::Config(_) => "ConfigError",
            EtlError::InvalidTransition { .. } => "InvalidTransitionError",
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
