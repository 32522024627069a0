//! Source readers for the three supported input formats
//!
//! Every reader normalises its input into a [`RecordBatch`], preserving the
//! order of rows in the source file:
//! - delimited text with a header row (`csv`)
//! - structured records: one object, an array of objects, or NDJSON (`json`)
//! - markup trees where each record is an element (`xml`)

mod delimited;
mod markup;
mod records;

pub use delimited::read_delimited;
pub use markup::read_markup;
pub use records::read_records;

use crate::error::{EtlError, Result};
use crate::etl::Extractor;
use crate::record::RecordBatch;
use crate::run_log::RunLog;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited,
    Records,
    Markup,
}

impl SourceFormat {
    /// Resolve a format tag; unknown tags are an [`EtlError::UnsupportedFormat`]
    pub fn parse(tag: &str, path: &Path) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "delimited" => Ok(SourceFormat::Delimited),
            "json" | "ndjson" | "jsonl" | "structured" => Ok(SourceFormat::Records),
            "xml" | "markup" => Ok(SourceFormat::Markup),
            _ => Err(EtlError::UnsupportedFormat {
                tag: tag.to_string(),
                path: path.to_path_buf(),
            }),
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Delimited => write!(f, "delimited"),
            SourceFormat::Records => write!(f, "structured-record"),
            SourceFormat::Markup => write!(f, "markup-tree"),
        }
    }
}

fn default_delimiter() -> char {
    ','
}

/// One input file as declared in the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub path: PathBuf,
    /// Format tag, resolved when the source is extracted
    pub format: String,
    /// Field delimiter for delimited sources; `tsv` defaults to a tab
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Element name that marks a record in markup sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_tag: Option<String>,
}

impl SourceSpec {
    pub fn new(path: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: format.into(),
            delimiter: default_delimiter(),
            record_tag: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_record_tag(mut self, tag: impl Into<String>) -> Self {
        self.record_tag = Some(tag.into());
        self
    }

    fn delimiter_byte(&self) -> Result<u8> {
        let delimiter = if self.format.eq_ignore_ascii_case("tsv") && self.delimiter == ',' {
            '\t'
        } else {
            self.delimiter
        };
        u8::try_from(delimiter).map_err(|_| {
            EtlError::Config(format!(
                "delimiter {:?} for {} must be a single-byte character",
                delimiter,
                self.path.display()
            ))
        })
    }
}

/// What to do when a single source cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePolicy {
    /// Abort extraction on the first unreadable source
    #[default]
    Fail,
    /// Log the failure and continue with the remaining sources
    Skip,
}

/// Parse already-loaded bytes according to `format`
pub fn parse_source(spec: &SourceSpec, format: SourceFormat, bytes: &[u8]) -> Result<RecordBatch> {
    match format {
        SourceFormat::Delimited => read_delimited(&spec.path, bytes, spec.delimiter_byte()?),
        SourceFormat::Records => read_records(&spec.path, bytes),
        SourceFormat::Markup => read_markup(&spec.path, bytes, spec.record_tag.as_deref()),
    }
}

/// Extractor over a list of local files
///
/// Produces one batch per source, in declaration order. Format tags are all
/// resolved before any file is read, so an unsupported tag fails the
/// extraction regardless of the [`SourcePolicy`].
pub struct SourceExtractor {
    sources: Vec<SourceSpec>,
    policy: SourcePolicy,
}

impl SourceExtractor {
    pub fn new(sources: Vec<SourceSpec>) -> Self {
        Self {
            sources,
            policy: SourcePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SourcePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    async fn extract_one(&self, spec: &SourceSpec, format: SourceFormat) -> Result<RecordBatch> {
        let bytes = tokio::fs::read(&spec.path)
            .await
            .map_err(|e| EtlError::source_read(&spec.path, e))?;
        parse_source(spec, format, &bytes)
    }
}

impl Extractor for SourceExtractor {
    type Item = RecordBatch;

    async fn extract(&self, log: &RunLog) -> Result<Vec<Self::Item>> {
        let formats = self
            .sources
            .iter()
            .map(|s| SourceFormat::parse(&s.format, &s.path))
            .collect::<Result<Vec<_>>>()?;

        let mut batches = Vec::with_capacity(self.sources.len());
        for (spec, format) in self.sources.iter().zip(formats) {
            match self.extract_one(spec, format).await {
                Ok(batch) => {
                    log.info(
                        "extract",
                        format!(
                            "Read {} row(s) from {} ({})",
                            batch.len(),
                            spec.path.display(),
                            format
                        ),
                    );
                    batches.push(batch);
                }
                Err(e) if self.policy == SourcePolicy::Skip => {
                    log.warn("extract", format!("Skipping source: {}", e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(batches)
    }
}
