//! ETL Pipeline
//!
//! A batch tool that reads delimited, structured-record and markup files,
//! cleans and unit-converts them, and writes the result to blob storage and
//! a relational table.

pub mod cli;
pub mod config;
pub mod error;
pub mod etl;
pub mod loader;
pub mod record;
pub mod run_log;
pub mod sources;
pub mod storage;
pub mod transform;

// Re-exports for convenience
pub use config::PipelineConfig;
pub use error::{EtlError, Result};
pub use etl::{Extractor, Loader, Pipeline, PipelineRun, RunStatus, Transformer};
pub use loader::BatchLoader;
pub use record::{RecordBatch, Row, Value};
pub use run_log::RunLog;
pub use sources::{SourceExtractor, SourceSpec};
pub use storage::{BlobStore, TableSink};
pub use transform::{RuleSet, TransformSettings};
