//! Core ETL (Extract, Transform, Load) abstractions
//!
//! This module provides the stage traits, the run model and the
//! [`Pipeline`] that sequences the stages for a single run.

mod extract;
mod load;
mod pipeline;
mod run;
mod transform;

pub use extract::Extractor;
pub use load::Loader;
pub use pipeline::Pipeline;
pub use run::{PipelineRun, RunStatus, new_run_id, scoped_path};
pub use transform::Transformer;
