//! Pipeline run model and its state machine

use crate::error::{EtlError, Result};
use crate::transform::TransformReport;
use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle of a single pipeline run
///
/// `Pending → Extracting → Transforming → Loading → Succeeded`, with
/// `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Extracting,
    Transforming,
    Loading,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Pending, Extracting)
            | (Extracting, Transforming)
            | (Transforming, Loading)
            | (Loading, Succeeded) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Stage label used in log entries
    pub fn stage(self) -> &'static str {
        match self {
            RunStatus::Pending => "pipeline",
            RunStatus::Extracting => "extract",
            RunStatus::Transforming => "transform",
            RunStatus::Loading => "load",
            RunStatus::Succeeded | RunStatus::Failed => "pipeline",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Pending => "pending",
            RunStatus::Extracting => "extracting",
            RunStatus::Transforming => "transforming",
            RunStatus::Loading => "loading",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Build a run identifier from a start timestamp
pub fn new_run_id(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

/// Substitute `{run_id}` in a destination path
pub fn scoped_path(template: &str, run_id: &str) -> String {
    template.replace("{run_id}", run_id)
}

/// A single execution of the pipeline
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    status: RunStatus,
    pub extracted_rows: usize,
    pub loaded_rows: usize,
    pub transform: Option<TransformReport>,
    pub error: Option<EtlError>,
}

impl PipelineRun {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            finished_at: None,
            status: RunStatus::Pending,
            extracted_rows: 0,
            loaded_rows: 0,
            transform: None,
            error: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn advance(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EtlError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record a fatal error and move to `Failed`
    ///
    /// A run that is already terminal keeps its status; the error is still kept.
    pub fn fail(&mut self, error: EtlError) {
        if !self.status.is_terminal() {
            self.status = RunStatus::Failed;
            self.finished_at = Some(Utc::now());
        }
        self.error = Some(error);
    }
}
