//! Pipeline orchestration for a single ETL run

use super::run::{PipelineRun, RunStatus};
use super::{Extractor, Loader, Transformer};
use crate::error::{EtlError, Result};
use crate::record::RecordBatch;
use crate::run_log::RunLog;
use crate::transform::{Cleaned, TransformReport};

/// ETL Pipeline that orchestrates Extract, Transform, and Load operations
///
/// Extracted batches are concatenated in source order, cleaned as one batch
/// and handed to the loader. The run moves through
/// `Pending → Extracting → Transforming → Loading → Succeeded`; any
/// stage-level error moves it to `Failed` and halts it.
///
/// # Type Parameters
/// - `E`: Extractor producing one batch per source
/// - `T`: Transformer cleaning the combined batch
/// - `L`: Loader writing the cleaned batch
///
/// # Example
/// ```no_run
/// use etl_pipeline::etl::Pipeline;
/// use etl_pipeline::loader::BatchLoader;
/// use etl_pipeline::run_log::RunLog;
/// use etl_pipeline::sources::{SourceExtractor, SourceSpec};
/// use etl_pipeline::storage::{MemoryBlobStore, MemoryTableSink};
/// use etl_pipeline::transform::{RuleSet, TransformSettings};
/// use std::sync::Arc;
///
/// # async fn example() -> etl_pipeline::error::Result<()> {
/// let pipeline = Pipeline::new(
///     SourceExtractor::new(vec![SourceSpec::new("people.csv", "csv")]),
///     RuleSet::from_settings(&TransformSettings::default())?,
///     BatchLoader::new(
///         Arc::new(MemoryBlobStore::new()),
///         "transformed_data.csv",
///         Arc::new(MemoryTableSink::new()),
///         "etl_table",
///     ),
/// );
///
/// let log = RunLog::new("example", chrono::Utc::now());
/// let run = pipeline.run(&log).await;
/// println!("Run {} finished as {}", run.run_id, run.status());
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<E, T, L> {
    extractor: E,
    transformer: T,
    loader: L,
}

impl<E, T, L> Pipeline<E, T, L>
where
    E: Extractor<Item = RecordBatch>,
    T: Transformer<Input = RecordBatch, Output = Cleaned>,
    L: Loader<Item = RecordBatch>,
{
    /// Create a new pipeline
    pub fn new(extractor: E, transformer: T, loader: L) -> Self {
        Self {
            extractor,
            transformer,
            loader,
        }
    }

    /// Run the complete ETL pipeline
    ///
    /// Never returns an error: failures are recorded on the returned
    /// [`PipelineRun`]. The run log is mirrored on every exit path.
    pub async fn run(&self, log: &RunLog) -> PipelineRun {
        let mut run = PipelineRun::new(log.run_id(), log.started_at());
        log.info("pipeline", format!("Starting run {}", run.run_id));

        if let Err(e) = self.execute(&mut run, log).await {
            let stage = run.status().stage();
            if let EtlError::PartialLoad(partial) = &e {
                run.loaded_rows = partial.inserted;
            }
            log.error(stage, format!("{}: {}", e.kind(), e));
            run.fail(e);
        }

        summarize(&run, log);
        log.flush().await;
        run
    }

    async fn execute(&self, run: &mut PipelineRun, log: &RunLog) -> Result<()> {
        run.advance(RunStatus::Extracting)?;
        let batches = self.extractor.extract(log).await?;
        let sources = batches.len();
        let batch = RecordBatch::concat(batches);
        run.extracted_rows = batch.len();
        log.info(
            "extract",
            format!(
                "Extracted {} row(s) from {} source(s)",
                batch.len(),
                sources
            ),
        );

        run.advance(RunStatus::Transforming)?;
        let Cleaned { batch, report } = self.transformer.transform(batch)?;
        report_transform(&report, log);
        run.transform = Some(report);

        run.advance(RunStatus::Loading)?;
        if batch.is_empty() {
            log.warn("load", "No rows to load, skipping sinks");
        } else {
            run.loaded_rows = self.loader.load(batch, log).await?;
        }

        run.advance(RunStatus::Succeeded)?;
        Ok(())
    }
}

fn report_transform(report: &TransformReport, log: &RunLog) {
    log.info(
        "transform",
        format!(
            "Transformed {} row(s) into {}: {} dropped, {} missing required, {} nulled, {} conversion failure(s)",
            report.rows_in,
            report.rows_out,
            report.dropped,
            report.missing_required,
            report.nulled,
            report.conversion_failures
        ),
    );
    for sample in &report.samples {
        log.warn("transform", sample.to_string());
    }
}

fn summarize(run: &PipelineRun, log: &RunLog) {
    match &run.error {
        None => log.info(
            "pipeline",
            format!(
                "Run {} {}: {} row(s) extracted, {} loaded",
                run.run_id,
                run.status(),
                run.extracted_rows,
                run.loaded_rows
            ),
        ),
        Some(e) => {
            log.error(
                "pipeline",
                format!(
                    "Run {} {} with {}: {} row(s) extracted, {} loaded",
                    run.run_id,
                    run.status(),
                    e.kind(),
                    run.extracted_rows,
                    run.loaded_rows
                ),
            );
            if let EtlError::PartialLoad(partial) = e {
                for rejected in &partial.samples {
                    log.error(
                        "pipeline",
                        format!("Rejected row {}: {}", rejected.row, rejected.reason),
                    );
                }
            }
        }
    }
}
