//! CLI helper functions

use crate::{
    config::PipelineConfig,
    etl::{Pipeline, PipelineRun, new_run_id, scoped_path},
    loader::BatchLoader,
    run_log::RunLog,
    sources::{SourceExtractor, SourceFormat},
    storage::{BlobStore, MemoryTableSink, SqlTableSink, TableSink, open_blob_store},
    transform::RuleSet,
};
use chrono::Utc;
use eyre::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;

/// Open the relational sink addressed by `url`
///
/// `memory://` keeps rows in process memory; anything else goes through
/// sqlx and connects on first use.
pub fn open_table_sink(url: &str) -> Result<Arc<dyn TableSink>> {
    if url == "memory://" {
        return Ok(Arc::new(MemoryTableSink::new()));
    }
    let sink = SqlTableSink::connect_lazy(url).context("Failed to configure relational sink")?;
    Ok(Arc::new(sink))
}

/// Run one full pipeline pass from a configuration file
///
/// Pipeline: SourceExtractor → RuleSet → BatchLoader (blob, then table)
///
/// Returns the finished run whether it succeeded or failed. Only problems
/// found before the run starts, such as an invalid configuration, are
/// returned as errors.
pub async fn run_pipeline(config_path: impl AsRef<Path>) -> Result<PipelineRun> {
    let config_path = config_path.as_ref();
    log::info!("Loading pipeline config from {}", config_path.display());
    let config = PipelineConfig::read(config_path)?;

    let started_at = Utc::now();
    let run_id = new_run_id(started_at);

    let blob_url = config.blob_url()?;
    let blob: Arc<dyn BlobStore> = open_blob_store(&blob_url)
        .await
        .with_context(|| format!("Failed to open blob store {}", blob_url))?;
    let table = open_table_sink(&config.table_url()?)?;

    let mut log = RunLog::new(run_id.clone(), started_at);
    if let Some(path) = &config.log.path {
        log = log.with_local_file(path);
    }
    if config.log.mirror {
        log = log.with_mirror(blob.clone(), scoped_path(&config.log.mirror_path, &run_id));
    }

    let extractor =
        SourceExtractor::new(config.sources.clone()).with_policy(config.on_source_error);
    let rules = RuleSet::from_settings(&config.transform)?;
    let loader = BatchLoader::new(
        blob,
        scoped_path(&config.blob.path, &run_id),
        table,
        config.table.name.clone(),
    )
    .with_format(config.blob.format)
    .with_mode(config.table.mode)
    .with_batch_size(config.table.batch_size);

    log::debug!("Transform rules: {}", rules.rule_names().join(", "));
    let pipeline = Pipeline::new(extractor, rules, loader);
    Ok(pipeline.run(&log).await)
}

/// Validate a configuration without reading data or touching any sink
///
/// Checks the configuration itself, every source's format tag and that
/// every source file exists. Returns the number of sources checked.
pub fn check_pipeline(config_path: impl AsRef<Path>) -> Result<usize> {
    let config_path = config_path.as_ref();
    let config = PipelineConfig::read(config_path)?;
    config.blob_url()?;

    let mut problems = Vec::new();
    for source in &config.sources {
        if let Err(e) = SourceFormat::parse(&source.format, &source.path) {
            problems.push(e.to_string());
        }
        if !source.path.is_file() {
            problems.push(format!("source {} does not exist", source.path.display()));
        }
    }

    if !problems.is_empty() {
        bail!(
            "{} problem(s) in {}:\n  {}",
            problems.len(),
            config_path.display(),
            problems.join("\n  ")
        );
    }

    log::info!(
        "Configuration {} is valid: {} source(s)",
        config_path.display(),
        config.sources.len()
    );
    Ok(config.sources.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::RunStatus;
    use tempfile::TempDir;

    fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("etl.yml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_check_reports_every_problem() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.csv"), "id\n1\n").unwrap();
        let path = write_config(
            temp.path(),
            "sources:\n  - {path: a.csv, format: csv}\n  - {path: b.yaml, format: yaml}\n",
        );

        let err = check_pipeline(&path).unwrap_err().to_string();
        assert!(err.contains("2 problem(s)"));
        assert!(err.contains("unsupported format 'yaml'"));
        assert!(err.contains("b.yaml does not exist"));
    }

    #[test]
    fn test_check_accepts_valid_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.csv"), "id\n1\n").unwrap();
        let path = write_config(temp.path(), "sources:\n  - {path: a.csv, format: csv}\n");

        assert_eq!(check_pipeline(&path).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_pipeline_to_local_blob_and_memory_table() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.csv"), "id,km\n1,10\n2,-5\n").unwrap();
        let path = write_config(
            temp.path(),
            r#"
sources:
  - {path: a.csv, format: csv}
transform:
  conversions:
    - {column: km, from: km, to: mi, precision: 3}
blob:
  url: out
  path: "{run_id}/data.csv"
table:
  url: "memory://"
log:
  mirror: true
"#,
        );

        let run = run_pipeline(&path).await.unwrap();

        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(run.loaded_rows, 2);
        let data = temp.path().join("out").join(&run.run_id).join("data.csv");
        let written = std::fs::read_to_string(data).unwrap();
        assert_eq!(written, "id,km,km_mi\n1,10,6.214\n2,-5,-3.107\n");
        assert!(
            temp.path()
                .join("out/logs")
                .join(format!("{}.ndjson", run.run_id))
                .is_file()
        );
        assert!(temp.path().join("logs/etl_log.jsonl").is_file());
    }
}
