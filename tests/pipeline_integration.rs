//! Integration tests for the ETL pipeline
//!
//! These tests drive whole runs through the public API with real files on
//! disk and in-memory or SQLite sinks.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use etl_pipeline::error::SinkKind;
use etl_pipeline::etl::{Extractor, Pipeline, RunStatus, Transformer};
use etl_pipeline::loader::BatchLoader;
use etl_pipeline::record::{RecordBatch, Value};
use etl_pipeline::run_log::RunLog;
use etl_pipeline::sources::{SourceExtractor, SourceSpec};
use etl_pipeline::storage::{
    BlobError, BlobFormat, BlobStore, LocalBlobStore, MemoryBlobStore, MemoryTableSink,
    SqlTableSink, TableSink, decode_batch,
};
use etl_pipeline::transform::{RuleSet, TransformSettings, UnitConversion};
use etl_pipeline::{EtlError, PipelineConfig};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const PEOPLE_CSV: &str = "\
id,name,height,weight,distance
1,Ada,70,150,12.5
2,Bob,NA,180,-5
3,Cy,65,,0
";

const PEOPLE_JSON: &str = r#"{"id": 4, "name": "Di", "height": 62, "weight": 120, "distance": 3}
{"id": 5, "name": "Ed", "height": 72, "weight": 200, "distance": 8.25}
"#;

const PEOPLE_XML: &str = r#"<people>
  <person><id>6</id><name>Flo</name><height>68</height><weight>140</weight><distance>1</distance></person>
</people>"#;

/// Blob store whose backend cannot be reached
struct UnreachableBlobStore;

#[async_trait]
impl BlobStore for UnreachableBlobStore {
    async fn put(&self, _path: &str, _bytes: Bytes) -> Result<(), BlobError> {
        Err(BlobError::Sdk("dispatch failure: connection refused".into()))
    }

    async fn get(&self, path: &str) -> Result<Bytes, BlobError> {
        Err(BlobError::NotFound(path.into()))
    }

    fn location(&self) -> String {
        "s3://unreachable".into()
    }
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn people_rules() -> RuleSet {
    let mut settings = TransformSettings {
        conversions: vec![
            UnitConversion::new("distance", "km", "mi").with_precision(4),
            UnitConversion::new("height_inches", "in", "m")
                .with_target("height_meters")
                .with_precision(4),
            UnitConversion::new("weight_pounds", "lb", "kg")
                .with_target("weight_kg")
                .with_precision(3),
        ],
        ..Default::default()
    };
    settings.rename.insert("height".into(), "height_inches".into());
    settings.rename.insert("weight".into(), "weight_pounds".into());
    RuleSet::from_settings(&settings).unwrap()
}

#[tokio::test]
async fn test_csv_run_converts_negative_distance() {
    let temp = TempDir::new().unwrap();
    let csv = write(temp.path(), "people.csv", PEOPLE_CSV);
    let blob = Arc::new(MemoryBlobStore::new());
    let table = Arc::new(MemoryTableSink::new());

    let pipeline = Pipeline::new(
        SourceExtractor::new(vec![SourceSpec::new(&csv, "csv")]),
        people_rules(),
        BatchLoader::new(blob.clone(), "transformed_data.csv", table.clone(), "etl_table"),
    );
    let log = RunLog::new("csv-run", Utc::now());
    let run = pipeline.run(&log).await;

    assert_eq!(run.status(), RunStatus::Succeeded);
    assert_eq!(run.extracted_rows, 3);
    assert_eq!(run.loaded_rows, 3);

    let rows = table.rows("etl_table");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].get("distance"), Some(&Value::Integer(-5)));
    assert_eq!(rows[1].get("distance_mi"), Some(&Value::Float(-3.1069)));
    assert_eq!(rows[0].get("distance_mi"), Some(&Value::Float(7.7671)));
    assert_eq!(rows[0].get("height_meters"), Some(&Value::Float(1.778)));
    assert_eq!(rows[1].get("height_meters"), Some(&Value::Null));
    assert_eq!(rows[2].get("weight_kg"), Some(&Value::Null));

    let stored = blob.get("transformed_data.csv").await.unwrap();
    let written = decode_batch(&stored, BlobFormat::Csv).unwrap();
    assert_eq!(written.len(), 3);
    assert!(written.has_column("height_inches"));
    assert!(!written.has_column("height"));
}

#[tokio::test]
async fn test_unsupported_format_fails_run() {
    let temp = TempDir::new().unwrap();
    let csv = write(temp.path(), "people.csv", PEOPLE_CSV);
    let yaml = write(temp.path(), "people.yaml", "- id: 1\n");
    let blob = Arc::new(MemoryBlobStore::new());
    let table = Arc::new(MemoryTableSink::new());

    let pipeline = Pipeline::new(
        SourceExtractor::new(vec![
            SourceSpec::new(&csv, "csv"),
            SourceSpec::new(&yaml, "yaml"),
        ]),
        people_rules(),
        BatchLoader::new(blob.clone(), "out.csv", table.clone(), "etl_table"),
    );
    let log = RunLog::new("yaml-run", Utc::now());
    let run = pipeline.run(&log).await;

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(
        run.error.as_ref().map(|e| e.kind()),
        Some("UnsupportedFormatError")
    );
    assert!(blob.paths().is_empty());
    assert!(!table.has_table("etl_table"));
}

#[test]
fn test_unsupported_format_exits_non_zero() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "people.yaml", "- id: 1\n");
    let config = write(
        temp.path(),
        "etl.yml",
        "sources:\n  - {path: people.yaml, format: yaml}\nblob:\n  url: out\ntable:\n  url: \"memory://\"\n",
    );

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_etlp"))
        .arg("--config")
        .arg(&config)
        .arg("--env")
        .arg(temp.path().join("missing.env"))
        .arg("run")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("UnsupportedFormatError"));
}

#[tokio::test]
async fn test_unreachable_blob_skips_relational_write() {
    let temp = TempDir::new().unwrap();
    let csv = write(temp.path(), "people.csv", PEOPLE_CSV);
    let table = Arc::new(MemoryTableSink::new());

    let pipeline = Pipeline::new(
        SourceExtractor::new(vec![SourceSpec::new(&csv, "csv")]),
        people_rules(),
        BatchLoader::new(
            Arc::new(UnreachableBlobStore),
            "out.csv",
            table.clone(),
            "etl_table",
        ),
    );
    let log = RunLog::new("blob-down", Utc::now());
    let run = pipeline.run(&log).await;

    assert_eq!(run.status(), RunStatus::Failed);
    assert!(matches!(
        run.error,
        Some(EtlError::SinkWrite {
            sink: SinkKind::Blob,
            ..
        })
    ));
    assert_eq!(run.loaded_rows, 0);
    assert!(!table.has_table("etl_table"));
}

#[tokio::test]
async fn test_partial_load_counts_add_up() {
    let temp = TempDir::new().unwrap();
    let csv = write(temp.path(), "people.csv", PEOPLE_CSV);
    let table = Arc::new(MemoryTableSink::new().with_not_null(&["height_inches"]));

    let pipeline = Pipeline::new(
        SourceExtractor::new(vec![SourceSpec::new(&csv, "csv")]),
        people_rules(),
        BatchLoader::new(
            Arc::new(MemoryBlobStore::new()),
            "out.csv",
            table.clone(),
            "etl_table",
        )
        .with_batch_size(2),
    );
    let log = RunLog::new("partial", Utc::now());
    let run = pipeline.run(&log).await;

    assert_eq!(run.status(), RunStatus::Failed);
    let Some(EtlError::PartialLoad(partial)) = &run.error else {
        panic!("expected a partial load");
    };
    assert_eq!(partial.inserted, 2);
    assert_eq!(partial.rejected, 1);
    assert_eq!(partial.inserted + partial.rejected, run.extracted_rows);
    assert_eq!(partial.samples[0].row, 1);
    assert_eq!(run.loaded_rows, 2);
    assert_eq!(table.rows("etl_table").len(), 2);
    assert!(
        log.entries()
            .iter()
            .any(|e| e.message.contains("Rejected row 1"))
    );
}

#[tokio::test]
async fn test_extracted_row_counts_match_sources() {
    let temp = TempDir::new().unwrap();
    let sources = vec![
        SourceSpec::new(write(temp.path(), "a.csv", PEOPLE_CSV), "csv"),
        SourceSpec::new(write(temp.path(), "b.json", PEOPLE_JSON), "json"),
        SourceSpec::new(write(temp.path(), "c.xml", PEOPLE_XML), "xml"),
        SourceSpec::new(
            write(temp.path(), "d.tsv", "id\tname\n7\tGus\n8\tHal\n"),
            "tsv",
        ),
    ];
    let log = RunLog::new("count", Utc::now());

    let batches = SourceExtractor::new(sources).extract(&log).await.unwrap();
    let counts: Vec<usize> = batches.iter().map(RecordBatch::len).collect();
    assert_eq!(counts, vec![3, 2, 1, 2]);

    let combined = RecordBatch::concat(batches);
    let cleaned = people_rules().transform(combined).unwrap();
    assert_eq!(cleaned.batch.len(), 8);
    assert!(cleaned.batch.is_uniform());
}

#[tokio::test]
async fn test_transform_is_idempotent_over_mixed_sources() {
    let temp = TempDir::new().unwrap();
    let sources = vec![
        SourceSpec::new(write(temp.path(), "a.csv", PEOPLE_CSV), "csv"),
        SourceSpec::new(write(temp.path(), "b.json", PEOPLE_JSON), "json"),
        SourceSpec::new(write(temp.path(), "c.xml", PEOPLE_XML), "xml"),
    ];
    let log = RunLog::new("idem", Utc::now());
    let batches = SourceExtractor::new(sources).extract(&log).await.unwrap();
    let rules = people_rules();

    let once = rules.transform(RecordBatch::concat(batches)).unwrap();
    let twice = rules.transform(once.batch.clone()).unwrap();

    assert_eq!(once.batch, twice.batch);
}

#[tokio::test]
async fn test_blob_round_trip_on_disk() {
    let temp = TempDir::new().unwrap();
    let csv = write(temp.path(), "people.csv", PEOPLE_CSV);
    let log = RunLog::new("rt", Utc::now());
    let batches = SourceExtractor::new(vec![SourceSpec::new(&csv, "csv")])
        .extract(&log)
        .await
        .unwrap();
    let cleaned = people_rules()
        .transform(RecordBatch::concat(batches))
        .unwrap()
        .batch;

    let store = LocalBlobStore::new(temp.path().join("blobs"));
    for (path, format) in [("rt.csv", BlobFormat::Csv), ("rt.ndjson", BlobFormat::Ndjson)] {
        let bytes = etl_pipeline::storage::encode_batch(&cleaned, format).unwrap();
        store.put(path, Bytes::from(bytes)).await.unwrap();
        let read = decode_batch(&store.get(path).await.unwrap(), format).unwrap();
        assert_eq!(read, cleaned, "{} round trip", format);
    }
}

#[tokio::test]
async fn test_sqlite_table_receives_rows() {
    let temp = TempDir::new().unwrap();
    let csv = write(temp.path(), "people.csv", PEOPLE_CSV);
    let table = Arc::new(SqlTableSink::connect_lazy("sqlite::memory:").unwrap());

    let pipeline = Pipeline::new(
        SourceExtractor::new(vec![SourceSpec::new(&csv, "csv")]),
        people_rules(),
        BatchLoader::new(
            Arc::new(MemoryBlobStore::new()),
            "out.csv",
            table.clone(),
            "etl_table",
        ),
    );
    let log = RunLog::new("sqlite", Utc::now());
    let run = pipeline.run(&log).await;
    assert!(run.succeeded(), "{:?}", run.error);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM etl_table")
        .fetch_one(table.pool())
        .await
        .unwrap();
    assert_eq!(count, 3);

    let affected = table
        .execute("DELETE FROM etl_table WHERE id = ?", &[Value::Integer(2)])
        .await
        .unwrap();
    assert_eq!(affected, 1);
}

#[test]
fn test_config_file_drives_run_settings() {
    let temp = TempDir::new().unwrap();
    let config = write(
        temp.path(),
        "etl.yml",
        "sources:\n  - {path: people.csv, format: csv}\ntable:\n  url: \"memory://\"\n",
    );

    let config = PipelineConfig::read(&config).unwrap();
    assert_eq!(config.sources[0].path, temp.path().join("people.csv"));
    assert_eq!(config.table.name, "etl_table");
}
