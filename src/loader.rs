//! Loader writing a cleaned batch to the blob sink, then the relational sink

use crate::error::{EtlError, PartialLoad, RejectedRow, Result};
use crate::etl::Loader;
use crate::record::RecordBatch;
use crate::run_log::RunLog;
use crate::storage::{
    BlobFormat, BlobStore, TableError, TableSink, WriteMode, encode_batch, infer_columns,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Rejected rows kept verbatim in a [`PartialLoad`]
const MAX_REJECTED_SAMPLES: usize = 5;

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Writes the whole batch as one blob, then inserts it into a table in chunks
///
/// A blob failure stops the load before the table is touched. A chunk
/// refused by the database is retried row by row so the rows that fit are
/// still inserted; the rest are reported as a [`PartialLoad`]. Inserted rows
/// are never rolled back.
pub struct BatchLoader {
    blob: Arc<dyn BlobStore>,
    blob_path: String,
    format: BlobFormat,
    table: Arc<dyn TableSink>,
    table_name: String,
    mode: WriteMode,
    batch_size: usize,
}

impl BatchLoader {
    pub fn new(
        blob: Arc<dyn BlobStore>,
        blob_path: impl Into<String>,
        table: Arc<dyn TableSink>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            blob,
            blob_path: blob_path.into(),
            format: BlobFormat::default(),
            table,
            table_name: table_name.into(),
            mode: WriteMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_format(mut self, format: BlobFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Rows per insert statement; zero is treated as one
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn blob_target(&self) -> String {
        format!("{} {}", self.blob.location(), self.blob_path)
    }

    async fn write_blob(&self, batch: &RecordBatch, log: &RunLog) -> Result<()> {
        let bytes = encode_batch(batch, self.format)
            .map_err(|e| EtlError::blob_write(self.blob_target(), e))?;
        let size = bytes.len();

        self.blob
            .put(&self.blob_path, Bytes::from(bytes))
            .await
            .map_err(|e| EtlError::blob_write(self.blob_target(), e))?;

        log.info(
            "load",
            format!(
                "Wrote {} row(s) ({} bytes, {}) to {}",
                batch.len(),
                size,
                self.format,
                self.blob_target()
            ),
        );
        Ok(())
    }

    async fn write_table(&self, batch: &RecordBatch, log: &RunLog) -> Result<usize> {
        let columns = infer_columns(batch);
        let to_sink_error = |e: TableError| EtlError::table_write(&self.table_name, e);

        self.table
            .prepare_table(&self.table_name, &columns, self.mode)
            .await
            .map_err(to_sink_error)?;

        let mut inserted = 0;
        let mut rejected = Vec::new();
        for (chunk_index, chunk) in batch.rows().chunks(self.batch_size).enumerate() {
            let offset = chunk_index * self.batch_size;
            match self
                .table
                .insert_rows(&self.table_name, &columns, chunk)
                .await
            {
                Ok(_) => inserted += chunk.len(),
                Err(TableError::Statement(reason)) => {
                    log::debug!(
                        "Chunk at row {} rejected ({}), retrying row by row",
                        offset,
                        reason
                    );
                    for (i, row) in chunk.iter().enumerate() {
                        match self
                            .table
                            .insert_rows(&self.table_name, &columns, std::slice::from_ref(row))
                            .await
                        {
                            Ok(_) => inserted += 1,
                            Err(TableError::Statement(reason)) => rejected.push(RejectedRow {
                                row: offset + i,
                                reason,
                            }),
                            Err(e) => return Err(to_sink_error(e)),
                        }
                    }
                }
                Err(e) => return Err(to_sink_error(e)),
            }
        }

        log.info(
            "load",
            format!(
                "Inserted {} row(s) into table '{}' at {}",
                inserted,
                self.table_name,
                self.table.location()
            ),
        );

        if rejected.is_empty() {
            return Ok(inserted);
        }

        let count = rejected.len();
        rejected.truncate(MAX_REJECTED_SAMPLES);
        Err(EtlError::PartialLoad(PartialLoad {
            table: self.table_name.clone(),
            inserted,
            rejected: count,
            samples: rejected,
        }))
    }
}

#[async_trait]
impl Loader for BatchLoader {
    type Item = RecordBatch;

    async fn load(&self, item: Self::Item, log: &RunLog) -> Result<usize> {
        self.write_blob(&item, log).await?;
        self.write_table(&item, log).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Row, Value};
    use crate::storage::{BlobError, MemoryBlobStore, MemoryTableSink, decode_batch};
    use chrono::Utc;

    struct DownBlobStore;

    #[async_trait]
    impl BlobStore for DownBlobStore {
        async fn put(&self, _path: &str, _bytes: Bytes) -> std::result::Result<(), BlobError> {
            Err(BlobError::Io("connection refused".into()))
        }

        async fn get(&self, path: &str) -> std::result::Result<Bytes, BlobError> {
            Err(BlobError::NotFound(path.into()))
        }

        fn location(&self) -> String {
            "down://".into()
        }
    }

    fn people(ids: &[Option<i64>]) -> RecordBatch {
        RecordBatch::from_parts(
            vec!["id".into(), "name".into()],
            ids.iter()
                .enumerate()
                .map(|(i, id)| {
                    [
                        ("id", id.map(Value::Integer).unwrap_or(Value::Null)),
                        ("name", Value::text(format!("p{}", i))),
                    ]
                    .into_iter()
                    .collect::<Row>()
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_writes_blob_then_table() {
        let blob = Arc::new(MemoryBlobStore::new());
        let table = Arc::new(MemoryTableSink::new());
        let loader = BatchLoader::new(blob.clone(), "out/data.csv", table.clone(), "people")
            .with_batch_size(2);
        let log = RunLog::new("r", Utc::now());
        let batch = people(&[Some(1), Some(2), Some(3)]);

        let count = loader.load(batch.clone(), &log).await.unwrap();

        assert_eq!(count, 3);
        assert_eq!(table.rows("people").len(), 3);
        let stored = blob.get("out/data.csv").await.unwrap();
        assert_eq!(decode_batch(&stored, BlobFormat::Csv).unwrap(), batch);
    }

    #[tokio::test]
    async fn test_blob_failure_skips_table() {
        let table = Arc::new(MemoryTableSink::new());
        let loader = BatchLoader::new(
            Arc::new(DownBlobStore),
            "data.csv",
            table.clone(),
            "people",
        );
        let log = RunLog::new("r", Utc::now());

        let err = loader.load(people(&[Some(1)]), &log).await.unwrap_err();

        assert!(matches!(
            err,
            EtlError::SinkWrite {
                sink: crate::error::SinkKind::Blob,
                ..
            }
        ));
        assert!(!table.has_table("people"));
    }

    #[tokio::test]
    async fn test_rejected_rows_are_isolated() {
        let table = Arc::new(MemoryTableSink::new().with_not_null(&["id"]));
        let loader = BatchLoader::new(
            Arc::new(MemoryBlobStore::new()),
            "data.ndjson",
            table.clone(),
            "people",
        )
        .with_format(BlobFormat::Ndjson)
        .with_batch_size(2);
        let log = RunLog::new("r", Utc::now());

        let err = loader
            .load(people(&[Some(1), None, Some(3), None, Some(5)]), &log)
            .await
            .unwrap_err();

        let EtlError::PartialLoad(partial) = err else {
            panic!("expected a partial load");
        };
        assert_eq!(partial.inserted, 3);
        assert_eq!(partial.rejected, 2);
        assert_eq!(partial.inserted + partial.rejected, 5);
        assert_eq!(partial.samples[0].row, 1);
        assert_eq!(partial.samples[1].row, 3);
        assert!(partial.samples[0].reason.contains("NOT NULL"));
        assert_eq!(table.rows("people").len(), 3);
    }

    #[tokio::test]
    async fn test_append_keeps_existing_rows() {
        let table = Arc::new(MemoryTableSink::new());
        let blob = Arc::new(MemoryBlobStore::new());
        let log = RunLog::new("r", Utc::now());

        BatchLoader::new(blob.clone(), "a.csv", table.clone(), "people")
            .load(people(&[Some(1)]), &log)
            .await
            .unwrap();
        BatchLoader::new(blob.clone(), "b.csv", table.clone(), "people")
            .with_mode(WriteMode::Append)
            .load(people(&[Some(2)]), &log)
            .await
            .unwrap();
        assert_eq!(table.rows("people").len(), 2);

        BatchLoader::new(blob, "c.csv", table.clone(), "people")
            .load(people(&[Some(3)]), &log)
            .await
            .unwrap();
        assert_eq!(table.rows("people").len(), 1);
    }
}
