//! Sink backends and serialisations
//!
//! This module handles everything the loader writes to:
//! - Blob storage (local directory, memory, S3)
//! - Relational tables (PostgreSQL, MySQL, SQLite, memory)
//! - Batch codecs for the blob sink (CSV, NDJSON)

mod blob;
mod codec;
mod table;

pub use blob::{BlobError, BlobStore, LocalBlobStore, MemoryBlobStore, open_blob_store};
pub use codec::{BlobFormat, CodecError, decode_batch, encode_batch};
pub use table::{
    ColumnDef, Dialect, MemoryTableSink, SqlTableSink, SqlType, TableError, TableSink, WriteMode,
    infer_columns,
};
