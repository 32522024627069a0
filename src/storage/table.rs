//! Relational sink capability and its backends
//!
//! [`TableSink`] is the narrow surface the loader needs from a database:
//! prepare a table, insert a group of rows atomically, and run an arbitrary
//! statement. [`SqlTableSink`] speaks to PostgreSQL, MySQL or SQLite through
//! the sqlx `Any` driver; [`MemoryTableSink`] keeps rows in memory.

use crate::record::{RecordBatch, Row, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::any::{AnyArguments, AnyPoolOptions};
use sqlx::query::Query;
use sqlx::{Any, AnyPool};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    /// The database could not be reached or the table could not be prepared
    #[error("connection error: {0}")]
    Connection(String),
    /// The database refused a statement, typically a constraint violation
    #[error("statement rejected: {0}")]
    Statement(String),
}

impl From<sqlx::Error> for TableError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) => TableError::Statement(db.message().to_string()),
            sqlx::Error::Encode(e) | sqlx::Error::Decode(e) => TableError::Statement(e.to_string()),
            sqlx::Error::ColumnDecode { source, .. } => TableError::Statement(source.to_string()),
            other => TableError::Connection(other.to_string()),
        }
    }
}

/// What to do with an existing destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Drop and recreate the table
    #[default]
    Replace,
    /// Create the table if missing and add rows
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Float,
    Boolean,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
}

/// Infer one SQL type per column from the non-null values of a batch
///
/// Integers widen to floats when mixed; anything else mixed, and all-null
/// columns, become text.
pub fn infer_columns(batch: &RecordBatch) -> Vec<ColumnDef> {
    batch
        .columns()
        .iter()
        .map(|name| {
            let mut seen: Option<SqlType> = None;
            for value in batch.rows().iter().filter_map(|r| r.get(name)) {
                let ty = match value {
                    Value::Null => continue,
                    Value::Bool(_) => SqlType::Boolean,
                    Value::Integer(_) => SqlType::Integer,
                    Value::Float(_) => SqlType::Float,
                    Value::Text(_) => SqlType::Text,
                };
                seen = Some(match (seen, ty) {
                    (None, t) => t,
                    (Some(a), b) if a == b => a,
                    (Some(SqlType::Integer), SqlType::Float)
                    | (Some(SqlType::Float), SqlType::Integer) => SqlType::Float,
                    _ => SqlType::Text,
                });
            }
            ColumnDef {
                name: name.clone(),
                sql_type: seen.unwrap_or(SqlType::Text),
            }
        })
        .collect()
}

#[async_trait]
pub trait TableSink: Send + Sync {
    /// Run one statement with positional parameters, returning affected rows
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64, TableError>;

    /// Make sure `table` exists with `columns`, honouring `mode`
    async fn prepare_table(
        &self,
        table: &str,
        columns: &[ColumnDef],
        mode: WriteMode,
    ) -> Result<(), TableError>;

    /// Insert `rows` in a single statement; either all rows land or none do
    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Row],
    ) -> Result<u64, TableError>;

    /// Human readable location, used in log messages
    fn location(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self, TableError> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(TableError::Connection(format!(
                "unsupported database scheme '{}'",
                other
            ))),
        }
    }

    pub fn quote(self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        }
    }

    fn type_name(self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Integer => "BIGINT",
            SqlType::Float => "DOUBLE PRECISION",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
        }
    }

    pub fn create_table(self, table: &str, columns: &[ColumnDef], if_not_exists: bool) -> String {
        let defs = columns
            .iter()
            .map(|c| format!("{} {}", self.quote(&c.name), self.type_name(c.sql_type)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE {}{} ({})",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            self.quote(table),
            defs
        )
    }

    /// Multi-row `INSERT` with one placeholder per cell
    pub fn insert(self, table: &str, columns: &[ColumnDef], row_count: usize) -> String {
        let names = columns
            .iter()
            .map(|c| self.quote(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut index = 0;
        let tuples = (0..row_count)
            .map(|_| {
                let cells = columns
                    .iter()
                    .map(|_| {
                        index += 1;
                        self.placeholder(index)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", cells)
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({}) VALUES {}", self.quote(table), names, tuples)
    }
}

type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

/// Bind a cell, using the column type to type nulls and widen integers
fn bind_cell<'q>(query: AnyQuery<'q>, value: &Value, ty: SqlType) -> AnyQuery<'q> {
    match (value, ty) {
        (Value::Null, SqlType::Integer) => query.bind(None::<i64>),
        (Value::Null, SqlType::Float) => query.bind(None::<f64>),
        (Value::Null, SqlType::Boolean) => query.bind(None::<bool>),
        (Value::Null, SqlType::Text) => query.bind(None::<String>),
        (Value::Integer(i), SqlType::Float) => query.bind(*i as f64),
        (other, SqlType::Text) if !matches!(other, Value::Text(_)) => {
            query.bind(other.to_string())
        }
        (Value::Bool(b), _) => query.bind(*b),
        (Value::Integer(i), _) => query.bind(*i),
        (Value::Float(f), _) => query.bind(*f),
        (Value::Text(s), _) => query.bind(s.clone()),
    }
}

/// Relational sink backed by an sqlx `Any` pool
pub struct SqlTableSink {
    pool: AnyPool,
    dialect: Dialect,
    location: String,
}

impl SqlTableSink {
    /// Create a sink without connecting; the first statement opens the connection
    pub fn connect_lazy(url: &str) -> Result<Self, TableError> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(url)?;
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect_lazy(url)?;
        Ok(Self {
            pool,
            dialect,
            location: redact(url),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

/// Strip credentials from a connection URL for logging
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl TableSink for SqlTableSink {
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64, TableError> {
        let mut query = sqlx::query(statement);
        for value in params {
            let ty = match value {
                Value::Null | Value::Text(_) => SqlType::Text,
                Value::Bool(_) => SqlType::Boolean,
                Value::Integer(_) => SqlType::Integer,
                Value::Float(_) => SqlType::Float,
            };
            query = bind_cell(query, value, ty);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn prepare_table(
        &self,
        table: &str,
        columns: &[ColumnDef],
        mode: WriteMode,
    ) -> Result<(), TableError> {
        let to_connection = |e: sqlx::Error| TableError::Connection(e.to_string());

        if mode == WriteMode::Replace {
            let drop = format!("DROP TABLE IF EXISTS {}", self.dialect.quote(table));
            sqlx::query(&drop)
                .execute(&self.pool)
                .await
                .map_err(to_connection)?;
        }

        let create = self
            .dialect
            .create_table(table, columns, mode == WriteMode::Append);
        log::debug!("{}", create);
        sqlx::query(&create)
            .execute(&self.pool)
            .await
            .map_err(to_connection)?;
        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Row],
    ) -> Result<u64, TableError> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let sql = self.dialect.insert(table, columns, rows.len());
        let mut query = sqlx::query(&sql);
        for row in rows {
            for column in columns {
                let value = row.get(&column.name).unwrap_or(&Value::Null);
                query = bind_cell(query, value, column.sql_type);
            }
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}

/// In-memory relational sink
///
/// Tables are plain row vectors. Columns registered with
/// [`MemoryTableSink::with_not_null`] reject nulls the way a `NOT NULL`
/// constraint would, failing the whole insert call.
#[derive(Default)]
pub struct MemoryTableSink {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    not_null: BTreeSet<String>,
}

impl MemoryTableSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_not_null(mut self, columns: &[&str]) -> Self {
        self.not_null
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Rows currently stored in `table`
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.get(table).cloned().unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.contains_key(table)
    }
}

#[async_trait]
impl TableSink for MemoryTableSink {
    async fn execute(&self, statement: &str, _params: &[Value]) -> Result<u64, TableError> {
        Err(TableError::Statement(format!(
            "memory sink cannot execute SQL: {}",
            statement
        )))
    }

    async fn prepare_table(
        &self,
        table: &str,
        _columns: &[ColumnDef],
        mode: WriteMode,
    ) -> Result<(), TableError> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        match mode {
            WriteMode::Replace => {
                tables.insert(table.to_string(), Vec::new());
            }
            WriteMode::Append => {
                tables.entry(table.to_string()).or_default();
            }
        }
        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Row],
    ) -> Result<u64, TableError> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let stored = tables
            .get_mut(table)
            .ok_or_else(|| TableError::Statement(format!("no such table: {}", table)))?;

        for row in rows {
            if let Some(column) = self
                .not_null
                .iter()
                .find(|c| row.get(c).is_none_or(Value::is_null))
            {
                return Err(TableError::Statement(format!(
                    "NOT NULL constraint failed: {}.{}",
                    table, column
                )));
            }
        }

        stored.extend(rows.iter().map(|row| {
            columns
                .iter()
                .map(|c| (c.name.clone(), row.value_or_null(&c.name)))
                .collect::<Row>()
        }));
        Ok(rows.len() as u64)
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}
