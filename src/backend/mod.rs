//! Backend connection seam
//!
//! The store talks to its database only through these traits: a
//! [`ConnectionSource`] hands out exclusively owned [`Connection`]s, and
//! result rows are read one typed cell at a time through [`ResultRow`].

pub mod postgres;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Value, ValueType};

pub use postgres::{PgConnection, PgConnectionSource, PgResultRow};

/// One row of a result set
pub trait ResultRow {
    fn column_count(&self) -> usize;

    /// Read the cell at `index`, converted to `value_type`
    fn get(&self, index: usize, value_type: &ValueType) -> Result<Value>;
}

/// Hands out connections
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    type Connection: Connection + 'static;

    async fn acquire(&self) -> Result<Self::Connection>;
}

/// An exclusively owned backend connection
///
/// Parameters are passed positionally and must already be converted by the
/// dialect's binding policy (see [`crate::sql::Statement::bind_values`]).
#[async_trait]
pub trait Connection: Send + Sized {
    type Row: ResultRow + Send;

    /// Run a statement, returning the number of affected rows
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a query and collect every row
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Self::Row>>;

    /// Toggle auto-commit; cursors only live while auto-commit is off
    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    /// Open a named forward-only cursor over a query
    async fn open_cursor(&mut self, name: &str, sql: &str, params: &[Value]) -> Result<()>;

    /// Fetch up to `max_rows` rows; an empty batch means the cursor is exhausted
    async fn fetch(&mut self, name: &str, max_rows: i64) -> Result<Vec<Self::Row>>;

    async fn close_cursor(&mut self, name: &str) -> Result<()>;

    /// Tables of a namespace (the connection's default when `None`)
    async fn describe_tables(&mut self, namespace: Option<&str>) -> Result<Vec<TableMetadata>>;

    /// Release the connection
    async fn close(self) -> Result<()>;
}

/// Column as reported by the backend catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub name: String,
    /// Backend type name, e.g. `varchar` or `geometry`
    pub type_name: String,
    pub nullable: bool,
    pub length: Option<u32>,
    /// Default expression, e.g. `nextval('roads_fid_seq'::regclass)`
    pub default: Option<String>,
    pub is_identity: bool,
    /// Spatial reference of a geometry column, from geometry metadata
    pub srid: Option<i32>,
    /// OGC geometry type of a geometry column, from geometry metadata
    pub geometry_type: Option<String>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            length: None,
            default: None,
            is_identity: false,
            srid: None,
            geometry_type: None,
        }
    }
}

/// Table as reported by the backend catalog
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
    /// Primary key column names, in key order
    pub primary_key: Vec<String>,
}

/// Close a connection, logging instead of propagating failures
pub(crate) async fn close_quietly<C: Connection>(connection: C) {
    if let Err(e) = connection.close().await {
        tracing::debug!(error = %e, "Failed to close backend connection");
    }
}
