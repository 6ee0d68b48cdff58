//! PostgreSQL backend over `sqlx`
//!
//! Connections come from a [`PgPool`]; closing a [`PgConnection`] rolls back
//! any open transaction and returns it to the pool. Cursors are SQL-level
//! `DECLARE ... CURSOR` portals, so they need auto-commit to be off.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};

use super::{ColumnMetadata, Connection, ConnectionSource, ResultRow, TableMetadata};
use crate::config::StoreConfig;
use crate::error::{FeatureStoreError, Result};
use crate::geometry;
use crate::sql::quote_identifier;
use crate::types::{Value, ValueType};

const TABLES_SQL: &str = r#"
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema::text = COALESCE($1::text, current_schema()::text)
      AND table_type = 'BASE TABLE'
    ORDER BY table_name
"#;

const COLUMNS_SQL: &str = r#"
    SELECT table_name::text, column_name::text, udt_name::text, is_nullable::text,
           character_maximum_length::int4, column_default::text, is_identity::text
    FROM information_schema.columns
    WHERE table_schema::text = COALESCE($1::text, current_schema()::text)
    ORDER BY table_name, ordinal_position
"#;

const PRIMARY_KEYS_SQL: &str = r#"
    SELECT kcu.table_name::text, kcu.column_name::text
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON tc.constraint_name = kcu.constraint_name
     AND tc.table_schema = kcu.table_schema
     AND tc.table_name = kcu.table_name
    WHERE tc.constraint_type = 'PRIMARY KEY'
      AND tc.table_schema::text = COALESCE($1::text, current_schema()::text)
    ORDER BY kcu.table_name, kcu.ordinal_position
"#;

/// Pooled PostgreSQL connections
#[derive(Debug, Clone)]
pub struct PgConnectionSource {
    pool: PgPool,
}

impl PgConnectionSource {
    /// Connect a pool sized by the configuration
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                FeatureStoreError::Connection(format!("Database connection failed: {}", e))
            })?;
        Ok(Self { pool })
    }

    /// Use an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionSource for PgConnectionSource {
    type Connection = PgConnection;

    async fn acquire(&self) -> Result<PgConnection> {
        let conn = self.pool.acquire().await?;
        Ok(PgConnection {
            conn,
            in_transaction: false,
        })
    }
}

/// One pooled PostgreSQL connection
#[derive(Debug)]
pub struct PgConnection {
    conn: PoolConnection<Postgres>,
    in_transaction: bool,
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Boolean(b) => query.bind(*b),
            Value::Integer(i) => query.bind(*i),
            Value::Double(d) => query.bind(*d),
            Value::Decimal(d) => query.bind(*d),
            Value::Text(s) => query.bind(s.clone()),
            Value::Date(d) => query.bind(*d),
            Value::Timestamp(ts) => query.bind(*ts),
            Value::Binary(bytes) => query.bind(bytes.clone()),
            Value::Json(json) => query.bind(json.clone()),
            Value::Geometry(g) => query.bind(geometry::to_wkt(g)),
        };
    }
    query
}

#[async_trait]
impl Connection for PgConnection {
    type Row = PgResultRow;

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<PgResultRow>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows.into_iter().map(PgResultRow).collect())
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        match (enabled, self.in_transaction) {
            (false, false) => {
                sqlx::query("BEGIN").execute(&mut *self.conn).await?;
                self.in_transaction = true;
            }
            (true, true) => {
                sqlx::query("COMMIT").execute(&mut *self.conn).await?;
                self.in_transaction = false;
            }
            _ => {}
        }
        Ok(())
    }

    async fn open_cursor(&mut self, name: &str, sql: &str, params: &[Value]) -> Result<()> {
        if !self.in_transaction {
            return Err(FeatureStoreError::unsupported(
                "cursors require auto-commit to be disabled",
            ));
        }
        let declare = format!("DECLARE {} NO SCROLL CURSOR FOR {}", quote_identifier(name), sql);
        bind_all(sqlx::query(&declare), params)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn fetch(&mut self, name: &str, max_rows: i64) -> Result<Vec<PgResultRow>> {
        let sql = if max_rows > 0 {
            format!("FETCH FORWARD {} FROM {}", max_rows, quote_identifier(name))
        } else {
            format!("FETCH ALL FROM {}", quote_identifier(name))
        };
        let rows = sqlx::query(&sql).fetch_all(&mut *self.conn).await?;
        Ok(rows.into_iter().map(PgResultRow).collect())
    }

    async fn close_cursor(&mut self, name: &str) -> Result<()> {
        sqlx::query(&format!("CLOSE {}", quote_identifier(name)))
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn describe_tables(&mut self, namespace: Option<&str>) -> Result<Vec<TableMetadata>> {
        let namespace = namespace.map(str::to_string);

        let tables: Vec<String> = sqlx::query_scalar(TABLES_SQL)
            .bind(namespace.clone())
            .fetch_all(&mut *self.conn)
            .await?;

        let mut columns: HashMap<String, Vec<ColumnMetadata>> = HashMap::new();
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(namespace.clone())
            .fetch_all(&mut *self.conn)
            .await?;
        for row in rows {
            let table: String = row.try_get(0)?;
            let mut column = ColumnMetadata::new(
                row.try_get::<String, _>(1)?,
                row.try_get::<String, _>(2)?,
            );
            column.nullable = row.try_get::<String, _>(3)? == "YES";
            column.length = row
                .try_get::<Option<i32>, _>(4)?
                .and_then(|len| u32::try_from(len).ok());
            column.default = row.try_get(5)?;
            column.is_identity = row.try_get::<Option<String>, _>(6)?.as_deref() == Some("YES");
            columns.entry(table).or_default().push(column);
        }

        let mut keys: HashMap<String, Vec<String>> = HashMap::new();
        let rows = sqlx::query(PRIMARY_KEYS_SQL)
            .bind(namespace)
            .fetch_all(&mut *self.conn)
            .await?;
        for row in rows {
            let table: String = row.try_get(0)?;
            keys.entry(table).or_default().push(row.try_get(1)?);
        }

        Ok(tables
            .into_iter()
            .map(|name| TableMetadata {
                columns: columns.remove(&name).unwrap_or_default(),
                primary_key: keys.remove(&name).unwrap_or_default(),
                name,
            })
            .collect())
    }

    async fn close(mut self) -> Result<()> {
        if self.in_transaction {
            sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
            self.in_transaction = false;
        }
        Ok(())
    }
}

/// A PostgreSQL result row
#[derive(Debug)]
pub struct PgResultRow(PgRow);

impl PgResultRow {
    fn cell<'r, T>(&'r self, index: usize) -> std::result::Result<Option<T>, sqlx::Error>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        self.0.try_get::<Option<T>, _>(index)
    }
}

fn optional<T>(value: Option<T>, wrap: impl FnOnce(T) -> Value) -> Value {
    value.map_or(Value::Null, wrap)
}

impl ResultRow for PgResultRow {
    fn column_count(&self) -> usize {
        self.0.len()
    }

    fn get(&self, index: usize, value_type: &ValueType) -> Result<Value> {
        let decoded = match value_type {
            ValueType::String => self
                .cell::<String>(index)
                .map(|v| optional(v, Value::Text)),
            ValueType::Integer => self
                .cell::<i64>(index)
                .or_else(|_| self.cell::<i32>(index).map(|v| v.map(i64::from)))
                .or_else(|_| self.cell::<i16>(index).map(|v| v.map(i64::from)))
                .map(|v| optional(v, Value::Integer)),
            ValueType::Double => self
                .cell::<f64>(index)
                .or_else(|_| self.cell::<f32>(index).map(|v| v.map(f64::from)))
                .or_else(|_| {
                    self.cell::<Decimal>(index)
                        .map(|v| v.and_then(|d| d.to_f64()))
                })
                .map(|v| optional(v, Value::Double)),
            ValueType::Decimal { .. } => self
                .cell::<Decimal>(index)
                .map(|v| optional(v, Value::Decimal)),
            ValueType::Boolean => self
                .cell::<bool>(index)
                .map(|v| optional(v, Value::Boolean)),
            ValueType::Date => self
                .cell::<NaiveDate>(index)
                .map(|v| optional(v, Value::Date)),
            ValueType::Timestamp => self
                .cell::<DateTime<Utc>>(index)
                .or_else(|_| {
                    self.cell::<NaiveDateTime>(index)
                        .map(|v| v.map(|ts| ts.and_utc()))
                })
                .map(|v| optional(v, Value::Timestamp)),
            ValueType::Binary => self
                .cell::<Vec<u8>>(index)
                .map(|v| optional(v, Value::Binary)),
            ValueType::Uuid => self
                .cell::<uuid::Uuid>(index)
                .map(|v| optional(v, |uuid| Value::Text(uuid.hyphenated().to_string()))),
            ValueType::Json => self
                .cell::<serde_json::Value>(index)
                .map(|v| optional(v, Value::Json)),
            ValueType::Geometry { .. } => {
                let text = self
                    .cell::<String>(index)
                    .map_err(|e| decode_error(index, value_type, e))?;
                return match text {
                    Some(wkt) if !wkt.is_empty() => geometry::from_wkt(&wkt).map(Value::Geometry),
                    _ => Ok(Value::Null),
                };
            }
        };
        decoded.map_err(|e| decode_error(index, value_type, e))
    }
}

fn decode_error(index: usize, value_type: &ValueType, error: sqlx::Error) -> FeatureStoreError {
    FeatureStoreError::decoding(format!(
        "Cannot read column {} as {:?}: {}",
        index, value_type, error
    ))
}
