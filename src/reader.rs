//! Streaming feature reads
//!
//! A [`FeatureReader`] owns the connection its query runs on. Rows come from
//! a server-side cursor in batches of the configured fetch size (or all at
//! once when the fetch size is not positive), are decoded into features,
//! filtered in memory by the post-filter and paged when paging could not be
//! pushed to the backend.
//!
//! Callers must [`close`](FeatureReader::close) a reader they stop reading
//! early. A reader dropped while still holding its connection logs a warning
//! and releases the connection on a background task.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::{Connection, ResultRow, close_quietly};
use crate::dialect::Dialect;
use crate::error::{FeatureStoreError, Result};
use crate::feature::Feature;
use crate::filter::{Filter, FilterEvaluator, FunctionRegistry};
use crate::identity::IdentityCodec;
use crate::query::Paging;
use crate::schema::{FeatureSchema, PrimaryKey};
use crate::sql::Statement;
use crate::types::Value;

/// Everything a reader needs besides its connection
pub(crate) struct ReadPlan {
    pub statement: Statement,
    /// Attributes selected after the key columns, in column order
    pub fetched: Arc<FeatureSchema>,
    /// Attributes of the features handed out
    pub output: Arc<FeatureSchema>,
    pub key: Arc<PrimaryKey>,
    pub post: Filter,
    /// Paging applied in memory after the post-filter
    pub paging: Option<Paging>,
}

/// Lazy, forward-only sequence of features
pub struct FeatureReader<C: Connection + 'static> {
    connection: Option<C>,
    cursor: Option<String>,
    fetch_size: i64,
    buffer: VecDeque<C::Row>,
    exhausted: bool,
    dialect: Arc<dyn Dialect>,
    codec: IdentityCodec,
    fetched: Arc<FeatureSchema>,
    output: Arc<FeatureSchema>,
    key: Arc<PrimaryKey>,
    post: Filter,
    evaluator: FilterEvaluator,
    skip: u64,
    remaining: Option<u64>,
}

impl<C: Connection + 'static> FeatureReader<C> {
    /// Start the query; the connection is released if that fails
    pub(crate) async fn open(
        mut connection: C,
        plan: ReadPlan,
        dialect: Arc<dyn Dialect>,
        codec: IdentityCodec,
        functions: FunctionRegistry,
        fetch_size: i64,
    ) -> Result<Self> {
        let params = plan.statement.bind_values(dialect.as_ref());
        let cursor = (fetch_size > 0).then(|| format!("features_{}", uuid::Uuid::new_v4().simple()));

        tracing::debug!(
            sql = %plan.statement.sql,
            params = params.len(),
            cursor = cursor.is_some(),
            "Opening feature reader"
        );

        let started = async {
            connection.set_auto_commit(false).await?;
            match &cursor {
                Some(name) => {
                    connection
                        .open_cursor(name, &plan.statement.sql, &params)
                        .await?;
                    Ok::<_, FeatureStoreError>(VecDeque::new())
                }
                None => Ok(connection
                    .query(&plan.statement.sql, &params)
                    .await?
                    .into_iter()
                    .collect::<VecDeque<_>>()),
            }
        }
        .await;

        let buffer = match started {
            Ok(buffer) => buffer,
            Err(e) => {
                close_quietly(connection).await;
                return Err(e);
            }
        };

        let (skip, remaining) = match plan.paging {
            Some(paging) => (paging.offset, paging.limit),
            None => (0, None),
        };

        Ok(Self {
            exhausted: cursor.is_none(),
            connection: Some(connection),
            cursor,
            fetch_size,
            buffer,
            dialect,
            codec,
            fetched: plan.fetched,
            output: plan.output,
            key: plan.key,
            post: plan.post,
            evaluator: FilterEvaluator::new(functions),
            skip,
            remaining,
        })
    }

    /// Schema of the features this reader returns
    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.output
    }

    /// Whether the connection has been released
    pub fn is_closed(&self) -> bool {
        self.connection.is_none()
    }

    /// The next feature, or `None` once the sequence is exhausted
    ///
    /// Exhaustion releases the connection. After an error the reader should
    /// still be closed.
    pub async fn next(&mut self) -> Result<Option<Feature>> {
        loop {
            if self.remaining == Some(0) {
                self.release().await;
                return Ok(None);
            }

            let Some(row) = self.next_row().await? else {
                self.release().await;
                return Ok(None);
            };
            let feature = self.decode(&row)?;

            if !self.post.is_include() && !self.evaluator.matches(&self.post, &feature)? {
                continue;
            }
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Ok(Some(feature.retype(&self.output)));
        }
    }

    /// Read every remaining feature and close the reader
    pub async fn collect(mut self) -> Result<Vec<Feature>> {
        let mut features = Vec::new();
        let result = loop {
            match self.next().await {
                Ok(Some(feature)) => features.push(feature),
                Ok(None) => break Ok(features),
                Err(e) => break Err(e),
            }
        };
        self.close().await;
        result
    }

    /// Release the connection; never fails
    pub async fn close(mut self) {
        self.release().await;
    }

    async fn next_row(&mut self) -> Result<Option<C::Row>> {
        while self.buffer.is_empty() && !self.exhausted {
            let (Some(connection), Some(cursor)) = (self.connection.as_mut(), self.cursor.as_deref()) else {
                self.exhausted = true;
                break;
            };
            let rows = connection.fetch(cursor, self.fetch_size).await?;
            if rows.is_empty() {
                self.exhausted = true;
            }
            self.buffer.extend(rows);
        }
        Ok(self.buffer.pop_front())
    }

    fn decode(&self, row: &C::Row) -> Result<Feature> {
        let key_len = self.key.len();
        let expected = key_len + self.fetched.attributes.len();
        if row.column_count() < expected {
            return Err(FeatureStoreError::decoding(format!(
                "Expected {} columns, row has {}",
                expected,
                row.column_count()
            )));
        }

        let key_values = self
            .key
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| row.get(i, &column.value_type))
            .collect::<Result<Vec<_>>>()?;
        let id = self.codec.encode(&self.key, &key_values)?;

        let mut values = Vec::with_capacity(self.fetched.attributes.len());
        for (offset, attr) in self.fetched.attributes.iter().enumerate() {
            let index = key_len + offset;
            let value = if attr.is_geometry() {
                self.dialect
                    .decode_geometry_value(attr, row, index)?
                    .map_or(Value::Null, Value::Geometry)
            } else {
                row.get(index, &attr.value_type)?
            };
            values.push(value);
        }

        Ok(Feature::new(id, Arc::clone(&self.fetched), values))
    }

    async fn release(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        self.buffer.clear();
        self.exhausted = true;
        if let Some(cursor) = self.cursor.take()
            && let Err(e) = connection.close_cursor(&cursor).await
        {
            tracing::debug!(cursor = %cursor, error = %e, "Failed to close cursor");
        }
        close_quietly(connection).await;
    }
}

impl<C: Connection + 'static> Drop for FeatureReader<C> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        tracing::warn!(
            type_name = %self.output.name,
            "Feature reader dropped without being closed; releasing its connection"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_quietly(connection));
            }
            Err(_) => drop(connection),
        }
    }
}

impl<C: Connection + 'static> std::fmt::Debug for FeatureReader<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureReader")
            .field("type_name", &self.output.name)
            .field("cursor", &self.cursor)
            .field("closed", &self.is_closed())
            .finish()
    }
}
