//! FeatureStore - Main entry point for reading and creating feature types
//!
//! This module provides the [`FeatureStore`] struct that exposes the tables of
//! a relational database as feature types. Reads are compiled to SQL as far as
//! the dialect allows; whatever the backend cannot evaluate (filters, paging,
//! envelopes) is finished in memory over the rows it returns.

use std::collections::BTreeSet;
use std::sync::Arc;

use sqlx::PgPool;

use crate::backend::{
    Connection, ConnectionSource, PgConnectionSource, ResultRow, close_quietly,
};
use crate::catalog::{self, Catalog, CatalogCache, CatalogEntry, DiscoveryState};
use crate::config::StoreConfig;
use crate::dialect::{Dialect, PostgisDialect};
use crate::error::{FeatureStoreError, Result, ResultExt};
use crate::filter::{Filter, FilterSplitter, FunctionRegistry, SplitFilter};
use crate::geometry::Envelope;
use crate::identity::IdentityCodec;
use crate::query::{Paging, Query};
use crate::reader::{FeatureReader, ReadPlan};
use crate::schema::{FeatureSchema, KeyKind, PrimaryKey};
use crate::sql::{CountStatement, DdlGenerator, StatementCompiler, qualify_table};
use crate::types::{AttributeDescriptor, Value, ValueType};

/// Feature store over a relational database
///
/// Feature types are discovered from the database catalog on first use and
/// cached until [`reset_cache`](FeatureStore::reset_cache) or a successful
/// [`create_schema`](FeatureStore::create_schema). Every operation acquires
/// its own connection and releases it before returning, except readers,
/// which hold theirs until they are exhausted or closed.
pub struct FeatureStore<S: ConnectionSource = PgConnectionSource> {
    /// Connection source
    source: S,
    /// SQL policy of the backend
    dialect: Arc<dyn Dialect>,
    /// Store configuration
    config: StoreConfig,
    codec: IdentityCodec,
    /// Functions available to in-memory filtering
    functions: FunctionRegistry,
    catalog: CatalogCache,
}

impl FeatureStore<PgConnectionSource> {
    /// Create a new FeatureStore over PostGIS from configuration
    ///
    /// This will:
    /// 1. Connect a pool of up to `max_connections` connections
    /// 2. Use the PostGIS dialect for every statement
    ///
    /// Feature types are not discovered until the first call that needs them.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let source = PgConnectionSource::connect(&config).await?;
        Ok(Self::with_source(source, PostgisDialect::new(), config))
    }

    /// Create a new FeatureStore over PostGIS from an existing pool
    ///
    /// Use this when you already have a connection pool and want to
    /// share it with the feature store.
    pub fn from_pool(pool: PgPool, config: StoreConfig) -> Self {
        Self::with_source(
            PgConnectionSource::from_pool(pool),
            PostgisDialect::new(),
            config,
        )
    }
}

impl<S: ConnectionSource> FeatureStore<S> {
    /// Create a store over any connection source and dialect
    pub fn with_source<D: Dialect + 'static>(source: S, dialect: D, config: StoreConfig) -> Self {
        Self {
            source,
            dialect: Arc::new(dialect),
            codec: IdentityCodec::new(config.strict_identity),
            config,
            functions: FunctionRegistry::default(),
            catalog: CatalogCache::default(),
        }
    }

    /// Replace the functions available to in-memory filtering
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Whether feature types have been discovered yet
    pub fn discovery_state(&self) -> DiscoveryState {
        self.catalog.state()
    }

    /// Forget discovered feature types; the next call rediscovers them
    pub fn reset_cache(&self) {
        self.catalog.reset();
    }

    // =========================================================================
    // Schema Operations
    // =========================================================================

    /// Names of every feature type
    pub async fn list_type_names(&self) -> Result<BTreeSet<String>> {
        let catalog = self.catalog().await?;
        Ok(catalog.names().map(str::to_string).collect())
    }

    /// Schema of a feature type
    pub async fn get_schema(&self, type_name: &str) -> Result<Arc<FeatureSchema>> {
        let catalog = self.catalog().await?;
        Ok(Arc::clone(&lookup(&catalog, type_name)?.schema))
    }

    /// Primary key of a feature type
    pub async fn primary_key(&self, type_name: &str) -> Result<Arc<PrimaryKey>> {
        let catalog = self.catalog().await?;
        Ok(Arc::clone(&lookup(&catalog, type_name)?.key))
    }

    /// Create a table for a new feature type
    ///
    /// This will:
    /// 1. Generate the DDL, failing before any backend call if a type has no mapping
    /// 2. Check the name against the discovered feature types
    /// 3. Run CREATE TABLE and the dialect's follow-up statements
    /// 4. Drop the cached catalog so the new type is discovered
    pub async fn create_schema(&self, schema: &FeatureSchema) -> Result<()> {
        let ddl = DdlGenerator::new(self.dialect.as_ref(), &self.config).create_table(schema)?;

        let catalog = self.catalog().await?;
        if catalog.contains(&schema.name) {
            return Err(FeatureStoreError::conflict(format!(
                "Feature type '{}' already exists",
                schema.name
            )));
        }

        let mut connection = self
            .source
            .acquire()
            .await
            .context("error creating table")?;
        let result = async {
            for sql in ddl.statements() {
                tracing::debug!(sql = %sql, "Executing DDL");
                connection.execute(sql, &[]).await?;
            }
            Ok::<_, FeatureStoreError>(())
        }
        .await;
        close_quietly(connection).await;

        // Statements that did run may already have changed the catalog
        self.reset_cache();
        result.context("error creating table")?;

        tracing::info!(type_name = %schema.name, "Created feature type");
        Ok(())
    }

    /// Altering feature types is not supported
    pub async fn update_schema(&self, type_name: &str, _schema: &FeatureSchema) -> Result<()> {
        Err(FeatureStoreError::unsupported(format!(
            "updating feature type '{}' is not supported",
            type_name
        )))
    }

    /// Dropping feature types is not supported
    pub async fn delete_schema(&self, type_name: &str) -> Result<()> {
        Err(FeatureStoreError::unsupported(format!(
            "deleting feature type '{}' is not supported",
            type_name
        )))
    }

    /// Next value of a generated single-column primary key
    ///
    /// Returns `None` for assigned or multi-column keys and for dialects
    /// without key generation.
    pub async fn next_primary_key_value(&self, type_name: &str) -> Result<Option<Value>> {
        let catalog = self.catalog().await?;
        let entry = lookup(&catalog, type_name)?;
        let [column] = entry.key.columns.as_slice() else {
            return Ok(None);
        };

        let sql = match &column.kind {
            KeyKind::Sequence(sequence) => self.dialect.next_sequence_value_sql(sequence),
            KeyKind::AutoGenerated => {
                let table = qualify_table(
                    self.config.database_schema.as_deref(),
                    &entry.key.table,
                    |name| self.dialect.quote_identifier(name),
                );
                self.dialect.next_auto_generated_value_sql(&table, &column.name)
            }
            KeyKind::Assigned => None,
        };
        let Some(sql) = sql else {
            return Ok(None);
        };

        let mut connection = self
            .source
            .acquire()
            .await
            .context("error generating key value")?;
        tracing::debug!(sql = %sql, "Generating key value");
        let result = async {
            let rows = connection.query(&sql, &[]).await?;
            match rows.first() {
                Some(row) => row.get(0, &column.value_type),
                None => Ok(Value::Null),
            }
        }
        .await;
        close_quietly(connection).await;

        match result.context("error generating key value")? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Open a reader over the features matching a query
    ///
    /// The reader owns a connection until it is exhausted or closed.
    pub async fn get_feature_reader(&self, query: &Query) -> Result<FeatureReader<S::Connection>> {
        self.read(query).await.context("error reading features")
    }

    /// Number of features matching a query, after paging
    pub async fn get_count(&self, query: &Query) -> Result<u64> {
        let catalog = self.catalog().await?;
        let entry = lookup(&catalog, &query.type_name)?;
        let split = self.split(entry, &query.filter)?;

        if split.requires_post_filter() {
            tracing::debug!(
                type_name = %query.type_name,
                "Counting by iteration; part of the filter runs in memory"
            );
            return self
                .count_by_iteration(query)
                .await
                .context("error computing count");
        }

        let paging = query.paging();
        let statement = self.compiler(entry).count(&split.pre, &query.sort, paging)?;
        let mut connection = self
            .source
            .acquire()
            .await
            .context("error computing count")?;
        let result = self.run_count(&mut connection, statement, paging).await;
        close_quietly(connection).await;
        result.context("error computing count")
    }

    /// Bounds of the geometries of the features matching a query
    ///
    /// Types without geometry attributes have an empty envelope.
    pub async fn get_envelope(&self, query: &Query) -> Result<Envelope> {
        let catalog = self.catalog().await?;
        let entry = lookup(&catalog, &query.type_name)?;
        let geometries: Vec<AttributeDescriptor> =
            entry.schema.geometry_attributes().cloned().collect();
        if geometries.is_empty() {
            return Ok(Envelope::empty());
        }

        let mut envelope = match entry.schema.default_geometry().and_then(|g| g.crs.clone()) {
            Some(crs) => Envelope::empty().with_crs(crs),
            None => Envelope::empty(),
        };

        let split = self.split(entry, &query.filter)?;
        let paging = query.paging();
        let aggregate = !split.requires_post_filter()
            && self.dialect.supports_envelope_aggregate()
            && (paging.is_none() || self.dialect.is_limit_offset_supported());

        if !aggregate {
            tracing::debug!(type_name = %query.type_name, "Computing bounds by iteration");
            self.bounds_by_iteration(query, &geometries, &mut envelope)
                .await
                .context("error computing bounds")?;
            return Ok(envelope);
        }

        let statement = self.compiler(entry).bounds(&split.pre, &query.sort, paging)?;
        let mut connection = self
            .source
            .acquire()
            .await
            .context("error computing bounds")?;
        tracing::debug!(sql = %statement.sql, "Computing bounds");
        let result = async {
            let rows = connection
                .query(&statement.sql, &statement.bind_values(self.dialect.as_ref()))
                .await?;
            if let Some(row) = rows.first() {
                for (index, attribute) in geometries.iter().enumerate() {
                    if let Some(bounds) =
                        self.dialect.decode_geometry_envelope(row, index, attribute)?
                    {
                        envelope.expand_to_include_envelope(&bounds);
                    }
                }
            }
            Ok::<_, FeatureStoreError>(())
        }
        .await;
        close_quietly(connection).await;

        result.context("error computing bounds")?;
        Ok(envelope)
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    async fn catalog(&self) -> Result<Arc<Catalog>> {
        self.catalog
            .get_or_discover(|| async {
                let mut connection = self.source.acquire().await?;
                let result =
                    catalog::discover(&mut connection, self.dialect.as_ref(), &self.config).await;
                close_quietly(connection).await;

                let catalog = result?;
                tracing::info!(feature_types = catalog.len(), "Discovered feature types");
                Ok(catalog)
            })
            .await
            .context("error discovering feature types")
    }

    fn split(&self, entry: &CatalogEntry, filter: &Filter) -> Result<SplitFilter> {
        FilterSplitter::new(self.dialect.capabilities())
            .with_schema(&entry.schema)
            .with_primary_key(&entry.key, self.codec)
            .split(filter)
    }

    fn compiler<'a>(&'a self, entry: &'a CatalogEntry) -> StatementCompiler<'a> {
        StatementCompiler::new(
            self.dialect.as_ref(),
            &entry.schema,
            &entry.key,
            self.config.database_schema.as_deref(),
        )
    }

    async fn read(&self, query: &Query) -> Result<FeatureReader<S::Connection>> {
        let catalog = self.catalog().await?;
        let entry = lookup(&catalog, &query.type_name)?;
        let split = self.split(entry, &query.filter)?;
        let (fetched, output) =
            project(&entry.schema, query.properties.as_deref(), &split.post)?;

        // Paging only goes to the backend when it sees every filtered row
        let pushed = query
            .paging()
            .filter(|_| !split.requires_post_filter() && self.dialect.is_limit_offset_supported());
        let emulated = if pushed.is_some() {
            None
        } else {
            query.paging()
        };

        let statement = self.compiler(entry).select(
            &fetched.attributes,
            &split.pre,
            &query.sort,
            pushed,
            &query.hints,
        )?;

        let connection = self.source.acquire().await?;
        FeatureReader::open(
            connection,
            ReadPlan {
                statement,
                fetched,
                output,
                key: Arc::clone(&entry.key),
                post: split.post,
                paging: emulated,
            },
            Arc::clone(&self.dialect),
            self.codec,
            self.functions.clone(),
            self.config.fetch_size,
        )
        .await
    }

    async fn count_by_iteration(&self, query: &Query) -> Result<u64> {
        let counting = query.clone().with_properties(Vec::<String>::new());
        let mut reader = self.read(&counting).await?;
        let mut count = 0;
        let result = loop {
            match reader.next().await {
                Ok(Some(_)) => count += 1,
                Ok(None) => break Ok(count),
                Err(e) => break Err(e),
            }
        };
        reader.close().await;
        result
    }

    async fn run_count(
        &self,
        connection: &mut S::Connection,
        statement: CountStatement,
        paging: Option<Paging>,
    ) -> Result<u64> {
        match statement {
            CountStatement::Aggregate(statement) => {
                tracing::debug!(sql = %statement.sql, "Counting features");
                let rows = connection
                    .query(&statement.sql, &statement.bind_values(self.dialect.as_ref()))
                    .await?;
                let value = match rows.first() {
                    Some(row) => row.get(0, &ValueType::Integer)?,
                    None => Value::Null,
                };
                match value {
                    Value::Null => Ok(0),
                    Value::Integer(n) => u64::try_from(n).map_err(|_| {
                        FeatureStoreError::decoding(format!("Negative feature count {}", n))
                    }),
                    other => Err(FeatureStoreError::decoding(format!(
                        "Expected an integer count, got {}",
                        other.type_name()
                    ))),
                }
            }
            CountStatement::Rows(statement) => {
                tracing::debug!(sql = %statement.sql, "Counting features by rows");
                let rows = connection
                    .query(&statement.sql, &statement.bind_values(self.dialect.as_ref()))
                    .await?;
                Ok(page_len(rows.len() as u64, paging))
            }
        }
    }

    async fn bounds_by_iteration(
        &self,
        query: &Query,
        geometries: &[AttributeDescriptor],
        envelope: &mut Envelope,
    ) -> Result<()> {
        let bounding = query
            .clone()
            .with_properties(geometries.iter().map(|g| g.name.clone()));
        let mut reader = self.read(&bounding).await?;
        let result = loop {
            match reader.next().await {
                Ok(Some(feature)) => {
                    for value in feature.values() {
                        if let Value::Geometry(geometry) = value {
                            envelope.expand_to_include_geometry(geometry);
                        }
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        reader.close().await;
        result
    }
}

fn lookup<'c>(catalog: &'c Catalog, type_name: &str) -> Result<&'c CatalogEntry> {
    catalog
        .entry(type_name)
        .ok_or_else(|| FeatureStoreError::schema_not_found(type_name))
}

/// Fetched and output schemas of a read
///
/// The output holds the requested attributes; the fetched schema adds the
/// ones only the in-memory filter reads.
fn project(
    schema: &Arc<FeatureSchema>,
    properties: Option<&[String]>,
    post: &Filter,
) -> Result<(Arc<FeatureSchema>, Arc<FeatureSchema>)> {
    let output = match properties {
        None => Arc::clone(schema),
        Some(names) => {
            let mut attributes: Vec<AttributeDescriptor> = Vec::with_capacity(names.len());
            for name in names {
                let attribute = schema.attribute(name).ok_or_else(|| {
                    FeatureStoreError::validation(format!(
                        "Feature type '{}' has no attribute '{}'",
                        schema.name, name
                    ))
                })?;
                if !attributes.iter().any(|a| a.name == attribute.name) {
                    attributes.push(attribute.clone());
                }
            }
            Arc::new(FeatureSchema::new(schema.name.clone(), attributes))
        }
    };

    let extra: Vec<AttributeDescriptor> = post
        .properties()
        .into_iter()
        .filter(|name| output.attribute(name).is_none())
        .filter_map(|name| schema.attribute(name).cloned())
        .collect();
    if extra.is_empty() {
        return Ok((Arc::clone(&output), output));
    }

    let mut attributes = output.attributes.clone();
    attributes.extend(extra);
    let fetched = Arc::new(FeatureSchema::new(schema.name.clone(), attributes));
    Ok((fetched, output))
}

/// Rows left of `total` after applying paging
fn page_len(total: u64, paging: Option<Paging>) -> u64 {
    match paging {
        None => total,
        Some(paging) => {
            let after_offset = total.saturating_sub(paging.offset);
            paging.limit.map_or(after_offset, |limit| after_offset.min(limit))
        }
    }
}
