//! Feature type discovery and the schema cache
//!
//! The first call needing a schema runs one discovery pass over the backend
//! catalog and caches the result as a [`Catalog`]. Concurrent first callers
//! wait on the in-flight pass instead of starting their own. The cache stays
//! valid until [`CatalogCache::reset`], which the store calls after creating a
//! table.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use regex::Regex;
use tokio::sync::Mutex;

use crate::backend::{ColumnMetadata, Connection, ResultRow, TableMetadata};
use crate::config::StoreConfig;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::schema::{FeatureSchema, KeyKind, PrimaryKey, PrimaryKeyColumn};
use crate::types::{AttributeDescriptor, GeometryKind, Value, ValueType};

static SEQUENCE_DEFAULT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"nextval\('([^']+)'").ok());

/// Observable discovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Uninitialized,
    Discovering,
    Ready,
}

/// Schema and primary key of one feature type
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub schema: Arc<FeatureSchema>,
    pub key: Arc<PrimaryKey>,
}

/// Every discovered feature type, by name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entry(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build feature types from backend table metadata
    ///
    /// Key columns become the [`PrimaryKey`] and are left out of the schema
    /// unless `expose_primary_keys` is set. Columns whose type the dialect
    /// cannot represent are skipped.
    pub fn build(dialect: &dyn Dialect, tables: Vec<TableMetadata>, config: &StoreConfig) -> Self {
        let mut entries = BTreeMap::new();
        for table in tables {
            if !dialect.include_table(&table.name) {
                continue;
            }
            let key = primary_key(dialect, &table);

            let mut attributes = Vec::new();
            for column in &table.columns {
                if !config.expose_primary_keys && key.column(&column.name).is_some() {
                    continue;
                }
                match attribute(dialect, column) {
                    Some(attr) => attributes.push(attr),
                    None => tracing::debug!(
                        table = %table.name,
                        column = %column.name,
                        type_name = %column.type_name,
                        "Skipping column with unsupported type"
                    ),
                }
            }

            let schema = FeatureSchema::new(table.name.clone(), attributes);
            entries.insert(
                table.name,
                CatalogEntry {
                    schema: Arc::new(schema),
                    key: Arc::new(key),
                },
            );
        }
        Self { entries }
    }
}

fn primary_key(dialect: &dyn Dialect, table: &TableMetadata) -> PrimaryKey {
    let columns = table
        .primary_key
        .iter()
        .filter_map(|name| table.columns.iter().find(|c| &c.name == name))
        .map(|column| {
            let value_type = dialect
                .map_sql_type(&column.type_name)
                .unwrap_or(ValueType::String);
            PrimaryKeyColumn::new(column.name.clone(), value_type).with_kind(key_kind(column))
        })
        .collect();
    PrimaryKey::new(table.name.clone(), columns)
}

fn key_kind(column: &ColumnMetadata) -> KeyKind {
    if column.is_identity {
        return KeyKind::AutoGenerated;
    }
    let sequence = column.default.as_deref().and_then(|default| {
        SEQUENCE_DEFAULT
            .as_ref()?
            .captures(default)
            .map(|c| c[1].to_string())
    });
    match sequence {
        Some(name) => KeyKind::Sequence(name),
        None => KeyKind::Assigned,
    }
}

fn attribute(dialect: &dyn Dialect, column: &ColumnMetadata) -> Option<AttributeDescriptor> {
    let mut value_type = dialect.map_sql_type(&column.type_name)?;
    if let ValueType::Geometry { kind } = &mut value_type
        && let Some(declared) = column
            .geometry_type
            .as_deref()
            .and_then(GeometryKind::from_ogc_name)
    {
        *kind = declared;
    }

    let mut attr = AttributeDescriptor::new(column.name.clone(), value_type);
    attr.nullable = column.nullable;
    attr.length = column.length;
    if let Some(srid) = column.srid.filter(|srid| *srid > 0) {
        attr.srid = Some(srid);
        attr.crs = Some(format!("EPSG:{}", srid));
    }
    Some(attr)
}

/// Read the backend catalog through an open connection
///
/// Geometry column metadata, when the dialect can list it, fills in SRIDs
/// and geometry types.
pub(crate) async fn discover<C: Connection>(
    connection: &mut C,
    dialect: &dyn Dialect,
    config: &StoreConfig,
) -> Result<Catalog> {
    let namespace = config.database_schema.as_deref();
    let mut tables = connection.describe_tables(namespace).await?;

    if let Some(sql) = dialect.geometry_metadata_sql(namespace) {
        let mut geometry: HashMap<(String, String), (Option<i32>, Option<String>)> = HashMap::new();
        for row in connection.query(&sql, &[]).await? {
            let (Value::Text(table), Value::Text(column)) =
                (row.get(0, &ValueType::String)?, row.get(1, &ValueType::String)?)
            else {
                continue;
            };
            let srid = match row.get(2, &ValueType::Integer)? {
                Value::Integer(srid) => i32::try_from(srid).ok(),
                _ => None,
            };
            let kind = match row.get(3, &ValueType::String)? {
                Value::Text(kind) => Some(kind),
                _ => None,
            };
            geometry.insert((table, column), (srid, kind));
        }

        for table in &mut tables {
            for column in &mut table.columns {
                if let Some((srid, kind)) = geometry.remove(&(table.name.clone(), column.name.clone())) {
                    column.srid = srid;
                    column.geometry_type = kind;
                }
            }
        }
    }

    Ok(Catalog::build(dialect, tables, config))
}

enum CacheState {
    Uninitialized,
    Discovering,
    Ready(Arc<Catalog>),
}

/// Lazily discovered catalog shared by every call on a store
pub(crate) struct CatalogCache {
    state: RwLock<(CacheState, u64)>,
    discovery: Mutex<()>,
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self {
            state: RwLock::new((CacheState::Uninitialized, 0)),
            discovery: Mutex::new(()),
        }
    }
}

impl CatalogCache {
    pub(crate) fn state(&self) -> DiscoveryState {
        match &self.state.read().unwrap_or_else(PoisonError::into_inner).0 {
            CacheState::Uninitialized => DiscoveryState::Uninitialized,
            CacheState::Discovering => DiscoveryState::Discovering,
            CacheState::Ready(_) => DiscoveryState::Ready,
        }
    }

    fn ready(&self) -> Option<Arc<Catalog>> {
        match &self.state.read().unwrap_or_else(PoisonError::into_inner).0 {
            CacheState::Ready(catalog) => Some(Arc::clone(catalog)),
            _ => None,
        }
    }

    /// The cached catalog, running `discover` if there is none yet
    pub(crate) async fn get_or_discover<F, Fut>(&self, discover: F) -> Result<Arc<Catalog>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Catalog>>,
    {
        if let Some(catalog) = self.ready() {
            return Ok(catalog);
        }

        let _guard = self.discovery.lock().await;
        if let Some(catalog) = self.ready() {
            return Ok(catalog);
        }

        let generation = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.0 = CacheState::Discovering;
            state.1
        };

        let result = discover().await;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(catalog) => {
                let catalog = Arc::new(catalog);
                // A reset during discovery means the result may already be stale
                if state.1 == generation {
                    state.0 = CacheState::Ready(Arc::clone(&catalog));
                }
                Ok(catalog)
            }
            Err(e) => {
                if state.1 == generation {
                    state.0 = CacheState::Uninitialized;
                }
                Err(e)
            }
        }
    }

    /// Drop the cached catalog; the next access rediscovers
    pub(crate) fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.0 = CacheState::Uninitialized;
        state.1 += 1;
    }
}
