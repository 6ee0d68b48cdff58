//! # runtara-feature-store
//!
//! Relational query compilation for a geospatial feature store.
//!
//! Tables of a relational database are exposed as feature types: each row is
//! a feature whose id is derived from its primary key and whose attributes
//! are the table's columns, geometry columns included. Abstract queries are
//! compiled to backend SQL through a per-backend [`Dialect`]; whatever the
//! backend cannot evaluate is finished in memory.
//!
//! ## Features
//!
//! - **Filter Splitting**: Filters are split into a part pushed to SQL and a part evaluated over the returned rows
//! - **Dialects**: PostGIS (prepared statements, LIMIT/OFFSET, `ST_*` functions) and a portable generic dialect
//! - **Streaming Reads**: Features are decoded lazily from a server-side cursor
//! - **Counts and Envelopes**: Aggregated in SQL when possible, computed by iteration otherwise
//! - **Feature Identity**: Feature ids round-trip through single and multi-column primary keys
//! - **Table Creation**: CREATE TABLE with spatial indexes and key sequences
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runtara_feature_store::{FeatureStore, Filter, Query, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoreConfig::builder("postgres://localhost/gis").build();
//!     let store = FeatureStore::connect(config).await?;
//!
//!     for name in store.list_type_names().await? {
//!         println!("{}", name);
//!     }
//!
//!     let query = Query::all("roads")
//!         .with_filter(Filter::eq("kind", "primary"))
//!         .with_max_features(10);
//!
//!     let mut reader = store.get_feature_reader(&query).await?;
//!     while let Some(feature) = reader.next().await? {
//!         println!("{} {:?}", feature.id(), feature.default_geometry());
//!     }
//!     reader.close().await;
//!
//!     let count = store.get_count(&Query::all("roads")).await?;
//!     let bounds = store.get_envelope(&Query::all("roads")).await?;
//!     println!("{} roads within {:?}", count, bounds);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use runtara_feature_store::StoreConfig;
//!
//! let config = StoreConfig::builder("postgres://localhost/gis")
//!     .database_schema("public")     // Namespace of the feature tables
//!     .fetch_size(500)               // Rows per cursor fetch; 0 reads everything at once
//!     .primary_key_column("fid")     // Key column of created tables
//!     .strict_identity(true)         // Reject feature ids that don't match the key types
//!     .build();
//! ```
//!
//! ## Readers
//!
//! A [`FeatureReader`] owns a connection until it is exhausted or closed.
//! Close readers you stop reading early; a dropped reader still releases its
//! connection, but logs a warning.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod dialect;
pub mod error;
pub mod feature;
pub mod filter;
pub mod geometry;
pub mod identity;
pub mod query;
pub mod reader;
pub mod schema;
pub mod sql;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use catalog::DiscoveryState;
pub use config::{StoreConfig, StoreConfigBuilder};
pub use dialect::{Dialect, GenericDialect, PostgisDialect};
pub use error::{FeatureStoreError, Result};
pub use feature::Feature;
pub use filter::{ComparisonOp, Expr, Filter, FunctionRegistry, SpatialOp};
pub use geometry::Envelope;
pub use identity::IdentityCodec;
pub use query::{Query, QueryHints, SortBy, SortOrder};
pub use reader::FeatureReader;
pub use schema::{FeatureSchema, KeyKind, PrimaryKey, PrimaryKeyColumn};
pub use store::FeatureStore;
pub use types::{AttributeDescriptor, GeometryKind, Value, ValueType};

// Re-export SQL utilities for advanced users
pub use sql::{DdlGenerator, StatementCompiler, quote_identifier, validate_identifier};
