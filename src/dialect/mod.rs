//! SQL dialects
//!
//! A [`Dialect`] is the per-backend policy object consulted by the statement
//! compiler: type mappings, identifier quoting, geometry encoding, literal and
//! placeholder syntax, pagination and DDL hooks. Dialects hold no mutable
//! state and are shared across every connection of a store.
//!
//! Operations without a sensible backend implementation return
//! [`FeatureStoreError::Unsupported`]; callers test the matching capability
//! flag (e.g. [`Dialect::is_limit_offset_supported`]) before calling them.

pub mod generic;
pub mod postgis;

use std::fmt;

use geo::Geometry;

use crate::backend::ResultRow;
use crate::error::{FeatureStoreError, Result};
use crate::filter::{Capabilities, SpatialOp};
use crate::geometry::{self, Envelope};
use crate::schema::FeatureSchema;
use crate::sql::sanitize;
use crate::types::{AttributeDescriptor, Value, ValueType};

pub use generic::GenericDialect;
pub use postgis::PostgisDialect;

/// How statement values reach the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementStyle {
    /// Values are inlined into the SQL text as literals
    Plain,
    /// Values are bound to placeholders
    Prepared,
}

/// A backend column type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlType {
    pub name: String,
    /// Whether the type takes a length, e.g. `VARCHAR(n)`
    pub sized: bool,
}

impl SqlType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sized: false,
        }
    }

    pub fn sized(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sized: true,
        }
    }
}

fn unsupported<T>(dialect: &str, what: &str) -> Result<T> {
    Err(FeatureStoreError::unsupported(format!(
        "{} dialect does not support {}",
        dialect, what
    )))
}

/// Per-backend SQL policy
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    fn statement_style(&self) -> StatementStyle;

    /// Filter operators and functions the backend evaluates natively
    fn capabilities(&self) -> &Capabilities;

    // ------------------------------------------------------------------
    // Identifiers and types
    // ------------------------------------------------------------------

    /// Quote an identifier; quoting an already quoted identifier is a no-op
    fn quote_identifier(&self, name: &str) -> String {
        sanitize::quote_identifier(name)
    }

    /// Column type for an attribute type, `None` when the backend has none
    fn map_type(&self, value_type: &ValueType) -> Option<SqlType>;

    /// Attribute type for a backend type name, `None` when not representable
    fn map_sql_type(&self, type_name: &str) -> Option<ValueType>;

    // ------------------------------------------------------------------
    // Geometry columns
    // ------------------------------------------------------------------

    /// Wrap a (quoted) geometry column so it is returned in a transportable form
    fn encode_geometry_column(&self, column: &str, attribute: &AttributeDescriptor) -> String;

    /// Whether the generalized and simplified encodings are available
    fn supports_generalization(&self) -> bool {
        false
    }

    fn encode_generalized_geometry_column(
        &self,
        _column: &str,
        _attribute: &AttributeDescriptor,
        _distance: f64,
    ) -> Result<String> {
        unsupported(self.name(), "geometry generalization")
    }

    fn encode_simplified_geometry_column(
        &self,
        _column: &str,
        _attribute: &AttributeDescriptor,
        _distance: f64,
    ) -> Result<String> {
        unsupported(self.name(), "geometry simplification")
    }

    /// Whether [`Dialect::encode_geometry_envelope`] is implemented
    fn supports_envelope_aggregate(&self) -> bool {
        false
    }

    /// Aggregate expression computing the envelope of a (quoted) geometry column
    fn encode_geometry_envelope(&self, _column: &str, _attribute: &AttributeDescriptor) -> Result<String> {
        unsupported(self.name(), "envelope aggregation")
    }

    /// Read one envelope aggregate cell; reads no other cell
    fn decode_geometry_envelope(
        &self,
        _row: &dyn ResultRow,
        _index: usize,
        _attribute: &AttributeDescriptor,
    ) -> Result<Option<Envelope>> {
        unsupported(self.name(), "envelope aggregation")
    }

    /// Read one geometry cell produced by [`Dialect::encode_geometry_column`]
    fn decode_geometry_value(
        &self,
        _attribute: &AttributeDescriptor,
        row: &dyn ResultRow,
        index: usize,
    ) -> Result<Option<Geometry<f64>>> {
        match row.get(index, &ValueType::String)? {
            Value::Null => Ok(None),
            Value::Text(wkt) if wkt.is_empty() => Ok(None),
            Value::Text(wkt) => geometry::from_wkt(&wkt).map(Some),
            other => Err(FeatureStoreError::decoding(format!(
                "Expected WKT text for a geometry column, got {}",
                other.type_name()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Literal SQL for a value (plain statements)
    fn encode_value(&self, value: &Value) -> Result<String> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Double(d) if d.is_finite() => d.to_string(),
            Value::Double(d) => {
                return Err(FeatureStoreError::invalid_filter(format!(
                    "Cannot encode non-finite number {}",
                    d
                )));
            }
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) => quote_literal(s),
            Value::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
            Value::Binary(bytes) => format!("X'{}'", value_hex(bytes)),
            Value::Json(json) => quote_literal(&json.to_string()),
            Value::Geometry(g) => self.encode_geometry_value(g, None),
        })
    }

    /// Literal SQL for a geometry (plain statements)
    fn encode_geometry_value(&self, geometry: &Geometry<f64>, _srid: Option<i32>) -> String {
        quote_literal(&geometry::to_wkt(geometry))
    }

    /// Placeholder for the 1-based parameter `index` (prepared statements)
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Wrap a geometry placeholder so the backend builds a geometry from it
    fn prepare_geometry_value(&self, placeholder: &str, _srid: Option<i32>) -> String {
        placeholder.to_string()
    }

    /// Wrap a placeholder so the backend reads it as `value_type`
    fn prepare_value(&self, placeholder: &str, _value_type: &ValueType) -> String {
        placeholder.to_string()
    }

    /// Value actually bound for a non-geometry parameter
    fn bind_value(&self, value: &Value, _value_type: &ValueType) -> Value {
        value.clone()
    }

    /// Value actually bound for a geometry parameter
    fn bind_geometry_value(&self, geometry: &Geometry<f64>, _srid: Option<i32>) -> Value {
        Value::Text(geometry::to_wkt(geometry))
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    /// SQL for a spatial predicate between a column and an encoded geometry
    fn spatial_predicate_sql(&self, op: SpatialOp, _column: &str, _geometry: &str) -> Result<String> {
        unsupported(self.name(), &format!("spatial operator {}", op.name()))
    }

    /// SQL for a call of a named filter function over encoded arguments
    fn function_sql(&self, name: &str, _args: &[String]) -> Result<String> {
        unsupported(self.name(), &format!("function {}", name))
    }

    /// SQL for a LIKE match; `pattern` is already an encoded value
    fn like_sql(&self, expr: &str, pattern: &str, match_case: bool) -> String {
        if match_case {
            format!("{} LIKE {} ESCAPE '\\'", expr, pattern)
        } else {
            format!("UPPER({}) LIKE UPPER({}) ESCAPE '\\'", expr, pattern)
        }
    }

    // ------------------------------------------------------------------
    // Pagination
    // ------------------------------------------------------------------

    fn is_limit_offset_supported(&self) -> bool {
        false
    }

    /// Append pagination to a statement; only called when supported
    fn apply_limit_offset(&self, _sql: &mut String, _limit: Option<u64>, _offset: u64) -> Result<()> {
        unsupported(self.name(), "LIMIT/OFFSET")
    }

    // ------------------------------------------------------------------
    // DDL hooks, in the order they are applied
    // ------------------------------------------------------------------

    /// Definition of the key column emitted first in CREATE TABLE
    fn encode_primary_key(&self, column: &str) -> String {
        format!("{} INTEGER PRIMARY KEY", self.quote_identifier(column))
    }

    /// Text appended after a column definition
    fn encode_post_column_create_table(&self, _attribute: &AttributeDescriptor) -> String {
        String::new()
    }

    /// Text appended after the closing parenthesis of CREATE TABLE
    fn encode_post_create_table(&self, _schema: &FeatureSchema) -> String {
        String::new()
    }

    /// Statements run right after the table is created (sequences, indexes)
    ///
    /// Objects created here belong in `namespace`, like the table.
    fn post_create_table_statements(
        &self,
        _namespace: Option<&str>,
        _qualified_table: &str,
        _schema: &FeatureSchema,
        _key_column: &str,
    ) -> Vec<String> {
        Vec::new()
    }

    // ------------------------------------------------------------------
    // Key generation and discovery
    // ------------------------------------------------------------------

    /// Query returning the next value of a sequence, `None` without sequences
    fn next_sequence_value_sql(&self, _sequence: &str) -> Option<String> {
        None
    }

    /// Query returning the next generated key value, `None` without identity columns
    fn next_auto_generated_value_sql(&self, _table: &str, _column: &str) -> Option<String> {
        None
    }

    /// Query listing (table, column, srid, geometry type) for geometry columns
    fn geometry_metadata_sql(&self, _namespace: Option<&str>) -> Option<String> {
        None
    }

    /// Whether a discovered table is exposed as a feature type
    fn include_table(&self, _table: &str) -> bool {
        true
    }
}

/// Quote a string literal, doubling embedded single quotes
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn value_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
