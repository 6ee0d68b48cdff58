//! Generic SQL dialect: plain statements, ANSI types, WKT stored as text
//!
//! Targets backends with no spatial extension and no LIMIT/OFFSET syntax.
//! Geometry columns hold WKT, envelopes are computed by iterating features,
//! and keys come from a sequence created alongside the table.

use super::{Dialect, SqlType, StatementStyle};
use crate::filter::{Capabilities, Operator};
use crate::schema::FeatureSchema;
use crate::sql::qualify_table;
use crate::types::{AttributeDescriptor, GeometryKind, ValueType};

#[derive(Debug, Clone)]
pub struct GenericDialect {
    capabilities: Capabilities,
}

impl Default for GenericDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericDialect {
    pub fn new() -> Self {
        let capabilities = Capabilities::base()
            .with(Operator::IsNull)
            .with(Operator::Between);
        Self { capabilities }
    }

    fn sequence_name(table: &str, key_column: &str) -> String {
        format!("{}_{}_seq", table, key_column)
    }
}

impl Dialect for GenericDialect {
    fn name(&self) -> &str {
        "Generic"
    }

    fn statement_style(&self) -> StatementStyle {
        StatementStyle::Plain
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// JSON documents have no portable column type
    fn map_type(&self, value_type: &ValueType) -> Option<SqlType> {
        Some(match value_type {
            ValueType::String => SqlType::sized("VARCHAR"),
            ValueType::Integer => SqlType::new("BIGINT"),
            ValueType::Double => SqlType::new("DOUBLE PRECISION"),
            ValueType::Decimal { precision, scale } => {
                SqlType::new(format!("DECIMAL({}, {})", precision, scale))
            }
            ValueType::Boolean => SqlType::new("BOOLEAN"),
            ValueType::Date => SqlType::new("DATE"),
            ValueType::Timestamp => SqlType::new("TIMESTAMP"),
            ValueType::Binary => SqlType::new("BLOB"),
            ValueType::Uuid => SqlType::new("CHAR(36)"),
            ValueType::Geometry { .. } => SqlType::new("CLOB"),
            ValueType::Json => return None,
        })
    }

    fn map_sql_type(&self, type_name: &str) -> Option<ValueType> {
        let base = type_name
            .split('(')
            .next()
            .unwrap_or(type_name)
            .trim()
            .to_uppercase();
        Some(match base.as_str() {
            "SMALLINT" | "INTEGER" | "INT" | "BIGINT" => ValueType::Integer,
            "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" => ValueType::Double,
            "DECIMAL" | "NUMERIC" => ValueType::decimal(38, 10),
            "BOOLEAN" => ValueType::Boolean,
            "CHAR" | "VARCHAR" | "CHARACTER VARYING" | "TEXT" => ValueType::String,
            "CLOB" => ValueType::geometry(GeometryKind::Geometry),
            "DATE" => ValueType::Date,
            "TIMESTAMP" => ValueType::Timestamp,
            "BLOB" | "VARBINARY" => ValueType::Binary,
            _ => return None,
        })
    }

    fn encode_geometry_column(&self, column: &str, _attribute: &AttributeDescriptor) -> String {
        column.to_string()
    }

    fn post_create_table_statements(
        &self,
        namespace: Option<&str>,
        _qualified_table: &str,
        schema: &FeatureSchema,
        key_column: &str,
    ) -> Vec<String> {
        let sequence = Self::sequence_name(&schema.name, key_column);
        vec![format!(
            "CREATE SEQUENCE {}",
            qualify_table(namespace, &sequence, |name| self.quote_identifier(name))
        )]
    }

    /// `sequence` may be qualified as `namespace.name`
    fn next_sequence_value_sql(&self, sequence: &str) -> Option<String> {
        let (namespace, name) = match sequence.split_once('.') {
            Some((namespace, name)) => (Some(namespace), name),
            None => (None, sequence),
        };
        Some(format!(
            "SELECT NEXT VALUE FOR {}",
            qualify_table(namespace, name, |part| self.quote_identifier(part))
        ))
    }
}
