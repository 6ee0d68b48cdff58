//! Schema-related types for the feature store
//!
//! Includes FeatureSchema, PrimaryKey and PrimaryKeyColumn.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{FeatureStoreError, Result};
use crate::types::{AttributeDescriptor, ValueType};

/// Ordered set of typed attributes describing one logical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    /// Type name (also the table name)
    pub name: String,
    /// Attribute descriptors in column order
    pub attributes: Vec<AttributeDescriptor>,
}

impl FeatureSchema {
    /// Create a new FeatureSchema with the given attributes
    pub fn new(name: impl Into<String>, attributes: Vec<AttributeDescriptor>) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }

    /// Look up an attribute by name
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Position of an attribute in the schema
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name.as_str()).collect()
    }

    /// All geometry attributes, in schema order
    pub fn geometry_attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|a| a.is_geometry())
    }

    /// First geometry attribute, if any
    pub fn default_geometry(&self) -> Option<&AttributeDescriptor> {
        self.geometry_attributes().next()
    }

    /// Check that the schema is flat and representable as a single table
    pub fn validate(&self) -> Result<()> {
        if self.attributes.is_empty() {
            return Err(FeatureStoreError::validation(format!(
                "Schema '{}' has no attributes",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for attr in &self.attributes {
            if attr.name.is_empty() {
                return Err(FeatureStoreError::validation(format!(
                    "Schema '{}' has an attribute with an empty name",
                    self.name
                )));
            }
            if !seen.insert(attr.name.to_lowercase()) {
                return Err(FeatureStoreError::validation(format!(
                    "Duplicate attribute '{}' in schema '{}'",
                    attr.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// How values for a key column are produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "sequence", rename_all = "snake_case")]
pub enum KeyKind {
    /// Values are supplied by the writer
    Assigned,
    /// The backend generates values on insert (identity/serial columns)
    AutoGenerated,
    /// Values are drawn from the named sequence
    Sequence(String),
}

/// One column of a primary key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyColumn {
    pub name: String,
    pub value_type: ValueType,
    pub kind: KeyKind,
}

impl PrimaryKeyColumn {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            kind: KeyKind::Assigned,
        }
    }

    pub fn with_kind(mut self, kind: KeyKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Ordered key columns of a table
///
/// The column order drives identity encoding, natural ordering and row
/// decoding. A key with no columns means the table has no usable key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub table: String,
    pub columns: Vec<PrimaryKeyColumn>,
}

impl PrimaryKey {
    pub fn new(table: impl Into<String>, columns: Vec<PrimaryKeyColumn>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    /// A key for a table without key columns
    pub fn none(table: impl Into<String>) -> Self {
        Self::new(table, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&PrimaryKeyColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}
