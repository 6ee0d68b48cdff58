//! DDL generation for feature type creation
//!
//! Generates the CREATE TABLE statement for a feature schema plus the
//! statements the dialect runs right after it (sequences, spatial indexes).

use crate::config::StoreConfig;
use crate::dialect::Dialect;
use crate::error::{FeatureStoreError, Result};
use crate::schema::FeatureSchema;
use crate::sql::sanitize::{qualify_table, validate_identifier};

/// DDL for one new feature type, run in order
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub sql: String,
    /// Statements run immediately after the table exists
    pub post_create: Vec<String>,
}

impl CreateTable {
    /// Every statement, CREATE TABLE first
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.sql.as_str()).chain(self.post_create.iter().map(String::as_str))
    }
}

/// DDL generator for feature tables
pub struct DdlGenerator<'a> {
    dialect: &'a dyn Dialect,
    config: &'a StoreConfig,
}

impl<'a> DdlGenerator<'a> {
    pub fn new(dialect: &'a dyn Dialect, config: &'a StoreConfig) -> Self {
        Self { dialect, config }
    }

    /// Generate CREATE TABLE for a schema
    ///
    /// Creates a table with:
    /// - The configured key column, first
    /// - One column per attribute, sized text types taking the declared
    ///   length or the configured default, `NOT NULL` for non-nullable ones
    ///
    /// Every identifier is validated and every attribute type mapped before
    /// any SQL is produced, so an unrepresentable schema fails with
    /// [`FeatureStoreError::Validation`] or [`FeatureStoreError::Configuration`].
    pub fn create_table(&self, schema: &FeatureSchema) -> Result<CreateTable> {
        schema.validate()?;

        let key_column = self.config.primary_key_column.as_str();
        validate_identifier(&schema.name, &[])?;
        validate_identifier(key_column, &[])?;

        let mut types = Vec::with_capacity(schema.attributes.len());
        for attr in &schema.attributes {
            validate_identifier(&attr.name, &[key_column])?;
            let sql_type = self.dialect.map_type(&attr.value_type).ok_or_else(|| {
                FeatureStoreError::configuration(format!(
                    "{} dialect has no column type for attribute '{}' ({:?})",
                    self.dialect.name(),
                    attr.name,
                    attr.value_type
                ))
            })?;
            types.push(sql_type);
        }

        let mut column_defs = vec![self.dialect.encode_primary_key(key_column)];
        for (attr, sql_type) in schema.attributes.iter().zip(types) {
            let mut def = format!(
                "{} {}",
                self.dialect.quote_identifier(&attr.name),
                sql_type.name
            );
            if sql_type.sized {
                let length = attr.length.unwrap_or(self.config.default_varchar_length);
                def.push_str(&format!("({})", length));
            }
            if !attr.nullable {
                def.push_str(" NOT NULL");
            }
            let post = self.dialect.encode_post_column_create_table(attr);
            if !post.is_empty() {
                def.push(' ');
                def.push_str(&post);
            }
            column_defs.push(def);
        }

        let table = qualify_table(
            self.config.database_schema.as_deref(),
            &schema.name,
            |name| self.dialect.quote_identifier(name),
        );
        let mut sql = format!("CREATE TABLE {} ({})", table, column_defs.join(", "));
        let post_table = self.dialect.encode_post_create_table(schema);
        if !post_table.is_empty() {
            sql.push(' ');
            sql.push_str(&post_table);
        }

        Ok(CreateTable {
            sql,
            post_create: self
                .dialect
                .post_create_table_statements(
                    self.config.database_schema.as_deref(),
                    &table,
                    schema,
                    key_column,
                ),
        })
    }
}
