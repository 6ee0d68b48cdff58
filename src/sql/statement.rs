//! Statement compilation
//!
//! [`StatementCompiler`] turns an abstract read (projection, pushed filter,
//! sort, paging, hints) into a [`Statement`]: SQL text plus the parameters to
//! bind. Whether values are inlined or bound is decided once per dialect by
//! its [`StatementStyle`].

use crate::dialect::{Dialect, StatementStyle};
use crate::error::{FeatureStoreError, Result};
use crate::filter::Filter;
use crate::query::{Paging, QueryHints, SortBy, SortOrder};
use crate::schema::{FeatureSchema, PrimaryKey};
use crate::sql::filter::FilterEncoder;
use crate::sql::sanitize::qualify_table;
use crate::types::{AttributeDescriptor, Value, ValueType};

/// A value bound to a statement placeholder
#[derive(Debug, Clone, PartialEq)]
pub struct BindParam {
    pub value: Value,
    /// Declared type of the column the value is compared against
    pub value_type: ValueType,
    /// Spatial reference of the column, for geometry values
    pub srid: Option<i32>,
}

/// SQL text with the parameters referenced by its placeholders, in order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<BindParam>,
}

impl Statement {
    /// A statement without parameters
    pub fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Values to hand to the driver, converted by the dialect's binding policy
    pub fn bind_values(&self, dialect: &dyn Dialect) -> Vec<Value> {
        self.params
            .iter()
            .map(|param| match &param.value {
                Value::Geometry(geometry) => dialect.bind_geometry_value(geometry, param.srid),
                value => dialect.bind_value(value, &param.value_type),
            })
            .collect()
    }
}

/// How a count is computed
#[derive(Debug, Clone, PartialEq)]
pub enum CountStatement {
    /// A single row holding the count in its first column
    Aggregate(Statement),
    /// One row per matching feature, paging left to the caller
    Rows(Statement),
}

/// Accumulates SQL text and parameters
#[derive(Debug)]
pub(crate) struct SqlBuilder<'d> {
    dialect: &'d dyn Dialect,
    sql: String,
    params: Vec<BindParam>,
}

impl<'d> SqlBuilder<'d> {
    pub(crate) fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub(crate) fn dialect(&self) -> &'d dyn Dialect {
        self.dialect
    }

    pub(crate) fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// SQL fragment standing for `value`: a placeholder (recording the
    /// parameter) for prepared dialects, a literal for plain ones
    pub(crate) fn value(
        &mut self,
        value: Value,
        value_type: ValueType,
        srid: Option<i32>,
    ) -> Result<String> {
        if value.is_null() {
            return Ok("NULL".to_string());
        }

        match self.dialect.statement_style() {
            StatementStyle::Plain => match &value {
                Value::Geometry(geometry) => Ok(self.dialect.encode_geometry_value(geometry, srid)),
                other => self.dialect.encode_value(other),
            },
            StatementStyle::Prepared => {
                let placeholder = self.dialect.placeholder(self.params.len() + 1);
                let fragment = if value.as_geometry().is_some() {
                    self.dialect.prepare_geometry_value(&placeholder, srid)
                } else {
                    self.dialect.prepare_value(&placeholder, &value_type)
                };
                self.params.push(BindParam {
                    value,
                    value_type,
                    srid,
                });
                Ok(fragment)
            }
        }
    }

    pub(crate) fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Compiles reads against one feature type
#[derive(Debug)]
pub struct StatementCompiler<'a> {
    dialect: &'a dyn Dialect,
    schema: &'a FeatureSchema,
    key: &'a PrimaryKey,
    table: String,
}

impl<'a> StatementCompiler<'a> {
    pub fn new(
        dialect: &'a dyn Dialect,
        schema: &'a FeatureSchema,
        key: &'a PrimaryKey,
        namespace: Option<&str>,
    ) -> Self {
        let table = qualify_table(namespace, &key.table, |name| dialect.quote_identifier(name));
        Self {
            dialect,
            schema,
            key,
            table,
        }
    }

    /// Qualified, quoted table reference
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether paging can be appended to a statement
    pub fn can_page(&self) -> bool {
        self.dialect.is_limit_offset_supported()
    }

    /// SELECT of the key columns followed by `attributes`
    ///
    /// Paging is applied only when the dialect supports it; pass `None` when
    /// rows still go through a post-filter.
    pub fn select(
        &self,
        attributes: &[AttributeDescriptor],
        filter: &Filter,
        sort: &[SortBy],
        paging: Option<Paging>,
        hints: &QueryHints,
    ) -> Result<Statement> {
        let mut columns = self.key_columns();
        for attribute in attributes {
            columns.push(self.attribute_column(attribute, hints)?);
        }
        if columns.is_empty() {
            columns.push("1".to_string());
        }

        let mut builder = SqlBuilder::new(self.dialect);
        builder.push(&format!("SELECT {} FROM {}", columns.join(", "), self.table));
        self.push_where(&mut builder, filter)?;

        let paging = paging.filter(|_| self.can_page());
        let mut order = self.order_by(sort);
        if order.is_empty() && paging.is_some() {
            order = self.order_by(&[SortBy::Natural]);
        }
        if !order.is_empty() {
            builder.push(&format!(" ORDER BY {}", order.join(", ")));
        }

        let mut statement = builder.finish();
        if let Some(paging) = paging {
            self.dialect
                .apply_limit_offset(&mut statement.sql, paging.limit, paging.offset)?;
        }
        Ok(statement)
    }

    /// Count of features matching `filter` within `paging`
    ///
    /// A paged count selects the same rows as [`select`](Self::select) with
    /// the same sort.
    pub fn count(
        &self,
        filter: &Filter,
        sort: &[SortBy],
        paging: Option<Paging>,
    ) -> Result<CountStatement> {
        match paging {
            None => {
                let mut builder = SqlBuilder::new(self.dialect);
                builder.push(&format!("SELECT count(*) FROM {}", self.table));
                self.push_where(&mut builder, filter)?;
                Ok(CountStatement::Aggregate(builder.finish()))
            }
            Some(paging) if self.can_page() => {
                let inner = self.paged_subquery(&self.key_projection(), filter, sort, paging)?;
                Ok(CountStatement::Aggregate(Statement {
                    sql: format!("SELECT count(*) FROM ({}) AS counted", inner.sql),
                    params: inner.params,
                }))
            }
            Some(_) => {
                let mut builder = SqlBuilder::new(self.dialect);
                builder.push(&format!(
                    "SELECT {} FROM {}",
                    self.key_projection(),
                    self.table
                ));
                self.push_where(&mut builder, filter)?;
                Ok(CountStatement::Rows(builder.finish()))
            }
        }
    }

    /// One envelope aggregate per geometry attribute of the schema
    ///
    /// Paged bounds aggregate over the rows [`select`](Self::select) returns
    /// for the same sort.
    pub fn bounds(
        &self,
        filter: &Filter,
        sort: &[SortBy],
        paging: Option<Paging>,
    ) -> Result<Statement> {
        let geometries: Vec<&AttributeDescriptor> = self.schema.geometry_attributes().collect();
        if geometries.is_empty() {
            return Err(FeatureStoreError::unsupported(format!(
                "'{}' has no geometry attribute",
                self.schema.name
            )));
        }

        let aggregates = geometries
            .iter()
            .map(|attr| {
                self.dialect
                    .encode_geometry_envelope(&self.dialect.quote_identifier(&attr.name), attr)
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        match paging {
            None => {
                let mut builder = SqlBuilder::new(self.dialect);
                builder.push(&format!("SELECT {} FROM {}", aggregates, self.table));
                self.push_where(&mut builder, filter)?;
                Ok(builder.finish())
            }
            Some(paging) if self.can_page() => {
                let projection = geometries
                    .iter()
                    .map(|attr| self.dialect.quote_identifier(&attr.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                let inner = self.paged_subquery(&projection, filter, sort, paging)?;
                Ok(Statement {
                    sql: format!("SELECT {} FROM ({}) AS bounded", aggregates, inner.sql),
                    params: inner.params,
                })
            }
            Some(_) => Err(FeatureStoreError::unsupported(format!(
                "{} dialect cannot page an envelope aggregate",
                self.dialect.name()
            ))),
        }
    }

    fn paged_subquery(
        &self,
        projection: &str,
        filter: &Filter,
        sort: &[SortBy],
        paging: Paging,
    ) -> Result<Statement> {
        let mut builder = SqlBuilder::new(self.dialect);
        builder.push(&format!("SELECT {} FROM {}", projection, self.table));
        self.push_where(&mut builder, filter)?;
        let mut order = self.order_by(sort);
        if order.is_empty() {
            order = self.order_by(&[SortBy::Natural]);
        }
        if !order.is_empty() {
            builder.push(&format!(" ORDER BY {}", order.join(", ")));
        }
        let mut statement = builder.finish();
        self.dialect
            .apply_limit_offset(&mut statement.sql, paging.limit, paging.offset)?;
        Ok(statement)
    }

    fn push_where(&self, builder: &mut SqlBuilder<'_>, filter: &Filter) -> Result<()> {
        if filter.is_include() {
            return Ok(());
        }
        let clause = FilterEncoder::new(builder, self.schema, self.key).encode(filter)?;
        builder.push(&format!(" WHERE {}", clause));
        Ok(())
    }

    fn key_columns(&self) -> Vec<String> {
        self.key
            .column_names()
            .map(|name| self.dialect.quote_identifier(name))
            .collect()
    }

    fn key_projection(&self) -> String {
        let columns = self.key_columns();
        if columns.is_empty() {
            "1".to_string()
        } else {
            columns.join(", ")
        }
    }

    fn attribute_column(&self, attribute: &AttributeDescriptor, hints: &QueryHints) -> Result<String> {
        let column = self.dialect.quote_identifier(&attribute.name);
        if !attribute.is_geometry() {
            return Ok(column);
        }

        let encoded = match (
            self.dialect.supports_generalization(),
            hints.generalization_distance,
            hints.simplification_distance,
        ) {
            (true, Some(distance), _) => self
                .dialect
                .encode_generalized_geometry_column(&column, attribute, distance)?,
            (true, None, Some(distance)) => self
                .dialect
                .encode_simplified_geometry_column(&column, attribute, distance)?,
            _ => self.dialect.encode_geometry_column(&column, attribute),
        };
        if encoded == column {
            Ok(column)
        } else {
            Ok(format!("{} AS {}", encoded, column))
        }
    }

    fn order_by(&self, sort: &[SortBy]) -> Vec<String> {
        let mut terms = Vec::new();
        for entry in sort {
            match entry {
                SortBy::Natural | SortBy::Reverse => {
                    let order = if matches!(entry, SortBy::Natural) {
                        SortOrder::Asc
                    } else {
                        SortOrder::Desc
                    };
                    for column in self.key_columns() {
                        terms.push(format!("{} {}", column, order.as_sql()));
                    }
                }
                SortBy::Property { name, order } => {
                    let column = self
                        .schema
                        .attribute(name)
                        .map(|attr| attr.name.as_str())
                        .unwrap_or(name);
                    terms.push(format!(
                        "{} {}",
                        self.dialect.quote_identifier(column),
                        order.as_sql()
                    ));
                }
            }
        }
        terms
    }
}
