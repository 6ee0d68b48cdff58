//! Filter to SQL encoding
//!
//! Converts the backend half of a split filter into a WHERE clause. Literals
//! compared against a property are coerced to that property's declared type
//! first, so `lanes > '2'` binds the integer 2 against an integer column.

use crate::error::{FeatureStoreError, Result};
use crate::filter::{Expr, Filter};
use crate::schema::{FeatureSchema, PrimaryKey};
use crate::sql::statement::SqlBuilder;
use crate::types::{Value, ValueType};

/// Encodes filters and expressions into a [`SqlBuilder`]
///
/// Fragments are produced left to right, so placeholders are numbered in
/// the order they appear in the statement text.
pub(crate) struct FilterEncoder<'b, 'd> {
    builder: &'b mut SqlBuilder<'d>,
    schema: &'b FeatureSchema,
    key: &'b PrimaryKey,
}

impl<'b, 'd> FilterEncoder<'b, 'd> {
    pub(crate) fn new(
        builder: &'b mut SqlBuilder<'d>,
        schema: &'b FeatureSchema,
        key: &'b PrimaryKey,
    ) -> Self {
        Self {
            builder,
            schema,
            key,
        }
    }

    pub(crate) fn encode(&mut self, filter: &Filter) -> Result<String> {
        match filter {
            Filter::Include => Ok("1 = 1".to_string()),
            Filter::Exclude => Ok("1 = 0".to_string()),
            Filter::And(children) => self.encode_joined(children, " AND "),
            Filter::Or(children) => self.encode_joined(children, " OR "),
            Filter::Not(inner) => Ok(format!("NOT ({})", self.encode(inner)?)),
            Filter::Compare { op, left, right } => {
                let (left_hint, right_hint) = (self.column_of(left), self.column_of(right));
                let left_sql = self.encode_expr(left, right_hint.as_ref())?;
                let right_sql = self.encode_expr(right, left_hint.as_ref())?;
                Ok(format!("{} {} {}", left_sql, op.as_sql(), right_sql))
            }
            Filter::Between { expr, lower, upper } => {
                let hint = self.column_of(expr);
                let expr_sql = self.encode_expr(expr, None)?;
                let lower_sql = self.encode_expr(lower, hint.as_ref())?;
                let upper_sql = self.encode_expr(upper, hint.as_ref())?;
                Ok(format!("{} BETWEEN {} AND {}", expr_sql, lower_sql, upper_sql))
            }
            Filter::Like {
                expr,
                pattern,
                match_case,
            } => {
                let expr_sql = self.encode_expr(expr, None)?;
                let pattern_sql =
                    self.builder
                        .value(Value::Text(pattern.clone()), ValueType::String, None)?;
                Ok(self
                    .builder
                    .dialect()
                    .like_sql(&expr_sql, &pattern_sql, *match_case))
            }
            Filter::IsNull(expr) => Ok(format!("{} IS NULL", self.encode_expr(expr, None)?)),
            Filter::Id(_) => Err(FeatureStoreError::unsupported(
                "identity filters must be rewritten to key columns before encoding",
            )),
            Filter::Spatial {
                op,
                property,
                geometry,
            } => {
                let attribute = self.schema.attribute(property).ok_or_else(|| {
                    FeatureStoreError::invalid_filter(format!(
                        "'{}' is not an attribute of '{}'",
                        property, self.schema.name
                    ))
                })?;
                let column = self.builder.dialect().quote_identifier(&attribute.name);
                let geometry_sql = self.builder.value(
                    Value::Geometry(geometry.clone()),
                    attribute.value_type.clone(),
                    attribute.srid,
                )?;
                self.builder
                    .dialect()
                    .spatial_predicate_sql(*op, &column, &geometry_sql)
            }
        }
    }

    fn encode_joined(&mut self, children: &[Filter], separator: &str) -> Result<String> {
        let parts = children
            .iter()
            .map(|child| self.encode(child).map(|sql| format!("({})", sql)))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(separator))
    }

    /// Encode an operand; `hint` is the column it is compared with
    fn encode_expr(&mut self, expr: &Expr, hint: Option<&ColumnHint>) -> Result<String> {
        match expr {
            Expr::Literal(Value::Null) => Ok("NULL".to_string()),
            Expr::Literal(value) => {
                let (value, value_type) = coerce(value, hint.map(|h| &h.value_type));
                let srid = hint.and_then(|h| h.srid).filter(|_| value_type.is_geometry());
                self.builder.value(value, value_type, srid)
            }
            Expr::Property(name) => {
                let column = self
                    .schema
                    .attribute(name)
                    .map(|attr| attr.name.as_str())
                    .unwrap_or(name);
                Ok(self.builder.dialect().quote_identifier(column))
            }
            Expr::Function { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.encode_expr(arg, None))
                    .collect::<Result<Vec<_>>>()?;
                self.builder.dialect().function_sql(name, &args)
            }
            Expr::Arithmetic { op, left, right } => {
                let (left_hint, right_hint) = (self.column_of(left), self.column_of(right));
                let left_sql = self.encode_expr(left, right_hint.as_ref())?;
                let right_sql = self.encode_expr(right, left_hint.as_ref())?;
                Ok(format!("({} {} {})", left_sql, op.as_sql(), right_sql))
            }
        }
    }

    /// Declared type of a property operand
    fn column_of(&self, expr: &Expr) -> Option<ColumnHint> {
        let Expr::Property(name) = expr else {
            return None;
        };
        if let Some(attr) = self.schema.attribute(name) {
            return Some(ColumnHint {
                value_type: attr.value_type.clone(),
                srid: attr.srid,
            });
        }
        self.key.column(name).map(|column| ColumnHint {
            value_type: column.value_type.clone(),
            srid: None,
        })
    }
}

struct ColumnHint {
    value_type: ValueType,
    srid: Option<i32>,
}

/// Coerce a literal to the compared property's type, keeping it unchanged
/// when the conversion fails
fn coerce(value: &Value, hint: Option<&ValueType>) -> (Value, ValueType) {
    if let Some(target) = hint
        && let Ok(converted) = value.convert_to(target)
    {
        return (converted, target.clone());
    }
    let value_type = value.natural_type().unwrap_or(ValueType::String);
    (value.clone(), value_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Dialect, GenericDialect, PostgisDialect};
    use crate::filter::{ArithmeticOp, ComparisonOp, SpatialOp};
    use crate::schema::PrimaryKeyColumn;
    use crate::sql::statement::Statement;
    use crate::types::{AttributeDescriptor, GeometryKind};
    use geo::point;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(
            "places",
            vec![
                AttributeDescriptor::new("name", ValueType::String),
                AttributeDescriptor::new("rank", ValueType::Integer),
                AttributeDescriptor::new("area", ValueType::Double),
                AttributeDescriptor::geometry("geom", GeometryKind::Point, 3857),
            ],
        )
    }

    fn key() -> PrimaryKey {
        PrimaryKey::new("places", vec![PrimaryKeyColumn::new("id", ValueType::Integer)])
    }

    fn encode(dialect: &dyn Dialect, filter: &Filter) -> Result<Statement> {
        let (schema, key) = (schema(), key());
        let mut builder = SqlBuilder::new(dialect);
        let clause = FilterEncoder::new(&mut builder, &schema, &key).encode(filter)?;
        builder.push(&clause);
        Ok(builder.finish())
    }

    // =========================================================================
    // Logical operators
    // =========================================================================

    #[test]
    fn test_constants() {
        let dialect = GenericDialect::new();
        assert_eq!(encode(&dialect, &Filter::Include).unwrap().sql, "1 = 1");
        assert_eq!(encode(&dialect, &Filter::Exclude).unwrap().sql, "1 = 0");
    }

    #[test]
    fn test_and_or_not() {
        let dialect = GenericDialect::new();
        let filter = Filter::eq("name", "a")
            .or(Filter::gt("rank", 2))
            .and(Filter::is_null("area").negate());
        assert_eq!(
            encode(&dialect, &filter).unwrap().sql,
            "((\"name\" = 'a') OR (\"rank\" > 2)) AND (NOT (\"area\" IS NULL))"
        );
    }

    #[test]
    fn test_placeholders_follow_text_order() {
        let dialect = PostgisDialect::new();
        let filter = Filter::between("rank", 1, 5).and(Filter::eq("name", "x"));
        let statement = encode(&dialect, &filter).unwrap();
        assert_eq!(
            statement.sql,
            "(\"rank\" BETWEEN $1 AND $2) AND (\"name\" = $3)"
        );
        let values: Vec<Value> = statement.params.into_iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Value::Integer(1), Value::Integer(5), Value::from("x")]);
    }

    // =========================================================================
    // Operands
    // =========================================================================

    #[test]
    fn test_literal_on_left_is_coerced() {
        let dialect = PostgisDialect::new();
        let filter = Filter::compare(
            ComparisonOp::Lt,
            Expr::literal("1.5"),
            Expr::property("area"),
        );
        let statement = encode(&dialect, &filter).unwrap();
        assert_eq!(statement.sql, "$1 < \"area\"");
        assert_eq!(statement.params[0].value, Value::Double(1.5));
    }

    #[test]
    fn test_failed_coercion_keeps_original() {
        let dialect = PostgisDialect::new();
        let statement = encode(&dialect, &Filter::eq("rank", "many")).unwrap();
        assert_eq!(statement.params[0].value, Value::from("many"));
        assert_eq!(statement.params[0].value_type, ValueType::String);
    }

    #[test]
    fn test_key_column_types_drive_coercion() {
        let dialect = PostgisDialect::new();
        let statement = encode(&dialect, &Filter::eq("id", "42")).unwrap();
        assert_eq!(statement.sql, "\"id\" = $1");
        assert_eq!(statement.params[0].value, Value::Integer(42));
    }

    #[test]
    fn test_null_literal_is_inlined() {
        let dialect = PostgisDialect::new();
        let statement = encode(&dialect, &Filter::eq("name", Value::Null)).unwrap();
        assert_eq!(statement.sql, "\"name\" = NULL");
        assert!(statement.params.is_empty());
    }

    #[test]
    fn test_functions_and_arithmetic() {
        let dialect = PostgisDialect::new();
        let filter = Filter::compare(
            ComparisonOp::Gt,
            Expr::function("strLength", vec![Expr::property("name")]),
            Expr::arithmetic(ArithmeticOp::Add, Expr::property("rank"), Expr::literal(1)),
        );
        assert_eq!(
            encode(&dialect, &filter).unwrap().sql,
            "char_length(\"name\") > (\"rank\" + $1)"
        );
    }

    #[test]
    fn test_unknown_function_is_unsupported() {
        let dialect = GenericDialect::new();
        let filter = Filter::compare(
            ComparisonOp::Eq,
            Expr::function("customFunc", vec![Expr::property("name")]),
            Expr::literal(1),
        );
        assert!(encode(&dialect, &filter).unwrap_err().is_unsupported());
    }

    // =========================================================================
    // Pattern, identity and spatial filters
    // =========================================================================

    #[test]
    fn test_like() {
        let postgis = PostgisDialect::new();
        let statement = encode(&postgis, &Filter::like("name", "Os%", false)).unwrap();
        assert_eq!(statement.sql, "\"name\"::text ILIKE $1");
        assert_eq!(statement.params[0].value, Value::from("Os%"));

        let generic = GenericDialect::new();
        assert_eq!(
            encode(&generic, &Filter::like("name", "O's%", true)).unwrap().sql,
            "\"name\" LIKE 'O''s%' ESCAPE '\\'"
        );
    }

    #[test]
    fn test_id_filter_is_rejected() {
        let dialect = GenericDialect::new();
        assert!(encode(&dialect, &Filter::ids(["places.1"])).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_spatial_uses_attribute_srid() {
        let dialect = PostgisDialect::new();
        let filter = Filter::spatial(
            SpatialOp::Intersects,
            "geom",
            point!(x: 1.0, y: 2.0).into(),
        );
        let statement = encode(&dialect, &filter).unwrap();
        assert_eq!(
            statement.sql,
            "ST_Intersects(\"geom\", ST_GeomFromText($1, 3857))"
        );
        assert_eq!(
            statement.bind_values(&dialect),
            vec![Value::Text("POINT(1 2)".to_string())]
        );

        let generic = GenericDialect::new();
        assert!(encode(&generic, &filter).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_spatial_on_unknown_attribute() {
        let dialect = PostgisDialect::new();
        let filter = Filter::spatial(SpatialOp::Within, "shape", point!(x: 0.0, y: 0.0).into());
        assert!(matches!(
            encode(&dialect, &filter),
            Err(FeatureStoreError::InvalidFilter(_))
        ));
    }
}
