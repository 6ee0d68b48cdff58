//! PostGIS dialect: prepared statements against PostgreSQL with PostGIS

use std::sync::LazyLock;

use regex::Regex;

use super::{Dialect, SqlType, StatementStyle, quote_literal};
use crate::backend::ResultRow;
use crate::error::{FeatureStoreError, Result};
use crate::filter::{ArithmeticOp, Capabilities, Operator, SpatialOp};
use crate::geometry::Envelope;
use crate::schema::FeatureSchema;
use crate::types::{AttributeDescriptor, GeometryKind, Value, ValueType};

static BOX_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^BOX\(\s*(\S+)\s+(\S+)\s*,\s*(\S+)\s+(\S+)\s*\)$").ok()
});

/// PostGIS bookkeeping tables that are never feature types
const SYSTEM_TABLES: &[&str] = &[
    "spatial_ref_sys",
    "geometry_columns",
    "geography_columns",
    "raster_columns",
    "raster_overviews",
];

/// Filter functions with a native PostgreSQL equivalent
const FUNCTIONS: &[(&str, &str)] = &[
    ("strLength", "char_length"),
    ("strToUpperCase", "upper"),
    ("strToLowerCase", "lower"),
    ("strTrim", "btrim"),
    ("abs", "abs"),
    ("floor", "floor"),
    ("ceil", "ceil"),
];

/// Dialect for PostgreSQL/PostGIS
///
/// Geometries travel as WKT (`ST_AsText` / `ST_GeomFromText`), envelopes are
/// aggregated with `ST_Extent`, and spatial predicates map to the `ST_*`
/// relationship functions.
#[derive(Debug, Clone)]
pub struct PostgisDialect {
    capabilities: Capabilities,
}

impl Default for PostgisDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgisDialect {
    pub fn new() -> Self {
        let mut capabilities = Capabilities::base();
        capabilities
            .add_all([Operator::Between, Operator::Like, Operator::IsNull])
            .add_all(ArithmeticOp::ALL.map(Operator::Arithmetic))
            .add_all(SpatialOp::ALL.map(Operator::Spatial));
        for (name, _) in FUNCTIONS {
            capabilities.add_function(name);
        }
        Self { capabilities }
    }
}

impl Dialect for PostgisDialect {
    fn name(&self) -> &str {
        "PostGIS"
    }

    fn statement_style(&self) -> StatementStyle {
        StatementStyle::Prepared
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn map_type(&self, value_type: &ValueType) -> Option<SqlType> {
        Some(match value_type {
            ValueType::String => SqlType::sized("VARCHAR"),
            ValueType::Integer => SqlType::new("BIGINT"),
            ValueType::Double => SqlType::new("DOUBLE PRECISION"),
            ValueType::Decimal { precision, scale } => {
                SqlType::new(format!("NUMERIC({}, {})", precision, scale))
            }
            ValueType::Boolean => SqlType::new("BOOLEAN"),
            ValueType::Date => SqlType::new("DATE"),
            ValueType::Timestamp => SqlType::new("TIMESTAMPTZ"),
            ValueType::Binary => SqlType::new("BYTEA"),
            ValueType::Uuid => SqlType::new("UUID"),
            ValueType::Json => SqlType::new("JSONB"),
            ValueType::Geometry { .. } => SqlType::new("GEOMETRY"),
        })
    }

    fn map_sql_type(&self, type_name: &str) -> Option<ValueType> {
        Some(match type_name.to_lowercase().as_str() {
            "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "serial"
            | "bigserial" => ValueType::Integer,
            "float4" | "float8" | "real" | "double precision" => ValueType::Double,
            "numeric" | "decimal" => ValueType::decimal(38, 10),
            "bool" | "boolean" => ValueType::Boolean,
            "text" | "varchar" | "bpchar" | "character varying" | "name" | "citext" => {
                ValueType::String
            }
            "uuid" => ValueType::Uuid,
            "date" => ValueType::Date,
            "timestamp" | "timestamptz" => ValueType::Timestamp,
            "bytea" => ValueType::Binary,
            "json" | "jsonb" => ValueType::Json,
            "geometry" => ValueType::geometry(GeometryKind::Geometry),
            _ => return None,
        })
    }

    fn encode_geometry_column(&self, column: &str, _attribute: &AttributeDescriptor) -> String {
        format!("ST_AsText({})", column)
    }

    fn supports_generalization(&self) -> bool {
        true
    }

    fn encode_generalized_geometry_column(
        &self,
        column: &str,
        _attribute: &AttributeDescriptor,
        distance: f64,
    ) -> Result<String> {
        Ok(format!("ST_AsText(ST_Simplify({}, {}))", column, distance))
    }

    fn encode_simplified_geometry_column(
        &self,
        column: &str,
        _attribute: &AttributeDescriptor,
        distance: f64,
    ) -> Result<String> {
        Ok(format!(
            "ST_AsText(ST_SimplifyPreserveTopology({}, {}))",
            column, distance
        ))
    }

    fn supports_envelope_aggregate(&self) -> bool {
        true
    }

    fn encode_geometry_envelope(&self, column: &str, _attribute: &AttributeDescriptor) -> Result<String> {
        Ok(format!("ST_Extent({})::text", column))
    }

    fn decode_geometry_envelope(
        &self,
        row: &dyn ResultRow,
        index: usize,
        attribute: &AttributeDescriptor,
    ) -> Result<Option<Envelope>> {
        let text = match row.get(index, &ValueType::String)? {
            Value::Null => return Ok(None),
            Value::Text(text) => text,
            other => {
                return Err(FeatureStoreError::decoding(format!(
                    "Expected BOX text for envelope, got {}",
                    other.type_name()
                )));
            }
        };

        let envelope = parse_box(&text)?;
        Ok(Some(match &attribute.crs {
            Some(crs) => envelope.with_crs(crs.clone()),
            None => envelope,
        }))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn encode_geometry_value(&self, geometry: &geo::Geometry<f64>, srid: Option<i32>) -> String {
        let wkt = quote_literal(&crate::geometry::to_wkt(geometry));
        match srid {
            Some(srid) => format!("ST_GeomFromText({}, {})", wkt, srid),
            None => format!("ST_GeomFromText({})", wkt),
        }
    }

    /// Text parameters are bound as `text`; uuid columns need an explicit cast
    fn prepare_value(&self, placeholder: &str, value_type: &ValueType) -> String {
        match value_type {
            ValueType::Uuid => format!("{}::uuid", placeholder),
            _ => placeholder.to_string(),
        }
    }

    fn prepare_geometry_value(&self, placeholder: &str, srid: Option<i32>) -> String {
        match srid {
            Some(srid) => format!("ST_GeomFromText({}, {})", placeholder, srid),
            None => format!("ST_GeomFromText({})", placeholder),
        }
    }

    fn spatial_predicate_sql(&self, op: SpatialOp, column: &str, geometry: &str) -> Result<String> {
        let function = match op {
            SpatialOp::BBox => return Ok(format!("{} && {}", column, geometry)),
            SpatialOp::Intersects => "ST_Intersects",
            SpatialOp::Contains => "ST_Contains",
            SpatialOp::Within => "ST_Within",
            SpatialOp::Disjoint => "ST_Disjoint",
            SpatialOp::Equals => "ST_Equals",
            SpatialOp::Touches => "ST_Touches",
            SpatialOp::Crosses => "ST_Crosses",
            SpatialOp::Overlaps => "ST_Overlaps",
        };
        Ok(format!("{}({}, {})", function, column, geometry))
    }

    fn function_sql(&self, name: &str, args: &[String]) -> Result<String> {
        let native = FUNCTIONS
            .iter()
            .find(|(filter_name, _)| filter_name.eq_ignore_ascii_case(name))
            .map(|(_, native)| *native)
            .ok_or_else(|| {
                FeatureStoreError::unsupported(format!("PostGIS dialect has no function {}", name))
            })?;
        Ok(format!("{}({})", native, args.join(", ")))
    }

    fn like_sql(&self, expr: &str, pattern: &str, match_case: bool) -> String {
        let op = if match_case { "LIKE" } else { "ILIKE" };
        format!("{}::text {} {}", expr, op, pattern)
    }

    fn is_limit_offset_supported(&self) -> bool {
        true
    }

    fn apply_limit_offset(&self, sql: &mut String, limit: Option<u64>, offset: u64) -> Result<()> {
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        Ok(())
    }

    fn encode_primary_key(&self, column: &str) -> String {
        format!("{} SERIAL PRIMARY KEY", self.quote_identifier(column))
    }

    fn encode_post_column_create_table(&self, attribute: &AttributeDescriptor) -> String {
        let ValueType::Geometry { kind } = &attribute.value_type else {
            return String::new();
        };
        let column = self.quote_identifier(&attribute.name);

        let mut checks = Vec::new();
        if let Some(srid) = attribute.srid {
            checks.push(format!("CHECK (ST_SRID({}) = {})", column, srid));
        }
        if *kind != GeometryKind::Geometry {
            checks.push(format!(
                "CHECK (GeometryType({}) = '{}' OR {} IS NULL)",
                column,
                kind.ogc_name(),
                column
            ));
        }
        checks.join(" ")
    }

    fn post_create_table_statements(
        &self,
        _namespace: Option<&str>,
        qualified_table: &str,
        schema: &FeatureSchema,
        _key_column: &str,
    ) -> Vec<String> {
        schema
            .geometry_attributes()
            .map(|attr| {
                format!(
                    "CREATE INDEX {} ON {} USING GIST ({})",
                    self.quote_identifier(&format!("spatial_{}_{}", schema.name, attr.name)),
                    qualified_table,
                    self.quote_identifier(&attr.name)
                )
            })
            .collect()
    }

    fn next_sequence_value_sql(&self, sequence: &str) -> Option<String> {
        Some(format!("SELECT nextval({})", quote_literal(sequence)))
    }

    fn next_auto_generated_value_sql(&self, table: &str, column: &str) -> Option<String> {
        Some(format!(
            "SELECT nextval(pg_get_serial_sequence({}, {}))",
            quote_literal(table),
            quote_literal(column)
        ))
    }

    fn geometry_metadata_sql(&self, namespace: Option<&str>) -> Option<String> {
        let schema = match namespace {
            Some(ns) => quote_literal(ns),
            None => "current_schema()".to_string(),
        };
        Some(format!(
            "SELECT f_table_name::text, f_geometry_column::text, srid::int4, type::text \
             FROM geometry_columns WHERE f_table_schema = {}",
            schema
        ))
    }

    fn include_table(&self, table: &str) -> bool {
        !SYSTEM_TABLES.contains(&table)
    }
}

/// Parse PostGIS `BOX(minx miny,maxx maxy)` text
pub fn parse_box(text: &str) -> Result<Envelope> {
    let invalid = || FeatureStoreError::decoding(format!("Invalid BOX value '{}'", text));

    let captures = BOX_PATTERN
        .as_ref()
        .and_then(|re| re.captures(text.trim()))
        .ok_or_else(invalid)?;
    let mut coords = [0.0f64; 4];
    for (i, coord) in coords.iter_mut().enumerate() {
        *coord = captures[i + 1].parse().map_err(|_| invalid())?;
    }
    Ok(Envelope::new(coords[0], coords[1], coords[2], coords[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Type Mapping Tests
    // =========================================================================

    #[test]
    fn test_map_type() {
        let d = PostgisDialect::new();
        assert_eq!(d.map_type(&ValueType::String), Some(SqlType::sized("VARCHAR")));
        assert_eq!(
            d.map_type(&ValueType::decimal(10, 2)).map(|t| t.name),
            Some("NUMERIC(10, 2)".to_string())
        );
        assert_eq!(
            d.map_type(&ValueType::geometry(GeometryKind::Point)).map(|t| t.name),
            Some("GEOMETRY".to_string())
        );
    }

    #[test]
    fn test_map_sql_type() {
        let d = PostgisDialect::new();
        assert_eq!(d.map_sql_type("int4"), Some(ValueType::Integer));
        assert_eq!(d.map_sql_type("TIMESTAMPTZ"), Some(ValueType::Timestamp));
        assert_eq!(
            d.map_sql_type("geometry"),
            Some(ValueType::geometry(GeometryKind::Geometry))
        );
        assert_eq!(d.map_sql_type("tsvector"), None);
    }

    #[test]
    fn test_uuid_columns() {
        let d = PostgisDialect::new();
        assert_eq!(d.map_sql_type("uuid"), Some(ValueType::Uuid));
        assert_eq!(d.map_sql_type("\"char\""), None);
        assert_eq!(d.map_type(&ValueType::Uuid).map(|t| t.name), Some("UUID".to_string()));
        assert_eq!(d.prepare_value("$2", &ValueType::Uuid), "$2::uuid");
        assert_eq!(d.prepare_value("$2", &ValueType::String), "$2");
    }

    // =========================================================================
    // Geometry Encoding Tests
    // =========================================================================

    #[test]
    fn test_geometry_column_encodings() {
        let d = PostgisDialect::new();
        let attr = AttributeDescriptor::geometry("geom", GeometryKind::Point, 4326);
        assert_eq!(d.encode_geometry_column("\"geom\"", &attr), "ST_AsText(\"geom\")");
        assert_eq!(
            d.encode_simplified_geometry_column("\"geom\"", &attr, 0.5).unwrap(),
            "ST_AsText(ST_SimplifyPreserveTopology(\"geom\", 0.5))"
        );
        assert_eq!(
            d.encode_geometry_envelope("\"geom\"", &attr).unwrap(),
            "ST_Extent(\"geom\")::text"
        );
    }

    #[test]
    fn test_parse_box() {
        let env = parse_box("BOX(-1.5 2,3 4.25)").unwrap();
        assert_eq!(env, Envelope::new(-1.5, 2.0, 3.0, 4.25));
        assert!(parse_box("BOX(1 2)").is_err());
        assert!(parse_box("POINT(1 2)").is_err());
    }

    #[test]
    fn test_placeholders_and_geometry_binding() {
        let d = PostgisDialect::new();
        assert_eq!(d.placeholder(3), "$3");
        assert_eq!(
            d.prepare_geometry_value("$1", Some(4326)),
            "ST_GeomFromText($1, 4326)"
        );
    }

    #[test]
    fn test_spatial_predicates() {
        let d = PostgisDialect::new();
        assert_eq!(
            d.spatial_predicate_sql(SpatialOp::BBox, "\"geom\"", "$1").unwrap(),
            "\"geom\" && $1"
        );
        assert_eq!(
            d.spatial_predicate_sql(SpatialOp::Within, "\"geom\"", "$1").unwrap(),
            "ST_Within(\"geom\", $1)"
        );
    }

    #[test]
    fn test_function_mapping() {
        let d = PostgisDialect::new();
        assert!(d.capabilities().supports_function("strLength"));
        assert_eq!(
            d.function_sql("STRLENGTH", &["\"name\"".into()]).unwrap(),
            "char_length(\"name\")"
        );
        assert!(d.function_sql("customFunc", &[]).unwrap_err().is_unsupported());
    }

    // =========================================================================
    // Pagination and DDL Tests
    // =========================================================================

    #[test]
    fn test_limit_offset() {
        let d = PostgisDialect::new();
        let mut sql = String::from("SELECT 1");
        d.apply_limit_offset(&mut sql, Some(3), 2).unwrap();
        assert_eq!(sql, "SELECT 1 LIMIT 3 OFFSET 2");

        let mut sql = String::from("SELECT 1");
        d.apply_limit_offset(&mut sql, None, 5).unwrap();
        assert_eq!(sql, "SELECT 1 OFFSET 5");
    }

    #[test]
    fn test_ddl_hooks() {
        let d = PostgisDialect::new();
        assert_eq!(d.encode_primary_key("fid"), "\"fid\" SERIAL PRIMARY KEY");

        let attr = AttributeDescriptor::geometry("geom", GeometryKind::Point, 4326);
        let post = d.encode_post_column_create_table(&attr);
        assert!(post.contains("CHECK (ST_SRID(\"geom\") = 4326)"));
        assert!(post.contains("GeometryType(\"geom\") = 'POINT'"));

        let schema = FeatureSchema::new("roads", vec![attr]);
        assert_eq!(
            d.post_create_table_statements(Some("public"), "\"public\".\"roads\"", &schema, "fid"),
            vec!["CREATE INDEX \"spatial_roads_geom\" ON \"public\".\"roads\" USING GIST (\"geom\")"]
        );
    }

    #[test]
    fn test_sequences_and_metadata() {
        let d = PostgisDialect::new();
        assert_eq!(
            d.next_sequence_value_sql("roads_fid_seq").as_deref(),
            Some("SELECT nextval('roads_fid_seq')")
        );
        assert!(d.geometry_metadata_sql(Some("gis")).unwrap().contains("f_table_schema = 'gis'"));
        assert!(d.geometry_metadata_sql(None).unwrap().contains("current_schema()"));
    }

    #[test]
    fn test_system_tables_hidden() {
        let d = PostgisDialect::new();
        assert!(!d.include_table("spatial_ref_sys"));
        assert!(d.include_table("roads"));
    }
}
