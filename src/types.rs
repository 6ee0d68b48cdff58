//! Core type definitions for the feature store
//!
//! Includes attribute value types, runtime values and attribute descriptors.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use geo::Geometry;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FeatureStoreError, Result};
use crate::geometry;

// ============================================================================
// Value Types
// ============================================================================

/// Concrete geometry class of a geometry attribute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    /// Any geometry class
    Geometry,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryKind {
    /// OGC type name as used by WKT and spatial catalogs
    pub fn ogc_name(&self) -> &'static str {
        match self {
            GeometryKind::Geometry => "GEOMETRY",
            GeometryKind::Point => "POINT",
            GeometryKind::LineString => "LINESTRING",
            GeometryKind::Polygon => "POLYGON",
            GeometryKind::MultiPoint => "MULTIPOINT",
            GeometryKind::MultiLineString => "MULTILINESTRING",
            GeometryKind::MultiPolygon => "MULTIPOLYGON",
            GeometryKind::GeometryCollection => "GEOMETRYCOLLECTION",
        }
    }

    /// Parse an OGC type name, case-insensitively
    pub fn from_ogc_name(name: &str) -> Option<Self> {
        let kind = match name.trim().to_uppercase().as_str() {
            "GEOMETRY" => GeometryKind::Geometry,
            "POINT" => GeometryKind::Point,
            "LINESTRING" => GeometryKind::LineString,
            "POLYGON" => GeometryKind::Polygon,
            "MULTIPOINT" => GeometryKind::MultiPoint,
            "MULTILINESTRING" => GeometryKind::MultiLineString,
            "MULTIPOLYGON" => GeometryKind::MultiPolygon,
            "GEOMETRYCOLLECTION" => GeometryKind::GeometryCollection,
            _ => return None,
        };
        Some(kind)
    }

    /// Geometry class of a concrete geometry value
    pub fn of(geometry: &Geometry<f64>) -> Self {
        match geometry {
            Geometry::Point(_) => GeometryKind::Point,
            Geometry::LineString(_) | Geometry::Line(_) => GeometryKind::LineString,
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
                GeometryKind::Polygon
            }
            Geometry::MultiPoint(_) => GeometryKind::MultiPoint,
            Geometry::MultiLineString(_) => GeometryKind::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryKind::MultiPolygon,
            Geometry::GeometryCollection(_) => GeometryKind::GeometryCollection,
        }
    }
}

/// Attribute value type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ValueType {
    /// Text value (variable length; maps to a sized character type)
    String,

    /// 64-bit integer
    Integer,

    /// Double precision floating point
    Double,

    /// Exact numeric with precision and scale
    Decimal { precision: u8, scale: u8 },

    Boolean,

    /// Calendar date without time zone
    Date,

    /// Timestamp, always handled in UTC
    Timestamp,

    /// Raw bytes
    Binary,

    /// UUID, carried as its hyphenated lowercase text form
    Uuid,

    /// Structured JSON document
    Json,

    /// Geometry of the given class
    Geometry { kind: GeometryKind },
}

impl ValueType {
    /// Create a Decimal type with specified precision and scale
    pub fn decimal(precision: u8, scale: u8) -> Self {
        ValueType::Decimal { precision, scale }
    }

    /// Create a Geometry type of the given class
    pub fn geometry(kind: GeometryKind) -> Self {
        ValueType::Geometry { kind }
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self, ValueType::Geometry { .. })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Integer | ValueType::Double | ValueType::Decimal { .. }
        )
    }
}

// ============================================================================
// Values
// ============================================================================

/// A single attribute, key or literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
    Json(serde_json::Value),
    Geometry(Geometry<f64>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_geometry(&self) -> Option<&Geometry<f64>> {
        match self {
            Value::Geometry(g) => Some(g),
            _ => None,
        }
    }

    /// Numeric view of the value, parsing text when it holds a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Decimal(d) => d.to_f64(),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Name of the value's variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "string",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::Binary(_) => "binary",
            Value::Json(_) => "json",
            Value::Geometry(_) => "geometry",
        }
    }

    /// Whether the value already has the representation of the given type
    pub fn matches_type(&self, value_type: &ValueType) -> bool {
        if let (Value::Text(s), ValueType::Uuid) = (self, value_type) {
            return Uuid::parse_str(s).is_ok_and(|uuid| uuid.hyphenated().to_string() == *s);
        }
        matches!(
            (self, value_type),
            (Value::Null, _)
                | (Value::Text(_), ValueType::String)
                | (Value::Integer(_), ValueType::Integer)
                | (Value::Double(_), ValueType::Double)
                | (Value::Decimal(_), ValueType::Decimal { .. })
                | (Value::Boolean(_), ValueType::Boolean)
                | (Value::Date(_), ValueType::Date)
                | (Value::Timestamp(_), ValueType::Timestamp)
                | (Value::Binary(_), ValueType::Binary)
                | (Value::Json(_), ValueType::Json)
                | (Value::Geometry(_), ValueType::Geometry { .. })
        )
    }

    /// Parse the string form of a value as the given type
    pub fn parse(text: &str, value_type: &ValueType) -> Result<Value> {
        let invalid = |e: &dyn fmt::Display| {
            FeatureStoreError::decoding(format!(
                "Cannot convert '{}' to {:?}: {}",
                text, value_type, e
            ))
        };

        Ok(match value_type {
            ValueType::String => Value::Text(text.to_string()),
            ValueType::Integer => Value::Integer(text.trim().parse::<i64>().map_err(|e| invalid(&e))?),
            ValueType::Double => Value::Double(text.trim().parse::<f64>().map_err(|e| invalid(&e))?),
            ValueType::Decimal { .. } => {
                Value::Decimal(text.trim().parse::<Decimal>().map_err(|e| invalid(&e))?)
            }
            ValueType::Boolean => match text.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "t" => Value::Boolean(true),
                "false" | "0" | "no" | "f" => Value::Boolean(false),
                _ => return Err(invalid(&"not a boolean")),
            },
            ValueType::Date => Value::Date(
                NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|e| invalid(&e))?,
            ),
            ValueType::Timestamp => Value::Timestamp(parse_timestamp(text.trim()).ok_or_else(
                || invalid(&"expected RFC 3339 or 'YYYY-MM-DD HH:MM:SS'"),
            )?),
            ValueType::Binary => Value::Binary(text.as_bytes().to_vec()),
            ValueType::Uuid => Value::Text(
                Uuid::parse_str(text.trim())
                    .map_err(|e| invalid(&e))?
                    .hyphenated()
                    .to_string(),
            ),
            ValueType::Json => {
                Value::Json(serde_json::from_str(text).map_err(|e| invalid(&e))?)
            }
            ValueType::Geometry { .. } => Value::Geometry(geometry::from_wkt(text)?),
        })
    }

    /// Convert this value to the given type
    ///
    /// Text is parsed, numbers are widened or narrowed when lossless enough to
    /// round-trip, and everything else must already match the target type.
    pub fn convert_to(&self, value_type: &ValueType) -> Result<Value> {
        if self.matches_type(value_type) {
            return Ok(self.clone());
        }

        let mismatch = || {
            FeatureStoreError::decoding(format!(
                "Cannot convert {} value {} to {:?}",
                self.type_name(),
                self,
                value_type
            ))
        };

        match (self, value_type) {
            (Value::Text(s), ty) => Value::parse(s, ty),
            (_, ValueType::String) => Ok(Value::Text(self.to_string())),
            (Value::Integer(i), ValueType::Double) => Ok(Value::Double(*i as f64)),
            (Value::Integer(i), ValueType::Decimal { .. }) => Ok(Value::Decimal(Decimal::from(*i))),
            (Value::Double(d), ValueType::Integer)
                if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d < i64::MAX as f64 =>
            {
                Ok(Value::Integer(*d as i64))
            }
            (Value::Double(d), ValueType::Decimal { .. }) => Decimal::from_f64(*d)
                .map(Value::Decimal)
                .ok_or_else(mismatch),
            (Value::Decimal(d), ValueType::Double) => {
                d.to_f64().map(Value::Double).ok_or_else(mismatch)
            }
            (Value::Decimal(d), ValueType::Integer) if d.fract().is_zero() => {
                d.to_i64().map(Value::Integer).ok_or_else(mismatch)
            }
            (Value::Integer(i), ValueType::Boolean) if *i == 0 || *i == 1 => {
                Ok(Value::Boolean(*i == 1))
            }
            (Value::Date(d), ValueType::Timestamp) => d
                .and_hms_opt(0, 0, 0)
                .map(|dt| Value::Timestamp(dt.and_utc()))
                .ok_or_else(mismatch),
            (Value::Timestamp(ts), ValueType::Date) => Ok(Value::Date(ts.date_naive())),
            _ => Err(mismatch()),
        }
    }

    /// Order two values, coercing numbers and text-encoded numbers
    ///
    /// Returns `None` when the values are not comparable (including nulls).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::Geometry(a), Value::Geometry(b)) => (a == b).then_some(Ordering::Equal),
            (Value::Json(a), Value::Json(b)) => (a == b).then_some(Ordering::Equal),
            (Value::Date(_), Value::Timestamp(_)) | (Value::Timestamp(_), Value::Date(_)) => {
                let a = self.convert_to(&ValueType::Timestamp).ok()?;
                let b = other.convert_to(&ValueType::Timestamp).ok()?;
                a.compare(&b)
            }
            (Value::Text(s), typed) | (typed, Value::Text(s))
                if !matches!(typed, Value::Text(_)) =>
            {
                let parsed = Value::Text(s.clone()).convert_to(&typed.natural_type()?).ok()?;
                if matches!(self, Value::Text(_)) {
                    parsed.compare(other)
                } else {
                    self.compare(&parsed)
                }
            }
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }

    /// The value type a value of this variant naturally belongs to
    pub fn natural_type(&self) -> Option<ValueType> {
        Some(match self {
            Value::Null => return None,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Double(_) => ValueType::Double,
            Value::Decimal(_) => ValueType::decimal(38, 10),
            Value::Text(_) => ValueType::String,
            Value::Date(_) => ValueType::Date,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Binary(_) => ValueType::Binary,
            Value::Json(_) => ValueType::Json,
            Value::Geometry(g) => ValueType::geometry(GeometryKind::of(g)),
        })
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|ts| ts.and_utc())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
            Value::Binary(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Value::Json(json) => write!(f, "{}", json),
            Value::Geometry(g) => f.write_str(&geometry::to_wkt(g)),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Geometry<f64>> for Value {
    fn from(value: Geometry<f64>) -> Self {
        Value::Geometry(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Attribute Descriptors
// ============================================================================

fn default_nullable() -> bool {
    true
}

/// Named, typed attribute of a feature schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeDescriptor {
    /// Attribute name (also the column name)
    pub name: String,

    /// Value type of the attribute
    #[serde(flatten)]
    pub value_type: ValueType,

    /// Whether the attribute allows null values (default: true)
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Declared maximum length for text attributes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,

    /// Coordinate reference system code of a geometry attribute (e.g. "EPSG:4326")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,

    /// Backend spatial reference id of a geometry attribute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srid: Option<i32>,
}

impl AttributeDescriptor {
    /// Create a new attribute descriptor with a name and type
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            nullable: true,
            length: None,
            crs: None,
            srid: None,
        }
    }

    /// Create a geometry attribute in the given spatial reference system
    ///
    /// The CRS code is derived from the SRID as `EPSG:<srid>`.
    pub fn geometry(name: impl Into<String>, kind: GeometryKind, srid: i32) -> Self {
        Self {
            crs: Some(format!("EPSG:{}", srid)),
            srid: Some(srid),
            ..Self::new(name, ValueType::geometry(kind))
        }
    }

    /// Set the attribute as non-nullable
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Restrict the length of a text attribute
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set the coordinate reference system code
    pub fn crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    pub fn is_geometry(&self) -> bool {
        self.value_type.is_geometry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;

    // =========================================================================
    // Conversion Tests
    // =========================================================================

    #[test]
    fn test_parse_integer() {
        assert_eq!(
            Value::parse("42", &ValueType::Integer).unwrap(),
            Value::Integer(42)
        );
        assert!(Value::parse("4x2", &ValueType::Integer).is_err());
    }

    #[test]
    fn test_parse_boolean_variants() {
        assert_eq!(
            Value::parse("yes", &ValueType::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            Value::parse("0", &ValueType::Boolean).unwrap(),
            Value::Boolean(false)
        );
        assert!(Value::parse("maybe", &ValueType::Boolean).is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = Value::parse("2024-01-15T10:30:00Z", &ValueType::Timestamp).unwrap();
        let plain = Value::parse("2024-01-15 10:30:00", &ValueType::Timestamp).unwrap();
        assert_eq!(rfc, plain);
    }

    #[test]
    fn test_parse_geometry() {
        let value = Value::parse("POINT(1 2)", &ValueType::geometry(GeometryKind::Point)).unwrap();
        assert_eq!(value, Value::Geometry(point!(x: 1.0, y: 2.0).into()));
    }

    #[test]
    fn test_convert_numeric() {
        assert_eq!(
            Value::Integer(3).convert_to(&ValueType::Double).unwrap(),
            Value::Double(3.0)
        );
        assert_eq!(
            Value::Double(3.0).convert_to(&ValueType::Integer).unwrap(),
            Value::Integer(3)
        );
        assert!(Value::Double(3.5).convert_to(&ValueType::Integer).is_err());
    }

    #[test]
    fn test_convert_to_string_uses_display() {
        assert_eq!(
            Value::Integer(42).convert_to(&ValueType::String).unwrap(),
            Value::Text("42".into())
        );
    }

    #[test]
    fn test_convert_mismatch_is_decoding_error() {
        let err = Value::Boolean(true)
            .convert_to(&ValueType::Date)
            .unwrap_err();
        assert!(err.is_decoding());
    }

    #[test]
    fn test_convert_out_of_range_double_to_integer() {
        assert!(Value::Double(1e20).convert_to(&ValueType::Integer).is_err());
        assert!(Value::Double(-1e20).convert_to(&ValueType::Integer).is_err());
        assert_eq!(
            Value::Double(-4096.0).convert_to(&ValueType::Integer).unwrap(),
            Value::Integer(-4096)
        );
    }

    #[test]
    fn test_uuid_values_are_canonical_text() {
        let value = Value::parse("  6F9619FF-8B86-D011-B42D-00C04FC964FF", &ValueType::Uuid).unwrap();
        assert_eq!(value, Value::from("6f9619ff-8b86-d011-b42d-00c04fc964ff"));
        assert!(value.matches_type(&ValueType::Uuid));
        assert!(!Value::from("6F9619FF-8B86-D011-B42D-00C04FC964FF").matches_type(&ValueType::Uuid));
        assert!(Value::from("not-a-uuid").convert_to(&ValueType::Uuid).unwrap_err().is_decoding());
    }

    #[test]
    fn test_parse_json() {
        let value = Value::parse(r#"{"lanes": 2}"#, &ValueType::Json).unwrap();
        assert_eq!(value, Value::Json(serde_json::json!({"lanes": 2})));
        assert!(Value::parse("{not json", &ValueType::Json).unwrap_err().is_decoding());
    }

    // =========================================================================
    // Comparison Tests
    // =========================================================================

    #[test]
    fn test_compare_mixed_numbers() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Decimal(Decimal::new(25, 1)).compare(&Value::Double(2.5)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_compare_text_against_number() {
        assert_eq!(
            Value::Text("10".into()).compare(&Value::Integer(9)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Integer(9).compare(&Value::Text("10".into())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_compare_null_is_incomparable() {
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    // =========================================================================
    // AttributeDescriptor Tests
    // =========================================================================

    #[test]
    fn test_attribute_descriptor_new() {
        let attr = AttributeDescriptor::new("name", ValueType::String);
        assert_eq!(attr.name, "name");
        assert!(attr.nullable);
        assert!(attr.length.is_none());
        assert!(!attr.is_geometry());
    }

    #[test]
    fn test_geometry_descriptor() {
        let attr = AttributeDescriptor::geometry("geom", GeometryKind::Point, 4326).not_null();
        assert!(attr.is_geometry());
        assert_eq!(attr.srid, Some(4326));
        assert_eq!(attr.crs.as_deref(), Some("EPSG:4326"));
        assert!(!attr.nullable);
    }

    #[test]
    fn test_attribute_serialization() {
        let attr = AttributeDescriptor::new("code", ValueType::String).length(12);
        let json = serde_json::to_string(&attr).unwrap();
        assert!(json.contains("\"type\":\"string\""));
        assert!(json.contains("\"length\":12"));

        let back: AttributeDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attr);
    }

    #[test]
    fn test_geometry_kind_names() {
        assert_eq!(GeometryKind::from_ogc_name("multipolygon"), Some(GeometryKind::MultiPolygon));
        assert_eq!(GeometryKind::LineString.ogc_name(), "LINESTRING");
        assert_eq!(GeometryKind::from_ogc_name("circle"), None);
    }
}
