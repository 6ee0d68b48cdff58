//! In-memory filter evaluation over decoded features

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use geo::{Geometry, Relate};
use regex::Regex;

use super::{ArithmeticOp, ComparisonOp, Expr, Filter, FunctionRegistry, SpatialOp};
use crate::error::{FeatureStoreError, Result};
use crate::feature::Feature;
use crate::geometry::Envelope;
use crate::types::Value;

/// Evaluates post-filters against features
///
/// Evaluation follows SQL three-valued logic: a comparison involving null is
/// unknown, `NOT` of unknown stays unknown, and a feature matches only when
/// the whole filter is true. Missing properties read as null.
#[derive(Debug, Clone)]
pub struct FilterEvaluator {
    functions: FunctionRegistry,
    patterns: HashMap<(String, bool), Regex>,
}

impl FilterEvaluator {
    pub fn new(functions: FunctionRegistry) -> Self {
        Self {
            functions,
            patterns: HashMap::new(),
        }
    }

    /// Whether a feature satisfies a filter
    pub fn matches(&mut self, filter: &Filter, feature: &Feature) -> Result<bool> {
        Ok(self.truth(filter, feature)? == Some(true))
    }

    /// Truth value of a filter; `None` is SQL's unknown
    fn truth(&mut self, filter: &Filter, feature: &Feature) -> Result<Option<bool>> {
        Ok(match filter {
            Filter::Include => Some(true),
            Filter::Exclude => Some(false),
            Filter::And(children) => {
                let mut result = Some(true);
                for child in children {
                    match self.truth(child, feature)? {
                        Some(false) => return Ok(Some(false)),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Filter::Or(children) => {
                let mut result = Some(false);
                for child in children {
                    match self.truth(child, feature)? {
                        Some(true) => return Ok(Some(true)),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Filter::Not(inner) => self.truth(inner, feature)?.map(|t| !t),
            Filter::Compare { op, left, right } => {
                let left = self.evaluate(left, feature)?;
                let right = self.evaluate(right, feature)?;
                compare(*op, &left, &right)
            }
            Filter::Between { expr, lower, upper } => {
                let value = self.evaluate(expr, feature)?;
                let lower = self.evaluate(lower, feature)?;
                let upper = self.evaluate(upper, feature)?;
                match (
                    compare(ComparisonOp::Ge, &value, &lower),
                    compare(ComparisonOp::Le, &value, &upper),
                ) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }
            }
            Filter::Like {
                expr,
                pattern,
                match_case,
            } => match self.evaluate(expr, feature)? {
                Value::Null => None,
                value => Some(self.pattern(pattern, *match_case)?.is_match(&value.to_string())),
            },
            Filter::IsNull(expr) => Some(self.evaluate(expr, feature)?.is_null()),
            Filter::Id(ids) => Some(ids.contains(feature.id())),
            Filter::Spatial {
                op,
                property,
                geometry,
            } => match feature.get(property) {
                Some(Value::Geometry(value)) => Some(spatial_matches(*op, value, geometry)),
                Some(Value::Null) | None => None,
                Some(other) => {
                    return Err(FeatureStoreError::invalid_filter(format!(
                        "Spatial filter on non-geometry property '{}' ({})",
                        property,
                        other.type_name()
                    )));
                }
            },
        })
    }

    /// Evaluate an operand against a feature
    pub fn evaluate(&self, expr: &Expr, feature: &Feature) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Property(name) => Ok(feature.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Function { name, args } => {
                let args = args
                    .iter()
                    .map(|a| self.evaluate(a, feature))
                    .collect::<Result<Vec<_>>>()?;
                self.functions.call(name, &args)
            }
            Expr::Arithmetic { op, left, right } => {
                let left = self.evaluate(left, feature)?;
                let right = self.evaluate(right, feature)?;
                arithmetic(*op, &left, &right)
            }
        }
    }

    fn pattern(&mut self, pattern: &str, match_case: bool) -> Result<&Regex> {
        let regex = match self.patterns.entry((pattern.to_string(), match_case)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(like_to_regex(pattern, match_case)?),
        };
        Ok(regex)
    }
}

fn compare(op: ComparisonOp, left: &Value, right: &Value) -> Option<bool> {
    if left.is_null() || right.is_null() {
        return None;
    }
    Some(match (op, left.compare(right)) {
        (ComparisonOp::Eq, Some(ord)) => ord == Ordering::Equal,
        (ComparisonOp::Ne, Some(ord)) => ord != Ordering::Equal,
        (ComparisonOp::Lt, Some(ord)) => ord == Ordering::Less,
        (ComparisonOp::Le, Some(ord)) => ord != Ordering::Greater,
        (ComparisonOp::Gt, Some(ord)) => ord == Ordering::Greater,
        (ComparisonOp::Ge, Some(ord)) => ord != Ordering::Less,
        // Incomparable but non-null values are simply different
        (ComparisonOp::Ne, None) => true,
        (_, None) => false,
    })
}

fn arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        let exact = match op {
            ArithmeticOp::Add => a.checked_add(*b),
            ArithmeticOp::Sub => a.checked_sub(*b),
            ArithmeticOp::Mul => a.checked_mul(*b),
            ArithmeticOp::Div => None,
        };
        if let Some(result) = exact {
            return Ok(Value::Integer(result));
        }
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(FeatureStoreError::invalid_filter(format!(
            "Cannot apply '{}' to {} and {}",
            op.as_sql(),
            left.type_name(),
            right.type_name()
        )));
    };

    Ok(match op {
        ArithmeticOp::Add => Value::Double(a + b),
        ArithmeticOp::Sub => Value::Double(a - b),
        ArithmeticOp::Mul => Value::Double(a * b),
        ArithmeticOp::Div if b == 0.0 => Value::Null,
        ArithmeticOp::Div => Value::Double(a / b),
    })
}

fn spatial_matches(op: SpatialOp, value: &Geometry<f64>, other: &Geometry<f64>) -> bool {
    if op == SpatialOp::BBox {
        return Envelope::of(value).intersects(&Envelope::of(other));
    }

    let matrix = value.relate(other);
    match op {
        SpatialOp::BBox | SpatialOp::Intersects => matrix.is_intersects(),
        SpatialOp::Contains => matrix.is_contains(),
        SpatialOp::Within => matrix.is_within(),
        SpatialOp::Disjoint => matrix.is_disjoint(),
        SpatialOp::Equals => matrix.is_equal_topo(),
        SpatialOp::Touches => matrix.is_touches(),
        SpatialOp::Crosses => matrix.is_crosses(),
        SpatialOp::Overlaps => matrix.is_overlaps(),
    }
}

/// Translate a SQL LIKE pattern into an anchored regular expression
pub fn like_to_regex(pattern: &str, match_case: bool) -> Result<Regex> {
    let mut out = String::from(if match_case { "^(?s)" } else { "^(?si)" });
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(&regex::escape("\\")),
            },
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');

    Regex::new(&out).map_err(|e| {
        FeatureStoreError::invalid_filter(format!("Invalid LIKE pattern '{}': {}", pattern, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FeatureSchema;
    use crate::types::{AttributeDescriptor, GeometryKind, ValueType};
    use geo::{point, polygon};
    use std::sync::Arc;

    fn feature(name: &str, rank: Option<i64>) -> Feature {
        let schema = Arc::new(FeatureSchema::new(
            "places",
            vec![
                AttributeDescriptor::new("name", ValueType::String),
                AttributeDescriptor::new("rank", ValueType::Integer),
                AttributeDescriptor::geometry("geom", GeometryKind::Point, 4326),
            ],
        ));
        Feature::new(
            "places.1",
            schema,
            vec![
                Value::from(name),
                Value::from(rank),
                Value::Geometry(point!(x: 1.0, y: 1.0).into()),
            ],
        )
    }

    fn evaluator() -> FilterEvaluator {
        FilterEvaluator::new(FunctionRegistry::default())
    }

    // =========================================================================
    // Comparison Tests
    // =========================================================================

    #[test]
    fn test_compare_with_coercion() {
        let mut eval = evaluator();
        let f = feature("Oslo", Some(3));
        assert!(eval.matches(&Filter::eq("rank", 3.0), &f).unwrap());
        assert!(eval.matches(&Filter::gt("rank", "2"), &f).unwrap());
        assert!(!eval.matches(&Filter::lt("rank", 3), &f).unwrap());
    }

    #[test]
    fn test_null_comparison_is_unknown() {
        let mut eval = evaluator();
        let f = feature("Oslo", None);
        assert!(!eval.matches(&Filter::eq("rank", 1), &f).unwrap());
        assert!(!eval.matches(&Filter::ne("rank", 1), &f).unwrap());
        assert!(!eval.matches(&Filter::eq("rank", 1).negate(), &f).unwrap());
        assert!(eval.matches(&Filter::eq("rank", 1).or(Filter::Include), &f).unwrap());
        assert!(!eval.matches(&Filter::eq("rank", 1).or(Filter::Exclude).negate(), &f).unwrap());
        assert!(eval.matches(&Filter::is_null("rank"), &f).unwrap());
        assert!(eval.matches(&Filter::is_null("missing"), &f).unwrap());
    }

    #[test]
    fn test_between_and_logic() {
        let mut eval = evaluator();
        let f = feature("Oslo", Some(3));
        let filter = Filter::between("rank", 1, 3).and(Filter::eq("name", "Oslo").negate());
        assert!(!eval.matches(&filter, &f).unwrap());
        let filter = Filter::between("rank", 1, 3).or(Filter::Exclude);
        assert!(eval.matches(&filter, &f).unwrap());
    }

    // =========================================================================
    // LIKE Tests
    // =========================================================================

    #[test]
    fn test_like_wildcards() {
        let mut eval = evaluator();
        let f = feature("Oslo_city", Some(1));
        assert!(eval.matches(&Filter::like("name", "Os%", true), &f).unwrap());
        assert!(eval.matches(&Filter::like("name", "O_lo%", true), &f).unwrap());
        assert!(!eval.matches(&Filter::like("name", "os%", true), &f).unwrap());
        assert!(eval.matches(&Filter::like("name", "os%", false), &f).unwrap());
        assert!(eval.matches(&Filter::like("name", "Oslo\\_city", true), &f).unwrap());
        assert!(!eval.matches(&Filter::like("name", "Oslo\\_", true), &f).unwrap());
    }

    #[test]
    fn test_like_escapes_regex_metacharacters() {
        let regex = like_to_regex("a.b*(c)", true).unwrap();
        assert!(regex.is_match("a.b*(c)"));
        assert!(!regex.is_match("aXb*(c)"));
    }

    // =========================================================================
    // Function and Arithmetic Tests
    // =========================================================================

    #[test]
    fn test_function_call() {
        let mut eval = evaluator();
        let f = feature("Oslo", Some(1));
        let filter = Filter::compare(
            ComparisonOp::Eq,
            Expr::function("strLength", vec![Expr::property("name")]),
            Expr::literal(4),
        );
        assert!(eval.matches(&filter, &f).unwrap());
    }

    #[test]
    fn test_unknown_function_fails() {
        let mut eval = evaluator();
        let f = feature("Oslo", Some(1));
        let filter = Filter::compare(
            ComparisonOp::Gt,
            Expr::function("customFunc", vec![Expr::property("name")]),
            Expr::literal(3),
        );
        assert!(eval.matches(&filter, &f).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_arithmetic() {
        let eval = evaluator();
        let f = feature("Oslo", Some(4));
        let sum = Expr::arithmetic(ArithmeticOp::Add, Expr::property("rank"), Expr::literal(1));
        assert_eq!(eval.evaluate(&sum, &f).unwrap(), Value::Integer(5));
        let div = Expr::arithmetic(ArithmeticOp::Div, Expr::property("rank"), Expr::literal(8));
        assert_eq!(eval.evaluate(&div, &f).unwrap(), Value::Double(0.5));
        let bad = Expr::arithmetic(ArithmeticOp::Mul, Expr::property("name"), Expr::literal(2));
        assert!(eval.evaluate(&bad, &f).is_err());
    }

    // =========================================================================
    // Spatial and Id Tests
    // =========================================================================

    #[test]
    fn test_spatial_predicates() {
        let mut eval = evaluator();
        let f = feature("Oslo", Some(1));
        let square: Geometry<f64> =
            polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)].into();
        let far: Geometry<f64> = point!(x: 5.0, y: 5.0).into();

        assert!(eval.matches(&Filter::spatial(SpatialOp::Within, "geom", square.clone()), &f).unwrap());
        assert!(eval.matches(&Filter::spatial(SpatialOp::Intersects, "geom", square.clone()), &f).unwrap());
        assert!(!eval.matches(&Filter::spatial(SpatialOp::Contains, "geom", square), &f).unwrap());
        assert!(eval.matches(&Filter::spatial(SpatialOp::Disjoint, "geom", far), &f).unwrap());
        assert!(eval.matches(&Filter::bbox("geom", &Envelope::new(0.5, 0.5, 1.5, 1.5)), &f).unwrap());
    }

    #[test]
    fn test_spatial_on_non_geometry_fails() {
        let mut eval = evaluator();
        let f = feature("Oslo", Some(1));
        let filter = Filter::spatial(SpatialOp::Intersects, "name", point!(x: 0.0, y: 0.0).into());
        assert!(eval.matches(&filter, &f).is_err());
    }

    #[test]
    fn test_id_filter() {
        let mut eval = evaluator();
        let f = feature("Oslo", Some(1));
        assert!(eval.matches(&Filter::ids(["places.1", "places.2"]), &f).unwrap());
        assert!(!eval.matches(&Filter::ids(["places.3"]), &f).unwrap());
    }
}
