//! Filter expressions
//!
//! A [`Filter`] is a predicate tree over [`Expr`] operands (literals, property
//! references, function calls and arithmetic). Filters are split by
//! [`splitter`] into a part the backend evaluates and a part evaluated in
//! memory by [`eval`].

pub mod capabilities;
pub mod eval;
pub mod functions;
pub mod simplify;
pub mod splitter;

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use geo::Geometry;

use crate::geometry::{self, Envelope};
use crate::types::Value;

pub use capabilities::{Capabilities, Operator};
pub use eval::FilterEvaluator;
pub use functions::FunctionRegistry;
pub use simplify::simplify;
pub use splitter::{FilterSplitter, SplitFilter};

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }

    pub const ALL: [ComparisonOp; 6] = [
        ComparisonOp::Eq,
        ComparisonOp::Ne,
        ComparisonOp::Lt,
        ComparisonOp::Le,
        ComparisonOp::Gt,
        ComparisonOp::Ge,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithmeticOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
        }
    }

    pub const ALL: [ArithmeticOp; 4] = [
        ArithmeticOp::Add,
        ArithmeticOp::Sub,
        ArithmeticOp::Mul,
        ArithmeticOp::Div,
    ];
}

/// Binary spatial predicates between a geometry property and a literal geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialOp {
    /// Bounding boxes interact
    BBox,
    Intersects,
    Contains,
    Within,
    Disjoint,
    Equals,
    Touches,
    Crosses,
    Overlaps,
}

impl SpatialOp {
    pub fn name(&self) -> &'static str {
        match self {
            SpatialOp::BBox => "BBOX",
            SpatialOp::Intersects => "INTERSECTS",
            SpatialOp::Contains => "CONTAINS",
            SpatialOp::Within => "WITHIN",
            SpatialOp::Disjoint => "DISJOINT",
            SpatialOp::Equals => "EQUALS",
            SpatialOp::Touches => "TOUCHES",
            SpatialOp::Crosses => "CROSSES",
            SpatialOp::Overlaps => "OVERLAPS",
        }
    }

    pub const ALL: [SpatialOp; 9] = [
        SpatialOp::BBox,
        SpatialOp::Intersects,
        SpatialOp::Contains,
        SpatialOp::Within,
        SpatialOp::Disjoint,
        SpatialOp::Equals,
        SpatialOp::Touches,
        SpatialOp::Crosses,
        SpatialOp::Overlaps,
    ];
}

// ============================================================================
// Expressions
// ============================================================================

/// Operand of a filter
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Property(String),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn property(name: impl Into<String>) -> Self {
        Expr::Property(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn arithmetic(op: ArithmeticOp, left: Expr, right: Expr) -> Self {
        Expr::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn collect_properties<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Property(name) => {
                out.insert(name);
            }
            Expr::Function { args, .. } => args.iter().for_each(|a| a.collect_properties(out)),
            Expr::Arithmetic { left, right, .. } => {
                left.collect_properties(out);
                right.collect_properties(out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::Text(s)) => write!(f, "'{}'", s.replace('\'', "''")),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Property(name) => f.write_str(name),
            Expr::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Arithmetic { op, left, right } => {
                write!(f, "({} {} {})", left, op.as_sql(), right)
            }
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Predicate tree
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Matches everything
    #[default]
    Include,
    /// Matches nothing
    Exclude,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        op: ComparisonOp,
        left: Expr,
        right: Expr,
    },
    Between {
        expr: Expr,
        lower: Expr,
        upper: Expr,
    },
    /// SQL-style pattern: `%` matches any run, `_` one character, `\` escapes
    Like {
        expr: Expr,
        pattern: String,
        match_case: bool,
    },
    IsNull(Expr),
    /// Matches features whose identity is in the set
    Id(BTreeSet<String>),
    Spatial {
        op: SpatialOp,
        property: String,
        geometry: Geometry<f64>,
    },
}

impl Filter {
    pub fn is_include(&self) -> bool {
        matches!(self, Filter::Include)
    }

    pub fn is_exclude(&self) -> bool {
        matches!(self, Filter::Exclude)
    }

    /// Conjunction of `self` and `other`, collapsing trivial sides
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Include, f) | (f, Filter::Include) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Or(mut a), Filter::Or(b)) => {
                a.extend(b);
                Filter::Or(a)
            }
            (Filter::Or(mut a), f) => {
                a.push(f);
                Filter::Or(a)
            }
            (a, b) => Filter::Or(vec![a, b]),
        }
    }

    pub fn negate(self) -> Filter {
        Filter::Not(Box::new(self))
    }

    pub fn compare(op: ComparisonOp, left: Expr, right: Expr) -> Filter {
        Filter::Compare { op, left, right }
    }

    /// `property = value`
    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Filter {
        Self::compare(ComparisonOp::Eq, Expr::property(property), Expr::literal(value))
    }

    /// `property <> value`
    pub fn ne(property: impl Into<String>, value: impl Into<Value>) -> Filter {
        Self::compare(ComparisonOp::Ne, Expr::property(property), Expr::literal(value))
    }

    /// `property < value`
    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Filter {
        Self::compare(ComparisonOp::Lt, Expr::property(property), Expr::literal(value))
    }

    /// `property <= value`
    pub fn le(property: impl Into<String>, value: impl Into<Value>) -> Filter {
        Self::compare(ComparisonOp::Le, Expr::property(property), Expr::literal(value))
    }

    /// `property > value`
    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Filter {
        Self::compare(ComparisonOp::Gt, Expr::property(property), Expr::literal(value))
    }

    /// `property >= value`
    pub fn ge(property: impl Into<String>, value: impl Into<Value>) -> Filter {
        Self::compare(ComparisonOp::Ge, Expr::property(property), Expr::literal(value))
    }

    pub fn between(
        property: impl Into<String>,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
    ) -> Filter {
        Filter::Between {
            expr: Expr::property(property),
            lower: Expr::literal(lower),
            upper: Expr::literal(upper),
        }
    }

    pub fn like(property: impl Into<String>, pattern: impl Into<String>, match_case: bool) -> Filter {
        Filter::Like {
            expr: Expr::property(property),
            pattern: pattern.into(),
            match_case,
        }
    }

    pub fn is_null(property: impl Into<String>) -> Filter {
        Filter::IsNull(Expr::property(property))
    }

    pub fn ids<I, S>(ids: I) -> Filter
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Id(ids.into_iter().map(Into::into).collect())
    }

    pub fn spatial(op: SpatialOp, property: impl Into<String>, geometry: Geometry<f64>) -> Filter {
        Filter::Spatial {
            op,
            property: property.into(),
            geometry,
        }
    }

    /// Bounding box filter over an envelope; an empty envelope matches nothing
    pub fn bbox(property: impl Into<String>, envelope: &Envelope) -> Filter {
        match envelope.to_rect() {
            Some(rect) => Self::spatial(SpatialOp::BBox, property, Geometry::Rect(rect)),
            None => Filter::Exclude,
        }
    }

    /// Names of every property the filter reads
    pub fn properties(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_properties(&mut out);
        out
    }

    fn collect_properties<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Filter::Include | Filter::Exclude | Filter::Id(_) => {}
            Filter::And(children) | Filter::Or(children) => {
                children.iter().for_each(|c| c.collect_properties(out))
            }
            Filter::Not(inner) => inner.collect_properties(out),
            Filter::Compare { left, right, .. } => {
                left.collect_properties(out);
                right.collect_properties(out);
            }
            Filter::Between { expr, lower, upper } => {
                expr.collect_properties(out);
                lower.collect_properties(out);
                upper.collect_properties(out);
            }
            Filter::Like { expr, .. } | Filter::IsNull(expr) => expr.collect_properties(out),
            Filter::Spatial { property, .. } => {
                out.insert(property);
            }
        }
    }

    /// Names of every function the filter calls
    pub fn functions(&self) -> HashSet<String> {
        fn walk_expr(expr: &Expr, out: &mut HashSet<String>) {
            match expr {
                Expr::Function { name, args } => {
                    out.insert(name.clone());
                    args.iter().for_each(|a| walk_expr(a, out));
                }
                Expr::Arithmetic { left, right, .. } => {
                    walk_expr(left, out);
                    walk_expr(right, out);
                }
                _ => {}
            }
        }
        fn walk(filter: &Filter, out: &mut HashSet<String>) {
            match filter {
                Filter::And(c) | Filter::Or(c) => c.iter().for_each(|f| walk(f, out)),
                Filter::Not(inner) => walk(inner, out),
                Filter::Compare { left, right, .. } => {
                    walk_expr(left, out);
                    walk_expr(right, out);
                }
                Filter::Between { expr, lower, upper } => {
                    walk_expr(expr, out);
                    walk_expr(lower, out);
                    walk_expr(upper, out);
                }
                Filter::Like { expr, .. } | Filter::IsNull(expr) => walk_expr(expr, out),
                _ => {}
            }
        }
        let mut out = HashSet::new();
        walk(self, &mut out);
        out
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Filter], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", sep)?;
        }
        write!(f, "{}", child)?;
    }
    f.write_str(")")
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Include => f.write_str("INCLUDE"),
            Filter::Exclude => f.write_str("EXCLUDE"),
            Filter::And(children) => write_joined(f, children, "AND"),
            Filter::Or(children) => write_joined(f, children, "OR"),
            Filter::Not(inner) => write!(f, "NOT {}", inner),
            Filter::Compare { op, left, right } => write!(f, "{} {} {}", left, op.as_sql(), right),
            Filter::Between { expr, lower, upper } => {
                write!(f, "{} BETWEEN {} AND {}", expr, lower, upper)
            }
            Filter::Like {
                expr,
                pattern,
                match_case,
            } => {
                let op = if *match_case { "LIKE" } else { "ILIKE" };
                write!(f, "{} {} '{}'", expr, op, pattern.replace('\'', "''"))
            }
            Filter::IsNull(expr) => write!(f, "{} IS NULL", expr),
            Filter::Id(ids) => {
                let ids: Vec<_> = ids.iter().map(|id| format!("'{}'", id)).collect();
                write!(f, "IN ({})", ids.join(", "))
            }
            Filter::Spatial {
                op,
                property,
                geometry,
            } => write!(f, "{}({}, {})", op.name(), property, geometry::to_wkt(geometry)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;

    #[test]
    fn test_and_collapses_include() {
        let f = Filter::Include.and(Filter::eq("a", 1));
        assert_eq!(f, Filter::eq("a", 1));

        let f = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));
        assert!(matches!(f, Filter::And(ref c) if c.len() == 3));
    }

    #[test]
    fn test_properties_collected() {
        let f = Filter::eq("name", "a")
            .or(Filter::compare(
                ComparisonOp::Gt,
                Expr::function("strLength", vec![Expr::property("title")]),
                Expr::literal(3),
            ))
            .and(Filter::spatial(
                SpatialOp::Intersects,
                "geom",
                point!(x: 0.0, y: 0.0).into(),
            ));
        let props: Vec<_> = f.properties().into_iter().collect();
        assert_eq!(props, vec!["geom", "name", "title"]);
        assert!(f.functions().contains("strLength"));
    }

    #[test]
    fn test_bbox_of_empty_envelope_excludes() {
        assert_eq!(Filter::bbox("geom", &Envelope::empty()), Filter::Exclude);
        assert!(matches!(
            Filter::bbox("geom", &Envelope::new(0.0, 0.0, 1.0, 1.0)),
            Filter::Spatial { op: SpatialOp::BBox, .. }
        ));
    }

    #[test]
    fn test_display() {
        let f = Filter::eq("name", "O'Hare").and(Filter::between("rank", 1, 5).negate());
        assert_eq!(
            f.to_string(),
            "(name = 'O''Hare' AND NOT rank BETWEEN 1 AND 5)"
        );
    }
}
