//! Splitting filters into a backend part and an in-memory part
//!
//! The input is simplified, then each conjunct is classified: a subtree is
//! pushed to the backend when every operator and function in it is listed in
//! the [`Capabilities`] and every property it reads exists. Everything else
//! is kept, unevaluated, for in-memory filtering. The conjunction of both
//! halves is always equivalent to the input.
//!
//! Id filters are rewritten into primary key comparisons on the pushed side
//! only; the in-memory side keeps the id set, re-encoded into the form
//! feature ids take, and matches on feature ids.

use super::capabilities::{Capabilities, Operator};
use super::simplify::simplify;
use super::{ComparisonOp, Expr, Filter};
use crate::error::Result;
use crate::identity::IdentityCodec;
use crate::schema::{FeatureSchema, PrimaryKey};

/// The two halves of a split filter
#[derive(Debug, Clone, PartialEq)]
pub struct SplitFilter {
    /// Evaluated by the backend
    pub pre: Filter,
    /// Evaluated in memory over the backend's results
    pub post: Filter,
}

impl SplitFilter {
    /// Whether rows must be filtered in memory
    pub fn requires_post_filter(&self) -> bool {
        !self.post.is_include()
    }
}

/// Splits filters against a capability model
#[derive(Debug, Clone)]
pub struct FilterSplitter<'a> {
    capabilities: &'a Capabilities,
    schema: Option<&'a FeatureSchema>,
    primary_key: Option<&'a PrimaryKey>,
    codec: IdentityCodec,
}

impl<'a> FilterSplitter<'a> {
    pub fn new(capabilities: &'a Capabilities) -> Self {
        Self {
            capabilities,
            schema: None,
            primary_key: None,
            codec: IdentityCodec::lenient(),
        }
    }

    /// Only push filters whose properties exist in this schema
    pub fn with_schema(mut self, schema: &'a FeatureSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Rewrite id filters into comparisons over these key columns
    pub fn with_primary_key(mut self, primary_key: &'a PrimaryKey, codec: IdentityCodec) -> Self {
        self.primary_key = Some(primary_key);
        self.codec = codec;
        self
    }

    /// Split a filter into its pushed and in-memory halves
    ///
    /// Fails only when a feature id cannot be decoded under a strict codec.
    pub fn split(&self, filter: &Filter) -> Result<SplitFilter> {
        let normalized = simplify(filter);

        let mut pre = Vec::new();
        let mut post = Vec::new();
        let conjuncts = match normalized {
            Filter::And(children) => children,
            other => vec![other],
        };
        for conjunct in conjuncts {
            match self.lower(&conjunct)? {
                Some(pushed) => pre.push(pushed),
                None => post.push(self.canonical_ids(conjunct)),
            }
        }

        Ok(SplitFilter {
            pre: simplify(&Filter::And(pre)),
            post: simplify(&Filter::And(post)),
        })
    }

    /// The backend form of a subtree, or `None` when it cannot be pushed
    fn lower(&self, filter: &Filter) -> Result<Option<Filter>> {
        if !self.capabilities.supports(Operator::of(filter)) && !matches!(filter, Filter::Id(_)) {
            return Ok(None);
        }

        let lowered = match filter {
            Filter::And(children) | Filter::Or(children) => {
                let mut out = Vec::with_capacity(children.len());
                for child in children {
                    match self.lower(child)? {
                        Some(c) => out.push(c),
                        None => return Ok(None),
                    }
                }
                if matches!(filter, Filter::And(_)) {
                    Filter::And(out)
                } else {
                    Filter::Or(out)
                }
            }
            Filter::Not(inner) => match self.lower(inner)? {
                Some(inner) => Filter::Not(Box::new(inner)),
                None => return Ok(None),
            },
            Filter::Compare { left, right, .. } => {
                if !(self.expr_supported(left) && self.expr_supported(right)) {
                    return Ok(None);
                }
                filter.clone()
            }
            Filter::Between { expr, lower, upper } => {
                if ![expr, lower, upper].iter().all(|e| self.expr_supported(e)) {
                    return Ok(None);
                }
                filter.clone()
            }
            Filter::Like { expr, .. } | Filter::IsNull(expr) => {
                if !self.expr_supported(expr) {
                    return Ok(None);
                }
                filter.clone()
            }
            Filter::Spatial { property, .. } => {
                let is_geometry = self
                    .schema
                    .map(|s| s.attribute(property).is_some_and(|a| a.is_geometry()))
                    .unwrap_or(true);
                if !is_geometry {
                    return Ok(None);
                }
                filter.clone()
            }
            Filter::Id(ids) => {
                if self.capabilities.supports(Operator::Id) {
                    return Ok(Some(filter.clone()));
                }
                return self.rewrite_ids(ids);
            }
            Filter::Include | Filter::Exclude => filter.clone(),
        };
        Ok(Some(lowered))
    }

    /// Re-encode the ids of every id set in `filter` the way features are
    /// identified, so prefixed or percent-encoded ids match in memory
    fn canonical_ids(&self, filter: Filter) -> Filter {
        let Some(key) = self.primary_key.filter(|k| !k.is_empty()) else {
            return filter;
        };
        match filter {
            Filter::And(children) => {
                Filter::And(children.into_iter().map(|c| self.canonical_ids(c)).collect())
            }
            Filter::Or(children) => {
                Filter::Or(children.into_iter().map(|c| self.canonical_ids(c)).collect())
            }
            Filter::Not(inner) => Filter::Not(Box::new(self.canonical_ids(*inner))),
            Filter::Id(ids) => {
                let codec = IdentityCodec::lenient();
                Filter::Id(
                    ids.into_iter()
                        .map(|fid| {
                            codec
                                .decode(key, &fid)
                                .and_then(|values| codec.encode(key, &values))
                                .unwrap_or(fid)
                        })
                        .collect(),
                )
            }
            other => other,
        }
    }

    /// Rewrite an id set into `OR` of per-row key comparisons
    ///
    /// Ids whose parts don't convert to the key column types (lenient codec)
    /// keep the whole set in memory, where it is matched on feature ids.
    fn rewrite_ids(&self, ids: &std::collections::BTreeSet<String>) -> Result<Option<Filter>> {
        let Some(key) = self.primary_key.filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        let needs_or = ids.len() > 1;
        let needs_and = key.len() > 1;
        if (needs_or && !self.capabilities.supports(Operator::Or))
            || (needs_and && !self.capabilities.supports(Operator::And))
            || !self.capabilities.supports(Operator::Compare(ComparisonOp::Eq))
        {
            return Ok(None);
        }

        let mut rows = Vec::with_capacity(ids.len());
        for fid in ids {
            let values = self.codec.decode(key, fid)?;
            let mut columns = Vec::with_capacity(values.len());
            for (column, value) in key.columns.iter().zip(values) {
                if !value.matches_type(&column.value_type) {
                    return Ok(None);
                }
                columns.push(Filter::compare(
                    ComparisonOp::Eq,
                    Expr::property(&column.name),
                    Expr::Literal(value),
                ));
            }
            rows.push(Filter::And(columns));
        }
        Ok(Some(Filter::Or(rows)))
    }

    fn property_known(&self, name: &str) -> bool {
        let Some(schema) = self.schema else {
            return true;
        };
        schema.attribute(name).is_some()
            || self
                .primary_key
                .is_some_and(|key| key.column(name).is_some())
    }

    fn expr_supported(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Literal(_) => true,
            Expr::Property(name) => self.property_known(name),
            Expr::Function { name, args } => {
                self.capabilities.supports_function(name)
                    && args.iter().all(|a| self.expr_supported(a))
            }
            Expr::Arithmetic { op, left, right } => {
                self.capabilities.supports(Operator::Arithmetic(*op))
                    && self.expr_supported(left)
                    && self.expr_supported(right)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::filter::{FilterEvaluator, FunctionRegistry, SpatialOp};
    use crate::schema::PrimaryKeyColumn;
    use crate::types::{AttributeDescriptor, GeometryKind, Value, ValueType};
    use geo::point;
    use std::sync::Arc;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(
            "t",
            vec![
                AttributeDescriptor::new("name", ValueType::String),
                AttributeDescriptor::new("rank", ValueType::Integer),
                AttributeDescriptor::geometry("geom", GeometryKind::Point, 4326),
            ],
        )
    }

    fn key() -> PrimaryKey {
        PrimaryKey::new("t", vec![PrimaryKeyColumn::new("id", ValueType::Integer)])
    }

    fn custom_gt_3() -> Filter {
        Filter::compare(
            ComparisonOp::Gt,
            Expr::function("customFunc", vec![Expr::property("name")]),
            Expr::literal(3),
        )
    }

    // =========================================================================
    // Basic Split Tests
    // =========================================================================

    #[test]
    fn test_simple_pushdown() {
        let caps = Capabilities::base();
        let schema = schema();
        let split = FilterSplitter::new(&caps)
            .with_schema(&schema)
            .split(&Filter::eq("name", "a"))
            .unwrap();
        assert_eq!(split.pre, Filter::eq("name", "a"));
        assert_eq!(split.post, Filter::Include);
        assert!(!split.requires_post_filter());
    }

    #[test]
    fn test_unsupported_function_goes_to_post() {
        let caps = Capabilities::base();
        let split = FilterSplitter::new(&caps).split(&custom_gt_3()).unwrap();
        assert_eq!(split.pre, Filter::Include);
        assert_eq!(split.post, custom_gt_3());
    }

    #[test]
    fn test_supported_function_is_pushed() {
        let caps = Capabilities::base().with_function("customFunc");
        let split = FilterSplitter::new(&caps).split(&custom_gt_3()).unwrap();
        assert_eq!(split.pre, custom_gt_3());
        assert_eq!(split.post, Filter::Include);
    }

    #[test]
    fn test_and_splits_per_conjunct() {
        let caps = Capabilities::base();
        let filter = Filter::eq("name", "a")
            .and(custom_gt_3())
            .and(Filter::gt("rank", 1));
        let split = FilterSplitter::new(&caps).split(&filter).unwrap();
        assert_eq!(
            split.pre,
            Filter::And(vec![Filter::eq("name", "a"), Filter::gt("rank", 1)])
        );
        assert_eq!(split.post, custom_gt_3());
    }

    #[test]
    fn test_or_with_unsupported_branch_stays_whole() {
        let caps = Capabilities::base();
        let filter = Filter::eq("name", "a").or(custom_gt_3());
        let split = FilterSplitter::new(&caps).split(&filter).unwrap();
        assert_eq!(split.pre, Filter::Include);
        assert_eq!(split.post, filter);
    }

    #[test]
    fn test_local_id_set_is_canonicalized() {
        let caps = Capabilities::base();
        let key = key();
        let split = FilterSplitter::new(&caps)
            .with_primary_key(&key, IdentityCodec::lenient())
            .split(&Filter::ids(["t.2", "%33", "bogus"]))
            .unwrap();
        assert_eq!(split.pre, Filter::Include);
        assert_eq!(split.post, Filter::ids(["2", "3", "bogus"]));
    }

    #[test]
    fn test_not_over_and_is_pushed_down_first() {
        let caps = Capabilities::base();
        let filter = Filter::And(vec![Filter::eq("name", "a"), Filter::like("name", "b%", true)]).negate();
        let split = FilterSplitter::new(&caps).split(&filter).unwrap();
        // NOT (a AND b) becomes (NOT a OR NOT b); LIKE is unsupported so the OR stays local
        assert_eq!(split.pre, Filter::Include);
        assert!(matches!(split.post, Filter::Or(_)));
    }

    #[test]
    fn test_unknown_property_goes_to_post() {
        let caps = Capabilities::base();
        let schema = schema();
        let split = FilterSplitter::new(&caps)
            .with_schema(&schema)
            .split(&Filter::eq("missing", 1).and(Filter::eq("rank", 1)))
            .unwrap();
        assert_eq!(split.pre, Filter::eq("rank", 1));
        assert_eq!(split.post, Filter::eq("missing", 1));
    }

    #[test]
    fn test_spatial_requires_capability_and_geometry_attribute() {
        let schema = schema();
        let filter = Filter::spatial(SpatialOp::Intersects, "geom", point!(x: 1.0, y: 1.0).into());
        let base = Capabilities::base();
        let split = FilterSplitter::new(&base).with_schema(&schema).split(&filter).unwrap();
        assert_eq!(split.post, filter);

        let spatial = Capabilities::base().with(Operator::Spatial(SpatialOp::Intersects));
        let split = FilterSplitter::new(&spatial).with_schema(&schema).split(&filter).unwrap();
        assert_eq!(split.pre, filter);

        let on_text = Filter::spatial(SpatialOp::Intersects, "name", point!(x: 1.0, y: 1.0).into());
        let split = FilterSplitter::new(&spatial).with_schema(&schema).split(&on_text).unwrap();
        assert_eq!(split.post, on_text);
    }

    #[test]
    fn test_empty_filter_splits_to_include() {
        let caps = Capabilities::base();
        let split = FilterSplitter::new(&caps).split(&Filter::And(vec![])).unwrap();
        assert_eq!(split.pre, Filter::Include);
        assert_eq!(split.post, Filter::Include);
    }

    // =========================================================================
    // Id Rewrite Tests
    // =========================================================================

    #[test]
    fn test_id_filter_rewritten_to_key_columns() {
        let caps = Capabilities::base();
        let schema = schema();
        let key = key();
        let split = FilterSplitter::new(&caps)
            .with_schema(&schema)
            .with_primary_key(&key, IdentityCodec::strict())
            .split(&Filter::ids(["1", "t.2"]))
            .unwrap();
        assert_eq!(
            split.pre,
            Filter::Or(vec![
                Filter::compare(ComparisonOp::Eq, Expr::property("id"), Expr::literal(1)),
                Filter::compare(ComparisonOp::Eq, Expr::property("id"), Expr::literal(2)),
            ])
        );
        assert_eq!(split.post, Filter::Include);
    }

    #[test]
    fn test_id_filter_without_key_stays_local() {
        let caps = Capabilities::base();
        let none = PrimaryKey::none("t");
        let filter = Filter::ids(["a"]);
        let split = FilterSplitter::new(&caps)
            .with_primary_key(&none, IdentityCodec::strict())
            .split(&filter)
            .unwrap();
        assert_eq!(split.post, filter);
    }

    #[test]
    fn test_id_decode_failure() {
        let caps = Capabilities::base();
        let key = key();
        let filter = Filter::ids(["abc"]);

        let strict = FilterSplitter::new(&caps).with_primary_key(&key, IdentityCodec::strict());
        assert!(strict.split(&filter).unwrap_err().is_decoding());

        let lenient = FilterSplitter::new(&caps).with_primary_key(&key, IdentityCodec::lenient());
        let split = lenient.split(&filter).unwrap();
        assert_eq!(split.pre, Filter::Include);
        assert_eq!(split.post, filter);
    }

    // =========================================================================
    // Split Properties
    // =========================================================================

    fn samples() -> Vec<Filter> {
        vec![
            Filter::Include,
            Filter::eq("name", "a"),
            custom_gt_3(),
            Filter::eq("name", "a").and(custom_gt_3()),
            Filter::eq("name", "b").or(custom_gt_3()).negate(),
            Filter::And(vec![
                Filter::gt("rank", 1),
                Filter::Or(vec![Filter::like("name", "a%", false), Filter::is_null("rank")]),
                Filter::eq("rank", 4).negate().negate(),
            ]),
            Filter::between("rank", 2, 5).and(Filter::eq("missing", 1).negate()),
        ]
    }

    fn features() -> Vec<Feature> {
        let schema = Arc::new(schema());
        let rows = [("a", Some(4)), ("abc", Some(2)), ("b", None), ("bcdef", Some(7))];
        rows.iter()
            .enumerate()
            .map(|(i, (name, rank))| {
                Feature::new(
                    i.to_string(),
                    Arc::clone(&schema),
                    vec![
                        Value::from(*name),
                        Value::from(*rank),
                        Value::Geometry(point!(x: i as f64, y: 0.0).into()),
                    ],
                )
            })
            .collect()
    }

    #[test]
    fn test_split_preserves_meaning() {
        let caps = Capabilities::base();
        let schema = schema();
        let mut functions = FunctionRegistry::default();
        functions.register("customFunc", |args| Ok(Value::Integer(args[0].to_string().len() as i64)));
        let mut eval = FilterEvaluator::new(functions);

        for filter in samples() {
            let split = FilterSplitter::new(&caps).with_schema(&schema).split(&filter).unwrap();
            for feature in features() {
                let original = eval.matches(&filter, &feature).unwrap();
                let pre = eval.matches(&split.pre, &feature).unwrap();
                let post = eval.matches(&split.post, &feature).unwrap();
                assert_eq!(original, pre && post, "filter {} on feature {}", filter, feature.id());
            }
        }
    }

    #[test]
    fn test_split_is_idempotent() {
        let caps = Capabilities::base();
        let schema = schema();
        let splitter = FilterSplitter::new(&caps).with_schema(&schema);
        for filter in samples() {
            let split = splitter.split(&filter).unwrap();
            let again = splitter.split(&split.pre).unwrap();
            assert_eq!(again.pre, split.pre);
            assert_eq!(again.post, Filter::Include);
        }
    }
}
