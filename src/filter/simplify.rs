//! Logical simplification of filter trees
//!
//! Flattens nested connectives, drops neutral elements, folds comparisons
//! between literals and pushes `NOT` down through `AND`/`OR`. Children keep
//! their relative order so simplified SQL stays readable next to the input.

use std::cmp::Ordering;

use super::{ComparisonOp, Expr, Filter};

/// Return an equivalent, simplified filter
#[must_use]
pub fn simplify(filter: &Filter) -> Filter {
    match filter {
        Filter::And(children) => simplify_and(children),
        Filter::Or(children) => simplify_or(children),
        Filter::Not(inner) => simplify_not(inner),
        Filter::Compare { op, left, right } => fold_compare(*op, left, right)
            .unwrap_or_else(|| filter.clone()),
        Filter::Between { expr, lower, upper } => {
            fold_between(expr, lower, upper).unwrap_or_else(|| filter.clone())
        }
        Filter::IsNull(Expr::Literal(value)) => constant(value.is_null()),
        Filter::Id(ids) if ids.is_empty() => Filter::Exclude,
        other => other.clone(),
    }
}

fn constant(matches: bool) -> Filter {
    if matches {
        Filter::Include
    } else {
        Filter::Exclude
    }
}

fn push_unique(out: &mut Vec<Filter>, filter: Filter) {
    if !out.contains(&filter) {
        out.push(filter);
    }
}

fn simplify_and(children: &[Filter]) -> Filter {
    let mut out = Vec::new();

    for child in children {
        match simplify(child) {
            Filter::Include => {}
            Filter::Exclude => return Filter::Exclude,
            Filter::And(grandchildren) => {
                for g in grandchildren {
                    push_unique(&mut out, g);
                }
            }
            other => push_unique(&mut out, other),
        }
    }

    match out.len() {
        0 => Filter::Include,
        1 => out.remove(0),
        _ => Filter::And(out),
    }
}

fn simplify_or(children: &[Filter]) -> Filter {
    let mut out = Vec::new();

    for child in children {
        match simplify(child) {
            Filter::Exclude => {}
            Filter::Include => return Filter::Include,
            Filter::Or(grandchildren) => {
                for g in grandchildren {
                    push_unique(&mut out, g);
                }
            }
            other => push_unique(&mut out, other),
        }
    }

    match out.len() {
        0 => Filter::Exclude,
        1 => out.remove(0),
        _ => Filter::Or(out),
    }
}

fn simplify_not(inner: &Filter) -> Filter {
    match simplify(inner) {
        Filter::Include => Filter::Exclude,
        Filter::Exclude => Filter::Include,
        Filter::Not(double) => *double,
        Filter::And(children) => simplify_or(&negate_all(children)),
        Filter::Or(children) => simplify_and(&negate_all(children)),
        other => Filter::Not(Box::new(other)),
    }
}

fn negate_all(children: Vec<Filter>) -> Vec<Filter> {
    children
        .into_iter()
        .map(|c| Filter::Not(Box::new(c)))
        .collect()
}

fn fold_compare(op: ComparisonOp, left: &Expr, right: &Expr) -> Option<Filter> {
    let (Expr::Literal(a), Expr::Literal(b)) = (left, right) else {
        return None;
    };
    let ordering = a.compare(b)?;
    let matches = match op {
        ComparisonOp::Eq => ordering == Ordering::Equal,
        ComparisonOp::Ne => ordering != Ordering::Equal,
        ComparisonOp::Lt => ordering == Ordering::Less,
        ComparisonOp::Le => ordering != Ordering::Greater,
        ComparisonOp::Gt => ordering == Ordering::Greater,
        ComparisonOp::Ge => ordering != Ordering::Less,
    };
    Some(constant(matches))
}

fn fold_between(expr: &Expr, lower: &Expr, upper: &Expr) -> Option<Filter> {
    let (Expr::Literal(v), Expr::Literal(lo), Expr::Literal(hi)) = (expr, lower, upper) else {
        return None;
    };
    let above = v.compare(lo)? != Ordering::Less;
    let below = v.compare(hi)? != Ordering::Greater;
    Some(constant(above && below))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_and_drop_include() {
        let f = Filter::And(vec![
            Filter::Include,
            Filter::And(vec![Filter::eq("a", 1), Filter::eq("b", 2)]),
            Filter::eq("a", 1),
        ]);
        assert_eq!(
            simplify(&f),
            Filter::And(vec![Filter::eq("a", 1), Filter::eq("b", 2)])
        );
    }

    #[test]
    fn test_and_with_exclude() {
        let f = Filter::And(vec![Filter::eq("a", 1), Filter::Exclude]);
        assert_eq!(simplify(&f), Filter::Exclude);
    }

    #[test]
    fn test_or_neutral_elements() {
        assert_eq!(
            simplify(&Filter::Or(vec![Filter::Exclude, Filter::eq("a", 1)])),
            Filter::eq("a", 1)
        );
        assert_eq!(
            simplify(&Filter::Or(vec![Filter::eq("a", 1), Filter::Include])),
            Filter::Include
        );
        assert_eq!(simplify(&Filter::Or(vec![])), Filter::Exclude);
    }

    #[test]
    fn test_double_negation() {
        let f = Filter::eq("a", 1).negate().negate();
        assert_eq!(simplify(&f), Filter::eq("a", 1));
    }

    #[test]
    fn test_not_pushdown() {
        let f = Filter::And(vec![Filter::eq("a", 1), Filter::eq("b", 2)]).negate();
        assert_eq!(
            simplify(&f),
            Filter::Or(vec![Filter::eq("a", 1).negate(), Filter::eq("b", 2).negate()])
        );
    }

    #[test]
    fn test_constant_folding() {
        let t = Filter::compare(ComparisonOp::Lt, Expr::literal(1), Expr::literal(2.5));
        let f = Filter::compare(ComparisonOp::Eq, Expr::literal("x"), Expr::literal("y"));
        assert_eq!(simplify(&t), Filter::Include);
        assert_eq!(simplify(&f), Filter::Exclude);
        assert_eq!(
            simplify(&Filter::And(vec![t, Filter::eq("a", 1)])),
            Filter::eq("a", 1)
        );
    }

    #[test]
    fn test_null_comparisons_are_not_folded() {
        let f = Filter::compare(
            ComparisonOp::Eq,
            Expr::Literal(crate::types::Value::Null),
            Expr::literal(1),
        );
        assert_eq!(simplify(&f), f);
    }

    #[test]
    fn test_simplify_is_idempotent() {
        let f = Filter::Or(vec![
            Filter::And(vec![Filter::eq("a", 1), Filter::Include]).negate(),
            Filter::like("name", "A%", false),
        ]);
        let once = simplify(&f);
        assert_eq!(simplify(&once), once);
    }
}
