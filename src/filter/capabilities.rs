//! Declarative description of what a backend can evaluate natively

use std::collections::HashSet;

use super::{ArithmeticOp, ComparisonOp, Filter, SpatialOp};

/// Filter operator category understood by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    And,
    Or,
    Not,
    Include,
    Exclude,
    Compare(ComparisonOp),
    Between,
    Like,
    IsNull,
    Id,
    Arithmetic(ArithmeticOp),
    Spatial(SpatialOp),
}

impl Operator {
    /// Operator at the root of a filter node
    pub fn of(filter: &Filter) -> Operator {
        match filter {
            Filter::Include => Operator::Include,
            Filter::Exclude => Operator::Exclude,
            Filter::And(_) => Operator::And,
            Filter::Or(_) => Operator::Or,
            Filter::Not(_) => Operator::Not,
            Filter::Compare { op, .. } => Operator::Compare(*op),
            Filter::Between { .. } => Operator::Between,
            Filter::Like { .. } => Operator::Like,
            Filter::IsNull(_) => Operator::IsNull,
            Filter::Id(_) => Operator::Id,
            Filter::Spatial { op, .. } => Operator::Spatial(*op),
        }
    }
}

/// Operators and named functions a backend supports
///
/// Function names are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    operators: HashSet<Operator>,
    functions: HashSet<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::base()
    }
}

impl Capabilities {
    /// No capabilities at all; every filter stays in memory
    pub fn none() -> Self {
        Self {
            operators: HashSet::new(),
            functions: HashSet::new(),
        }
    }

    /// Logical connectives, the constant filters and basic comparisons
    pub fn base() -> Self {
        let mut caps = Self::none();
        caps.add_all([
            Operator::And,
            Operator::Or,
            Operator::Not,
            Operator::Include,
            Operator::Exclude,
        ]);
        caps.add_all(ComparisonOp::ALL.map(Operator::Compare));
        caps
    }

    pub fn add(&mut self, op: Operator) -> &mut Self {
        self.operators.insert(op);
        self
    }

    pub fn add_all(&mut self, ops: impl IntoIterator<Item = Operator>) -> &mut Self {
        self.operators.extend(ops);
        self
    }

    pub fn add_function(&mut self, name: &str) -> &mut Self {
        self.functions.insert(name.to_lowercase());
        self
    }

    pub fn with(mut self, op: Operator) -> Self {
        self.add(op);
        self
    }

    pub fn with_function(mut self, name: &str) -> Self {
        self.add_function(name);
        self
    }

    pub fn supports(&self, op: Operator) -> bool {
        self.operators.contains(&op)
    }

    pub fn supports_function(&self, name: &str) -> bool {
        self.functions.contains(&name.to_lowercase())
    }
}
