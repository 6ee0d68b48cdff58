//! Abstract feature queries
//!
//! A [`Query`] names a feature type and carries a projection, a filter, a
//! sort specification, paging and backend hints. Queries are values: the
//! store derives new ones (e.g. with a rewritten filter) instead of mutating
//! what the caller handed in.

use serde::{Deserialize, Serialize};

use crate::filter::Filter;

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// One entry of a sort specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum SortBy {
    /// Ascending primary key order
    Natural,
    /// Descending primary key order
    Reverse,
    /// A named property
    Property {
        name: String,
        #[serde(default)]
        order: SortOrder,
    },
}

impl SortBy {
    pub fn asc(name: impl Into<String>) -> Self {
        SortBy::Property {
            name: name.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        SortBy::Property {
            name: name.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Backend hints that do not change which features match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryHints {
    /// Return geometries generalized to this distance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generalization_distance: Option<f64>,
    /// Return geometries simplified (topology preserving) to this distance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplification_distance: Option<f64>,
}

/// Offset and row limit of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub offset: u64,
    pub limit: Option<u64>,
}

/// Abstract feature query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Feature type (table) to read
    pub type_name: String,
    /// Requested attribute names; `None` selects every attribute
    pub properties: Option<Vec<String>>,
    pub filter: Filter,
    pub sort: Vec<SortBy>,
    /// Number of matching features to skip
    pub offset: u64,
    /// Maximum number of features to return
    pub max_features: Option<u64>,
    pub hints: QueryHints,
}

impl Query {
    /// Query every feature of a type
    pub fn all(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: None,
            filter: Filter::Include,
            sort: Vec::new(),
            offset: 0,
            max_features: None,
            hints: QueryHints::default(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortBy>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_max_features(mut self, max: u64) -> Self {
        self.max_features = Some(max);
        self
    }

    pub fn with_hints(mut self, hints: QueryHints) -> Self {
        self.hints = hints;
        self
    }

    /// Paging requested by this query, if any
    pub fn paging(&self) -> Option<Paging> {
        (self.offset > 0 || self.max_features.is_some()).then_some(Paging {
            offset: self.offset,
            limit: self.max_features,
        })
    }
}
