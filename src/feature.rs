//! Decoded feature rows

use std::sync::Arc;

use geo::Geometry;

use crate::schema::FeatureSchema;
use crate::types::Value;

/// A single decoded row: identity plus one value per schema attribute
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    id: String,
    schema: Arc<FeatureSchema>,
    values: Vec<Value>,
}

impl Feature {
    /// Create a feature; `values` must line up with `schema.attributes`
    pub fn new(id: impl Into<String>, schema: Arc<FeatureSchema>, values: Vec<Value>) -> Self {
        debug_assert_eq!(schema.attributes.len(), values.len());
        Self {
            id: id.into(),
            schema,
            values,
        }
    }

    /// Feature identity derived from the primary key
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of a named attribute
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    /// Geometry of the schema's default geometry attribute
    pub fn default_geometry(&self) -> Option<&Geometry<f64>> {
        let attr = self.schema.default_geometry()?;
        self.get(&attr.name).and_then(Value::as_geometry)
    }

    /// Project this feature onto a narrower schema, dropping other attributes
    ///
    /// Attributes of `target` missing from this feature come out as null.
    pub fn retype(self, target: &Arc<FeatureSchema>) -> Feature {
        if Arc::ptr_eq(&self.schema, target) {
            return self;
        }
        let values = target
            .attributes
            .iter()
            .map(|attr| self.get(&attr.name).cloned().unwrap_or(Value::Null))
            .collect();
        Feature {
            id: self.id,
            schema: Arc::clone(target),
            values,
        }
    }
}
