//! Geometry helpers: WKT transport and bounding envelopes

use geo::{BoundingRect, Coord, Geometry, Rect};
use serde::{Deserialize, Serialize};
use wkt::{ToWkt, TryFromWkt};

use crate::error::{FeatureStoreError, Result};

/// Parse a WKT string into a geometry
pub fn from_wkt(text: &str) -> Result<Geometry<f64>> {
    Geometry::<f64>::try_from_wkt_str(text.trim())
        .map_err(|e| FeatureStoreError::decoding(format!("Invalid WKT '{}': {}", text, e)))
}

/// Render a geometry as WKT
pub fn to_wkt(geometry: &Geometry<f64>) -> String {
    geometry.wkt_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Bounds {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

/// Axis-aligned 2D bounding box with a coordinate reference system
///
/// An empty envelope covers nothing and is distinct from a zero-area box
/// around a single point: expanding an empty envelope by a point yields that
/// degenerate box, while the empty envelope itself has no bounds at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    bounds: Option<Bounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    crs: Option<String>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self::empty()
    }
}

impl Envelope {
    /// The canonical empty envelope
    pub fn empty() -> Self {
        Self {
            bounds: None,
            crs: None,
        }
    }

    /// Create an envelope from its corners, normalizing the axis order
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            bounds: Some(Bounds {
                min_x: x1.min(x2),
                min_y: y1.min(y2),
                max_x: x1.max(x2),
                max_y: y1.max(y2),
            }),
            crs: None,
        }
    }

    /// Bounding box of a geometry (empty for an empty geometry)
    pub fn of(geometry: &Geometry<f64>) -> Self {
        geometry
            .bounding_rect()
            .map(Self::from)
            .unwrap_or_else(Self::empty)
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    pub fn crs(&self) -> Option<&str> {
        self.crs.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    pub fn min_x(&self) -> Option<f64> {
        self.bounds.map(|b| b.min_x)
    }

    pub fn min_y(&self) -> Option<f64> {
        self.bounds.map(|b| b.min_y)
    }

    pub fn max_x(&self) -> Option<f64> {
        self.bounds.map(|b| b.max_x)
    }

    pub fn max_y(&self) -> Option<f64> {
        self.bounds.map(|b| b.max_y)
    }

    pub fn width(&self) -> f64 {
        self.bounds.map(|b| b.max_x - b.min_x).unwrap_or(0.0)
    }

    pub fn height(&self) -> f64 {
        self.bounds.map(|b| b.max_y - b.min_y).unwrap_or(0.0)
    }

    /// Grow the envelope to cover a point
    pub fn expand_to_include(&mut self, x: f64, y: f64) {
        self.bounds = Some(match self.bounds {
            None => Bounds {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
            },
            Some(b) => Bounds {
                min_x: b.min_x.min(x),
                min_y: b.min_y.min(y),
                max_x: b.max_x.max(x),
                max_y: b.max_y.max(y),
            },
        });
    }

    /// Grow the envelope to cover another one; the CRS of `self` wins when set
    pub fn expand_to_include_envelope(&mut self, other: &Envelope) {
        if let Some(b) = other.bounds {
            self.expand_to_include(b.min_x, b.min_y);
            self.expand_to_include(b.max_x, b.max_y);
        }
        if self.crs.is_none() {
            self.crs = other.crs.clone();
        }
    }

    /// Grow the envelope to cover a geometry
    pub fn expand_to_include_geometry(&mut self, geometry: &Geometry<f64>) {
        self.expand_to_include_envelope(&Envelope::of(geometry));
    }

    /// Whether two envelopes share at least one point
    pub fn intersects(&self, other: &Envelope) -> bool {
        match (self.bounds, other.bounds) {
            (Some(a), Some(b)) => {
                a.min_x <= b.max_x && b.min_x <= a.max_x && a.min_y <= b.max_y && b.min_y <= a.max_y
            }
            _ => false,
        }
    }

    pub fn to_rect(&self) -> Option<Rect<f64>> {
        self.bounds.map(|b| {
            Rect::new(
                Coord { x: b.min_x, y: b.min_y },
                Coord { x: b.max_x, y: b.max_y },
            )
        })
    }
}

impl From<Rect<f64>> for Envelope {
    fn from(rect: Rect<f64>) -> Self {
        let (min, max) = (rect.min(), rect.max());
        Envelope::new(min.x, min.y, max.x, max.y)
    }
}
