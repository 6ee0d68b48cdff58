//! Feature identity codec
//!
//! A feature id is the string form of the row's primary key values joined
//! with [`SEPARATOR`]. Ids may arrive URL-encoded and optionally prefixed
//! with `"<table>."`; both are removed before the key values are parsed.
//!
//! Key values are percent-encoded where they contain `%`, control
//! characters or, in multi-column keys, the separator itself.

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use uuid::Uuid;

use crate::error::{FeatureStoreError, Result};
use crate::schema::PrimaryKey;
use crate::types::Value;

/// Separator between key values in a multi-column feature id
pub const SEPARATOR: char = '.';

const VALUE_ESCAPES: &AsciiSet = &CONTROLS.add(b'%');
const PART_ESCAPES: &AsciiSet = &VALUE_ESCAPES.add(SEPARATOR as u8);

/// Converts between primary key values and feature ids
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityCodec {
    strict: bool,
}

impl IdentityCodec {
    /// Lenient codec: key values that fail to convert are kept as text
    pub fn lenient() -> Self {
        Self { strict: false }
    }

    /// Strict codec: key values that fail to convert are an error
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Build the feature id for a row's key values
    ///
    /// A key without columns gets a random id, which is not stable across reads.
    pub fn encode(&self, key: &PrimaryKey, values: &[Value]) -> Result<String> {
        if key.is_empty() {
            return Ok(Uuid::new_v4().to_string());
        }
        if values.len() != key.len() {
            return Err(FeatureStoreError::decoding(format!(
                "Primary key of '{}' has {} columns but {} values were supplied",
                key.table,
                key.len(),
                values.len()
            )));
        }

        let escapes = if key.len() == 1 { VALUE_ESCAPES } else { PART_ESCAPES };
        let parts: Vec<String> = values
            .iter()
            .map(|value| utf8_percent_encode(&value.to_string(), escapes).to_string())
            .collect();
        Ok(parts.join(&SEPARATOR.to_string()))
    }

    /// Recover typed key values from a feature id
    ///
    /// Multi-column ids are split on the separator before percent-decoding,
    /// so an encoded separator stays inside its key value.
    pub fn decode(&self, key: &PrimaryKey, fid: &str) -> Result<Vec<Value>> {
        if key.is_empty() {
            return Err(FeatureStoreError::decoding(format!(
                "Table '{}' has no primary key; feature id '{}' cannot be mapped to columns",
                key.table, fid
            )));
        }

        let prefix = format!("{}{}", key.table, SEPARATOR);
        let raw = fid.strip_prefix(prefix.as_str()).unwrap_or(fid);
        let raw_parts: Vec<&str> = if key.len() == 1 {
            vec![raw]
        } else {
            raw.split(SEPARATOR).collect()
        };
        let parts = raw_parts
            .into_iter()
            .map(|part| {
                percent_decode_str(part)
                    .decode_utf8()
                    .map(|decoded| decoded.into_owned())
                    .map_err(|e| {
                        FeatureStoreError::decoding(format!(
                            "Feature id '{}' is not valid UTF-8: {}",
                            fid, e
                        ))
                    })
            })
            .collect::<Result<Vec<String>>>()?;

        if parts.len() != key.len() {
            return Err(FeatureStoreError::decoding(format!(
                "Feature id '{}' has {} values but the primary key of '{}' has {} columns",
                fid,
                parts.len(),
                key.table,
                key.len()
            )));
        }

        key.columns
            .iter()
            .zip(&parts)
            .map(|(column, part)| match Value::parse(part, &column.value_type) {
                Ok(value) => Ok(value),
                Err(e) if self.strict => Err(FeatureStoreError::decoding(format!(
                    "Feature id '{}': value '{}' for key column '{}': {}",
                    fid, part, column.name, e
                ))),
                Err(_) => Ok(Value::Text(part.to_string())),
            })
            .collect()
    }
}
