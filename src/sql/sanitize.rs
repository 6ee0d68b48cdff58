//! SQL identifier quoting and validation

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FeatureStoreError, Result};

static IDENTIFIER_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").ok());

/// PostgreSQL reserved keywords that cannot be used as unquoted identifiers
pub const POSTGRES_RESERVED_WORDS: &[&str] = &[
    "ALL",
    "ANALYSE",
    "ANALYZE",
    "AND",
    "ANY",
    "ARRAY",
    "AS",
    "ASC",
    "ASYMMETRIC",
    "BOTH",
    "CASE",
    "CAST",
    "CHECK",
    "COLLATE",
    "COLUMN",
    "CONSTRAINT",
    "CREATE",
    "CURRENT_CATALOG",
    "CURRENT_DATE",
    "CURRENT_ROLE",
    "CURRENT_TIME",
    "CURRENT_TIMESTAMP",
    "CURRENT_USER",
    "DEFAULT",
    "DEFERRABLE",
    "DESC",
    "DISTINCT",
    "DO",
    "ELSE",
    "END",
    "EXCEPT",
    "FALSE",
    "FETCH",
    "FOR",
    "FOREIGN",
    "FROM",
    "GRANT",
    "GROUP",
    "HAVING",
    "IN",
    "INITIALLY",
    "INTERSECT",
    "INTO",
    "LATERAL",
    "LEADING",
    "LIMIT",
    "LOCALTIME",
    "LOCALTIMESTAMP",
    "NOT",
    "NULL",
    "OFFSET",
    "ON",
    "ONLY",
    "OR",
    "ORDER",
    "PLACING",
    "PRIMARY",
    "REFERENCES",
    "RETURNING",
    "SELECT",
    "SESSION_USER",
    "SOME",
    "SYMMETRIC",
    "TABLE",
    "THEN",
    "TO",
    "TRAILING",
    "TRUE",
    "UNION",
    "UNIQUE",
    "USER",
    "USING",
    "VARIADIC",
    "WHEN",
    "WHERE",
    "WINDOW",
    "WITH",
];

/// Whether `identifier` is already a complete double-quoted identifier
fn is_quoted(identifier: &str) -> bool {
    let Some(inner) = identifier
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return false;
    };
    !inner.replace("\"\"", "").contains('"')
}

/// Quote a SQL identifier
///
/// Embedded double quotes are doubled. An identifier that is already quoted
/// is returned unchanged, so quoting twice never nests quotes.
///
/// # Example
/// ```
/// use runtara_feature_store::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("roads"), "\"roads\"");
/// assert_eq!(quote_identifier("\"roads\""), "\"roads\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    if identifier.len() >= 2 && is_quoted(identifier) {
        return identifier.to_string();
    }
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Table reference qualified by an optional namespace, both parts quoted
pub fn qualify_table(
    namespace: Option<&str>,
    table: &str,
    quote: impl Fn(&str) -> String,
) -> String {
    match namespace {
        Some(ns) => format!("{}.{}", quote(ns), quote(table)),
        None => quote(table),
    }
}

/// Validate a table or column name for schema creation
///
/// Rules:
/// - Must start with a lowercase letter
/// - Can only contain lowercase letters, numbers, and underscores
/// - Cannot be a PostgreSQL reserved word
/// - Cannot be one of `reserved_columns` (e.g. the key column)
///
/// # Example
/// ```
/// use runtara_feature_store::sql::validate_identifier;
///
/// assert!(validate_identifier("roads", &[]).is_ok());
/// assert!(validate_identifier("select", &[]).is_err());
/// assert!(validate_identifier("fid", &["fid"]).is_err());
/// ```
pub fn validate_identifier(name: &str, reserved_columns: &[&str]) -> Result<()> {
    if name.is_empty() {
        return Err(FeatureStoreError::validation("Identifier cannot be empty"));
    }

    let valid = IDENTIFIER_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(name));
    if !valid {
        return Err(FeatureStoreError::validation(format!(
            "Identifier '{}' is invalid. Must start with a lowercase letter and contain only lowercase letters, numbers, and underscores.",
            name
        )));
    }

    if POSTGRES_RESERVED_WORDS.contains(&name.to_uppercase().as_str()) {
        return Err(FeatureStoreError::validation(format!(
            "Identifier '{}' is a reserved keyword and cannot be used.",
            name
        )));
    }

    if reserved_columns.contains(&name) {
        return Err(FeatureStoreError::validation(format!(
            "Column name '{}' is reserved and cannot be used.",
            name
        )));
    }

    Ok(())
}
