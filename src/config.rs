//! Configuration for FeatureStore
//!
//! Provides a builder pattern for configuring the feature store.

/// Default row fetch size for streaming reads
pub const DEFAULT_FETCH_SIZE: i64 = 1000;

/// Default length for variable-length text columns without a declared length
pub const DEFAULT_VARCHAR_LENGTH: u32 = 255;

/// Configuration for the feature store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend database URL
    pub database_url: String,
    /// Schema/namespace qualifier applied to every table reference
    pub database_schema: Option<String>,
    /// Rows fetched per cursor round trip (<= 0 fetches all rows at once)
    pub fetch_size: i64,
    /// Name of the key column emitted by `create_schema`
    pub primary_key_column: String,
    /// Whether primary key columns also appear as schema attributes
    pub expose_primary_keys: bool,
    /// Whether feature identity decoding rejects unconvertible values
    pub strict_identity: bool,
    /// Length used for text columns without a declared length
    pub default_varchar_length: u32,
    /// Maximum number of pooled backend connections
    pub max_connections: u32,
}

impl StoreConfig {
    /// Create a new configuration builder
    pub fn builder(database_url: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(database_url)
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    database_url: String,
    database_schema: Option<String>,
    fetch_size: i64,
    primary_key_column: String,
    expose_primary_keys: bool,
    strict_identity: bool,
    default_varchar_length: u32,
    max_connections: u32,
}

impl StoreConfigBuilder {
    /// Create a new builder with the database URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            database_schema: None,
            fetch_size: DEFAULT_FETCH_SIZE,
            primary_key_column: "fid".to_string(),
            expose_primary_keys: false,
            strict_identity: false,
            default_varchar_length: DEFAULT_VARCHAR_LENGTH,
            max_connections: 10,
        }
    }

    /// Qualify table references with a database schema (e.g. "public")
    pub fn database_schema(mut self, schema: impl Into<String>) -> Self {
        self.database_schema = Some(schema.into());
        self
    }

    /// Set the cursor fetch size (default: 1000, <= 0 fetches everything at once)
    pub fn fetch_size(mut self, rows: i64) -> Self {
        self.fetch_size = rows;
        self
    }

    /// Set the key column name used when creating tables (default: "fid")
    pub fn primary_key_column(mut self, name: impl Into<String>) -> Self {
        self.primary_key_column = name.into();
        self
    }

    /// Expose primary key columns as regular attributes (default: false)
    pub fn expose_primary_keys(mut self, enabled: bool) -> Self {
        self.expose_primary_keys = enabled;
        self
    }

    /// Reject feature ids whose parts don't convert to the key column types (default: false)
    pub fn strict_identity(mut self, enabled: bool) -> Self {
        self.strict_identity = enabled;
        self
    }

    /// Set the length of text columns without a declared length (default: 255)
    pub fn default_varchar_length(mut self, length: u32) -> Self {
        self.default_varchar_length = length;
        self
    }

    /// Set the connection pool size (default: 10)
    pub fn max_connections(mut self, connections: u32) -> Self {
        self.max_connections = connections;
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_url,
            database_schema: self.database_schema,
            fetch_size: self.fetch_size,
            primary_key_column: self.primary_key_column,
            expose_primary_keys: self.expose_primary_keys,
            strict_identity: self.strict_identity,
            default_varchar_length: self.default_varchar_length,
            max_connections: self.max_connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // StoreConfig Default Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = StoreConfig::builder("postgres://localhost/test").build();

        assert_eq!(config.database_url, "postgres://localhost/test");
        assert!(config.database_schema.is_none());
        assert_eq!(config.fetch_size, DEFAULT_FETCH_SIZE);
        assert_eq!(config.primary_key_column, "fid");
        assert!(!config.expose_primary_keys);
        assert!(!config.strict_identity);
        assert_eq!(config.default_varchar_length, 255);
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn test_builder_accepts_string() {
        let config = StoreConfig::builder(String::from("postgres://localhost/db")).build();
        assert_eq!(config.database_url, "postgres://localhost/db");
    }

    // =========================================================================
    // Namespace and Fetch Size Tests
    // =========================================================================

    #[test]
    fn test_database_schema() {
        let config = StoreConfig::builder("postgres://localhost/test")
            .database_schema("gis")
            .build();

        assert_eq!(config.database_schema.as_deref(), Some("gis"));
    }

    #[test]
    fn test_fetch_size_zero_means_fetch_all() {
        let config = StoreConfig::builder("postgres://localhost/test")
            .fetch_size(0)
            .build();

        assert_eq!(config.fetch_size, 0);
    }

    // =========================================================================
    // Identity Configuration Tests
    // =========================================================================

    #[test]
    fn test_primary_key_options() {
        let config = StoreConfig::builder("postgres://localhost/test")
            .primary_key_column("gid")
            .expose_primary_keys(true)
            .strict_identity(true)
            .build();

        assert_eq!(config.primary_key_column, "gid");
        assert!(config.expose_primary_keys);
        assert!(config.strict_identity);
    }

    // =========================================================================
    // Chained Builder Tests
    // =========================================================================

    #[test]
    fn test_full_custom_config() {
        let config = StoreConfig::builder("postgres://localhost/test")
            .database_schema("public")
            .fetch_size(50)
            .default_varchar_length(80)
            .max_connections(2)
            .build();

        assert_eq!(config.database_schema.as_deref(), Some("public"));
        assert_eq!(config.fetch_size, 50);
        assert_eq!(config.default_varchar_length, 80);
        assert_eq!(config.max_connections, 2);
    }

    #[test]
    fn test_builder_debug() {
        let builder = StoreConfig::builder("postgres://localhost/test");
        let debug_str = format!("{:?}", builder);
        assert!(debug_str.contains("StoreConfigBuilder"));
    }
}
