//! Engine configuration.
//!
//! A `Config` is built once by the process's composition root (from a TOML file,
//! optionally adjusted from the environment) and passed down explicitly; nothing in
//! the library reads configuration from globals.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::endpoint::FieldEndpoint;
use crate::error::AcqError;
use crate::schema::{is_identifier, Point, PointSchema};
use crate::toml_helpers::parse_error;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub interval_secs: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

impl AcquisitionConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    /// Defaults to `furnace_data_v<schema version>`.
    pub table: Option<String>,
    pub timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("furnaces_database.db"),
            table: None,
            timeout_ms: 2000,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_schema_version")]
    pub version: u32,
    /// Standalone schema file; relative paths resolve against the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub points: Vec<Point>,
}

const fn default_schema_version() -> u32 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: FieldEndpoint,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub schema: SchemaConfig,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    /// Configuration with the given endpoint and inline schema, defaults elsewhere.
    #[must_use]
    pub fn new(endpoint: FieldEndpoint, schema: &PointSchema) -> Self {
        Self {
            endpoint,
            acquisition: AcquisitionConfig::default(),
            storage: StorageConfig::default(),
            schema: SchemaConfig {
                version: schema.version(),
                path: None,
                points: schema.all().to_vec(),
            },
        }
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.acquisition.interval_secs = interval.as_secs();
        self
    }

    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.db_path = path.into();
        self
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.storage.table = Some(table.into());
        self
    }

    /// Parse a TOML document. A relative `schema.path` is kept as written.
    ///
    /// # Errors
    ///
    /// Returns `AcqError::Config` on TOML errors.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, AcqError> {
        toml::from_str(s).map_err(|e| parse_error("config", &e))
    }

    /// Load a config file; a relative `schema.path` is resolved against the file's
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns `AcqError::Io` when the file cannot be read and `AcqError::Config`
    /// when it cannot be parsed.
    pub fn from_path(path: &Path) -> Result<Self, AcqError> {
        let s = fs::read_to_string(path)?;
        let mut cfg = Self::from_str(&s)?;
        if let (Some(schema_path), Some(dir)) = (cfg.schema.path.as_mut(), path.parent()) {
            if schema_path.is_relative() {
                *schema_path = dir.join(&*schema_path);
            }
        }
        Ok(cfg)
    }

    /// Override selected fields from `FURNACE_*` environment variables. Values that
    /// do not parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("FURNACE_HOST") {
            if !host.trim().is_empty() {
                self.endpoint.host = host.trim().to_string();
            }
        }
        if let Some(port) = env_parse("FURNACE_PORT") {
            self.endpoint.port = port;
        }
        if let Some(unit_id) = env_parse("FURNACE_UNIT_ID") {
            self.endpoint.unit_id = unit_id;
        }
        if let Some(ms) = env_parse("FURNACE_IO_TIMEOUT_MS") {
            self.endpoint.io_timeout_ms = ms;
        }
        if let Some(secs) = env_parse("FURNACE_INTERVAL_SECS") {
            self.acquisition.interval_secs = secs;
        }
        if let Ok(path) = std::env::var("FURNACE_DB_PATH") {
            if !path.trim().is_empty() {
                self.storage.db_path = PathBuf::from(path.trim());
            }
        }
    }

    /// Build the active point schema: the standalone file when `schema.path` is set,
    /// the inline points otherwise.
    ///
    /// # Errors
    ///
    /// Returns `AcqError::Config` when both or neither sources are given or the
    /// resulting schema is invalid, `AcqError::Io` when the schema file is unreadable.
    pub fn point_schema(&self) -> Result<PointSchema, AcqError> {
        match (&self.schema.path, self.schema.points.is_empty()) {
            (Some(_), false) => Err(AcqError::Config(
                "schema.path and inline schema.points are mutually exclusive".into(),
            )),
            (Some(path), true) => PointSchema::from_path(path),
            (None, _) => PointSchema::new(self.schema.version, self.schema.points.clone()),
        }
    }

    /// Table name for the given schema.
    #[must_use]
    pub fn table_name(&self, schema: &PointSchema) -> String {
        self.storage
            .table
            .clone()
            .unwrap_or_else(|| schema.default_table())
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AcqError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<(), AcqError> {
        if self.endpoint.host.trim().is_empty() {
            return Err(AcqError::Config("endpoint.host is empty".into()));
        }
        if self.endpoint.connect_timeout_ms == 0 || self.endpoint.io_timeout_ms == 0 {
            return Err(AcqError::Config("endpoint timeouts must be non-zero".into()));
        }
        if self.acquisition.interval_secs == 0 {
            return Err(AcqError::Config(
                "acquisition.interval_secs must be at least 1".into(),
            ));
        }
        if self.storage.timeout_ms == 0 {
            return Err(AcqError::Config("storage.timeout_ms must be non-zero".into()));
        }
        if let Some(table) = &self.storage.table {
            if !is_identifier(table) {
                return Err(AcqError::Config(format!("invalid table name: {table:?}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DecodeType;

    const SAMPLE: &str = r#"
[endpoint]
host = "10.0.0.7"
port = 1502
io_timeout_ms = 400

[acquisition]
interval_secs = 2

[storage]
db_path = "/var/lib/furnace/data.db"

[schema]
version = 2

[[schema.points]]
name = "f1_temp_zone1"
address = 1000
decode = "float32_be"

[[schema.points]]
name = "f1_fuel_state"
address = 1004
decode = "uint16"
"#;

    #[test]
    fn parses_sample() {
        let cfg = Config::from_str(SAMPLE).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.endpoint.addr(), "10.0.0.7:1502");
        assert_eq!(cfg.endpoint.unit_id, 1);
        assert_eq!(cfg.endpoint.connect_timeout_ms, 3000);
        assert_eq!(cfg.endpoint.io_timeout(), Duration::from_millis(400));
        assert_eq!(cfg.acquisition.interval(), Duration::from_secs(2));
        assert_eq!(cfg.storage.timeout_ms, 2000);

        let schema = cfg.point_schema().unwrap();
        assert_eq!(schema.version(), 2);
        assert_eq!(schema.resolve("f1_fuel_state").unwrap().decode, DecodeType::UInt16);
        assert_eq!(cfg.table_name(&schema), "furnace_data_v2");
    }

    #[test]
    fn rejects_invalid_values() {
        let mut cfg = Config::from_str(SAMPLE).unwrap();
        cfg.acquisition.interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::from_str(SAMPLE).unwrap();
        cfg.storage.table = Some("furnace data; DROP".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn schema_sources_are_exclusive() {
        let mut cfg = Config::from_str(SAMPLE).unwrap();
        cfg.schema.path = Some(PathBuf::from("schemas/single_furnace_motor.toml"));
        assert!(matches!(cfg.point_schema(), Err(AcqError::Config(_))));
    }

    #[test]
    fn missing_schema_is_parse_error() {
        let err = Config::from_str("[endpoint]\nport = 502\n").unwrap_err();
        assert!(matches!(err, AcqError::Config(msg) if msg.contains("config parse error")));
    }

    #[test]
    fn loads_preset_relative_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("preset.toml"),
            "version = 7\n[[points]]\nname = \"f1_mode\"\naddress = 1009\ndecode = \"uint16\"\n",
        )
        .unwrap();
        let cfg_path = dir.path().join("furnace.toml");
        fs::write(&cfg_path, "[schema]\npath = \"preset.toml\"\n").unwrap();

        let cfg = Config::from_path(&cfg_path).unwrap();
        let schema = cfg.point_schema().unwrap();
        assert_eq!(schema.version(), 7);
        assert_eq!(cfg.table_name(&schema), "furnace_data_v7");
    }
}
