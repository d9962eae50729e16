//! Point schema.
//!
//! A schema is the ordered, versioned list of points a reading must contain. It is
//! loaded once at startup from configuration and never mutated afterwards; every
//! deployment variant (motor-speed point, third temperature zone, single or dual
//! furnace) is just a different schema file.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AcqError;
use crate::toml_helpers::parse_error;

/// Column names the store reserves for itself.
pub const RESERVED_COLUMNS: [&str; 2] = ["id", "timestamp"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum DecodeType {
    /// Two registers, big-endian word order, IEEE-754 single.
    #[serde(rename = "float32_be", alias = "Float32BE", alias = "float")]
    Float32BE,
    #[serde(rename = "uint16", alias = "UInt16", alias = "word")]
    UInt16,
    #[serde(rename = "bool", alias = "Bool")]
    Bool,
}

impl DecodeType {
    /// Number of consecutive registers one value occupies.
    #[must_use]
    pub const fn word_count(self) -> u16 {
        match self {
            Self::Float32BE => 2,
            Self::UInt16 | Self::Bool => 1,
        }
    }

    /// SQLite column affinity used when provisioning a table.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Float32BE => "REAL",
            Self::UInt16 | Self::Bool => "INTEGER",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Float32BE => "float32_be",
            Self::UInt16 => "uint16",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for DecodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Point {
    pub name: String,
    pub address: u16,
    pub decode: DecodeType,
    /// Setpoints and mode fields accept operator writes; sensors do not.
    #[serde(default)]
    pub writable: bool,
}

impl Point {
    #[must_use]
    pub fn new(name: impl Into<String>, address: u16, decode: DecodeType) -> Self {
        Self {
            name: name.into(),
            address,
            decode,
            writable: false,
        }
    }

    #[must_use]
    pub const fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// First register after this point's span.
    fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.decode.word_count())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`: point names become SQL column names.
#[must_use]
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    version: u32,
    points: Vec<Point>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointSchema {
    version: u32,
    points: Vec<Point>,
}

impl PointSchema {
    /// Build and validate a schema.
    ///
    /// # Errors
    ///
    /// Returns `AcqError::Config` for an empty schema, an invalid or reserved point
    /// name, a duplicate name or address, a register span running past the address
    /// space, or two points whose register spans overlap.
    pub fn new(version: u32, points: Vec<Point>) -> Result<Self, AcqError> {
        if points.is_empty() {
            return Err(AcqError::Config("point schema has no points".into()));
        }
        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for p in &points {
            if !is_identifier(&p.name) {
                return Err(AcqError::Config(format!("invalid point name: {:?}", p.name)));
            }
            if RESERVED_COLUMNS.contains(&p.name.to_ascii_lowercase().as_str()) {
                return Err(AcqError::Config(format!("reserved point name: {}", p.name)));
            }
            if !names.insert(p.name.as_str()) {
                return Err(AcqError::Config(format!("duplicate point name: {}", p.name)));
            }
            if !addresses.insert(p.address) {
                return Err(AcqError::Config(format!(
                    "duplicate point address: {} ({})",
                    p.address, p.name
                )));
            }
            if p.end() > u32::from(u16::MAX) + 1 {
                return Err(AcqError::Config(format!(
                    "point {} runs past the last register",
                    p.name
                )));
            }
        }

        let mut spans: Vec<&Point> = points.iter().collect();
        spans.sort_by_key(|p| p.address);
        for pair in spans.windows(2) {
            if pair[0].end() > u32::from(pair[1].address) {
                return Err(AcqError::Config(format!(
                    "points {} and {} overlap at register {}",
                    pair[0].name, pair[1].name, pair[1].address
                )));
            }
        }

        Ok(Self { version, points })
    }

    /// Parse a standalone schema file (`version = N` plus `[[points]]` tables).
    ///
    /// # Errors
    ///
    /// Returns `AcqError::Config` on TOML errors or an invalid schema.
    pub fn from_toml_str(s: &str) -> Result<Self, AcqError> {
        let file: SchemaFile = toml::from_str(s).map_err(|e| parse_error("schema", &e))?;
        Self::new(file.version, file.points)
    }

    /// Load a standalone schema file from disk.
    ///
    /// # Errors
    ///
    /// Returns `AcqError::Io` when the file cannot be read, `AcqError::Config` when
    /// it does not describe a valid schema.
    pub fn from_path(path: &Path) -> Result<Self, AcqError> {
        let s = fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Every point, in schema order.
    #[must_use]
    pub fn all(&self) -> &[Point] {
        &self.points
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Look a point up by name.
    ///
    /// # Errors
    ///
    /// Returns `AcqError::UnknownPoint` when the schema has no point called `name`.
    pub fn resolve(&self, name: &str) -> Result<&Point, AcqError> {
        self.points
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| AcqError::UnknownPoint(name.to_string()))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.points.iter().map(|p| p.name.as_str())
    }

    /// Default table name for this schema version.
    #[must_use]
    pub fn default_table(&self) -> String {
        format!("furnace_data_v{}", self.version)
    }
}
