use std::collections::BTreeMap;
use std::fmt;

use chrono::{Local, NaiveDateTime, Timelike};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Wire and storage format of reading timestamps (local time, whole seconds).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Decoded value of one point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointValue {
    Float(f32),
    UInt(u16),
    Bool(bool),
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for PointValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Float(v) => serializer.serialize_f32(*v),
            Self::UInt(v) => serializer.serialize_u16(*v),
            Self::Bool(v) => serializer.serialize_bool(*v),
        }
    }
}

/// Surrogate key assigned by the store on append; strictly increasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Current local time truncated to whole seconds.
#[must_use]
pub fn now_timestamp() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// One complete snapshot of every point in a schema, sharing a single timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    timestamp: NaiveDateTime,
    values: BTreeMap<String, PointValue>,
}

impl Reading {
    #[must_use]
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: PointValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PointValue) {
        self.values.insert(name.into(), value);
    }

    #[must_use]
    pub const fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<PointValue> {
        self.values.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

}

// flat object: every point plus "timestamp"
impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry(
            "timestamp",
            &self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        )?;
        map.end()
    }
}
