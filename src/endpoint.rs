use std::time::Duration;

use serde::Deserialize;

/// The Modbus TCP register bank the engine polls, plus the bounds applied to every
/// operation against it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FieldEndpoint {
    pub host: String,
    pub port: u16,
    /// Modbus unit identifier (slave id).
    pub unit_id: u8,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 502;
const DEFAULT_UNIT_ID: u8 = 1;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;
const DEFAULT_IO_TIMEOUT_MS: u64 = 1000;

impl FieldEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            unit_id: DEFAULT_UNIT_ID,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
        }
    }

    /// Endpoint at `host:port` with default unit id and timeouts.
    #[must_use]
    pub fn direct(host: impl Into<String>, port: u16) -> Self {
        Self::new().with_host(host).with_port(port)
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    #[must_use]
    pub const fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// "host:port", suitable for `lookup_host`.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for FieldEndpoint {
    fn default() -> Self {
        Self::new()
    }
}
