#![allow(dead_code)]

use std::time::{Duration, Instant};

use furnace_acq::{Config, DecodeType, FieldEndpoint, Point, PointSchema};
use furnace_mock::MockServer;
use tempfile::TempDir;

/// Start a mock register bank on an ephemeral port.
pub async fn start_mock() -> (MockServer, u16) {
    let server = MockServer::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let srv_clone = server.clone();
    tokio::spawn(async move {
        let _ = srv_clone.run_listener_on(listener).await;
    });
    // give server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;
    (server, port)
}

/// `f1_temp_zone1` (float at 1000) and `f1_fuel_state` (word at 1004).
pub fn furnace_schema() -> PointSchema {
    PointSchema::new(
        1,
        vec![
            Point::new("f1_temp_zone1", 1000, DecodeType::Float32BE),
            Point::new("f1_fuel_state", 1004, DecodeType::UInt16),
        ],
    )
    .unwrap()
}

pub fn seed_furnace(mock: &MockServer, temp: f32, fuel: u16) {
    mock.set_float(1000, temp);
    mock.set_word(1004, fuel);
}

pub fn config_for(port: u16, dir: &TempDir, schema: &PointSchema) -> Config {
    let endpoint = FieldEndpoint::direct("127.0.0.1", port)
        .with_connect_timeout(Duration::from_millis(500))
        .with_io_timeout(Duration::from_millis(300));
    Config::new(endpoint, schema).with_db_path(dir.path().join("furnaces.db"))
}

/// Poll `cond` until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < limit {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Install a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
