//! Modbus TCP register-bank simulator.
//!
//! `MockServer` answers holding-register reads and writes from an in-memory bank.
//! Tests seed the bank, inject per-address response delays and inspect connection
//! and concurrency counters. Clones share the same bank.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tracing::{debug, info, warn};

use furnace_acq::decode::encode_float32;

#[derive(Default)]
struct Bank {
    registers: Mutex<HashMap<u16, u16>>,
    delays: Mutex<HashMap<u16, Duration>>,
    connections: AtomicU64,
    requests: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct MockServer {
    bank: Arc<Bank>,
}

impl MockServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_word(&self, address: u16, value: u16) {
        lock(&self.bank.registers).insert(address, value);
    }

    /// Store consecutive words starting at `address` in one step; a concurrent read
    /// sees either all old or all new words.
    pub fn set_words(&self, address: u16, values: &[u16]) {
        let mut regs = lock(&self.bank.registers);
        for (offset, value) in (0u16..).zip(values) {
            regs.insert(address.wrapping_add(offset), *value);
        }
    }

    /// Store a float as two big-endian words at `address` and `address + 1`.
    pub fn set_float(&self, address: u16, value: f32) {
        self.set_words(address, &encode_float32(value));
    }

    #[must_use]
    pub fn word(&self, address: u16) -> Option<u16> {
        lock(&self.bank.registers).get(&address).copied()
    }

    /// Delay every request that touches `address` by `delay` before answering.
    pub fn set_delay(&self, address: u16, delay: Duration) {
        lock(&self.bank.delays).insert(address, delay);
    }

    pub fn clear_delay(&self, address: u16) {
        lock(&self.bank.delays).remove(&address);
    }

    /// Accepted TCP connections since start.
    #[must_use]
    pub fn connection_count(&self) -> u64 {
        self.bank.connections.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.bank.requests.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were being answered at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> u64 {
        self.bank.max_in_flight.load(Ordering::SeqCst)
    }

    /// Load `[[registers]]` entries from a TOML seed document.
    ///
    /// # Errors
    ///
    /// Returns an error when the document does not parse.
    pub fn seed_from_toml(&self, s: &str) -> anyhow::Result<usize> {
        let seed: SeedFile = toml::from_str(s)?;
        for entry in &seed.registers {
            match entry.value {
                SeedValue::Float(v) => self.set_float(entry.address, v),
                SeedValue::Word(v) => self.set_word(entry.address, v),
            }
        }
        Ok(seed.registers.len())
    }

    /// Bind `addr` and serve until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns bind or accept errors.
    pub async fn run(self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.run_listener_on(listener).await
    }

    /// Serve on an already bound listener (tests bind `127.0.0.1:0`).
    ///
    /// # Errors
    ///
    /// Returns accept errors.
    pub async fn run_listener_on(self, listener: TcpListener) -> anyhow::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "mock register bank listening");
        let server = Server::new(listener);
        let on_connected = move |stream, socket_addr: SocketAddr| {
            let bank = Arc::clone(&self.bank);
            bank.connections.fetch_add(1, Ordering::SeqCst);
            debug!(%socket_addr, "client connected");
            async move {
                accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                    Ok(Some(BankService {
                        bank: Arc::clone(&bank),
                    }))
                })
            }
        };
        let on_process_error = |err: io::Error| {
            warn!("mock server error: {err}");
        };
        server.serve(&on_connected, on_process_error).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct SeedFile {
    #[serde(default)]
    registers: Vec<SeedEntry>,
}

#[derive(Deserialize)]
struct SeedEntry {
    address: u16,
    #[serde(flatten)]
    value: SeedValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum SeedValue {
    Float(f32),
    Word(u16),
}

struct BankService {
    bank: Arc<Bank>,
}

// decrements the in-flight counter when the response future completes or is dropped
struct InFlight(Arc<Bank>);

impl InFlight {
    fn enter(bank: &Arc<Bank>) -> Self {
        let now = bank.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        bank.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(bank))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BankService {
    fn delay_for(&self, address: u16, count: u16) -> Option<Duration> {
        let delays = lock(&self.bank.delays);
        (0..count)
            .filter_map(|i| delays.get(&address.wrapping_add(i)).copied())
            .max()
    }

    fn read(&self, address: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        let regs = lock(&self.bank.registers);
        (0..count)
            .map(|i| {
                regs.get(&address.wrapping_add(i))
                    .copied()
                    .ok_or(ExceptionCode::IllegalDataAddress)
            })
            .collect()
    }

    fn write(&self, address: u16, values: &[u16]) {
        let mut regs = lock(&self.bank.registers);
        for (offset, value) in (0u16..).zip(values) {
            regs.insert(address.wrapping_add(offset), *value);
        }
    }
}

impl tokio_modbus::server::Service for BankService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = Pin<Box<dyn Future<Output = Result<Response, ExceptionCode>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let guard = InFlight::enter(&self.bank);
        self.bank.requests.fetch_add(1, Ordering::SeqCst);

        let (delay, res) = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                debug!(addr, cnt, "read holding registers");
                (
                    self.delay_for(addr, cnt),
                    self.read(addr, cnt).map(Response::ReadHoldingRegisters),
                )
            }
            Request::WriteSingleRegister(addr, value) => {
                debug!(addr, value, "write single register");
                self.write(addr, std::slice::from_ref(&value));
                (
                    self.delay_for(addr, 1),
                    Ok(Response::WriteSingleRegister(addr, value)),
                )
            }
            Request::WriteMultipleRegisters(addr, values) => {
                debug!(addr, n = values.len(), "write multiple registers");
                self.write(addr, &values);
                #[allow(clippy::cast_possible_truncation)]
                let n = values.len() as u16;
                (
                    self.delay_for(addr, n),
                    Ok(Response::WriteMultipleRegisters(addr, n)),
                )
            }
            other => {
                warn!("unsupported request: {other:?}");
                (None, Err(ExceptionCode::IllegalFunction))
            }
        };

        Box::pin(async move {
            let _guard = guard;
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            res
        })
    }
}
