//! Connection guard.
//!
//! One long-lived Modbus TCP connection is shared by the acquisition loop and every
//! on-demand read. `ConnectionGuard` keeps it behind a tokio mutex: callers obtain a
//! [`ConnectionLease`] and every register operation issued through the lease is
//! totally ordered with respect to every other lease. Dropping the lease releases
//! access, whichever way the caller leaves its scope.
//!
//! The connection is opened lazily. When an operation fails at the transport level
//! (I/O error, closed socket, timeout) the cached connection is discarded, one new
//! connection is opened and the operation retried once; a second failure is
//! returned to the caller. Device exception responses are returned without retry.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::lookup_host;
use tokio::sync::{Mutex as TokioMutex, MutexGuard};
use tokio::time::timeout as tokio_timeout;
use tokio_modbus::client::{tcp, Context, Reader, Writer};
use tokio_modbus::Slave;
use tracing::{debug, info, warn};

use crate::endpoint::FieldEndpoint;
use crate::error::AcqError;

/// Future returned by a [`ConnectionGuard::with_connection`] body.
pub type LeaseFuture<'l, T> = Pin<Box<dyn Future<Output = Result<T, AcqError>> + Send + 'l>>;

#[derive(Clone, Copy, Debug)]
enum Request {
    Read { address: u16, count: u16 },
    Write { address: u16, value: u16 },
}

impl Request {
    const fn label(self) -> &'static str {
        match self {
            Self::Read { .. } => "read_registers",
            Self::Write { .. } => "write_register",
        }
    }
}

enum Failure {
    /// The connection is suspect; drop it and reconnect.
    Transport(AcqError),
    /// The device answered, the connection is fine.
    Answered(AcqError),
}

// helper that performs one request on an established context
async fn perform(ctx: &mut Context, req: Request, timeout: Duration) -> Result<Vec<u16>, Failure> {
    let res = match req {
        Request::Read { address, count } => {
            tokio_timeout(timeout, ctx.read_holding_registers(address, count)).await
        }
        Request::Write { address, value } => {
            let write = async move {
                let res = ctx.write_single_register(address, value).await;
                res.map(|answer| answer.map(|()| Vec::new()))
            };
            tokio_timeout(timeout, write).await
        }
    };
    match res {
        Err(_elapsed) => Err(Failure::Transport(AcqError::Timeout(req.label()))),
        Ok(Err(e)) => Err(Failure::Transport(AcqError::Transport(format!(
            "{}: {e}",
            req.label()
        )))),
        Ok(Ok(Err(exception))) => Err(Failure::Answered(AcqError::Transport(format!(
            "{}: device exception {exception:?}",
            req.label()
        )))),
        Ok(Ok(Ok(words))) => {
            if let Request::Read { address, count } = req {
                if words.len() != usize::from(count) {
                    return Err(Failure::Answered(AcqError::Decode(format!(
                        "asked for {count} register(s) at {address}, got {}",
                        words.len()
                    ))));
                }
            }
            Ok(words)
        }
    }
}

/// Mutual-exclusion boundary around the single field-protocol connection.
pub struct ConnectionGuard {
    endpoint: FieldEndpoint,
    conn: TokioMutex<Option<Context>>,
    connects: AtomicU64,
}

impl ConnectionGuard {
    #[must_use]
    pub fn new(endpoint: FieldEndpoint) -> Self {
        Self {
            endpoint,
            conn: TokioMutex::new(None),
            connects: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn endpoint(&self) -> &FieldEndpoint {
        &self.endpoint
    }

    /// Wait for exclusive access to the connection.
    pub async fn acquire(&self) -> ConnectionLease<'_> {
        ConnectionLease {
            guard: self,
            conn: self.conn.lock().await,
        }
    }

    /// Run `f` with exclusive access to the connection; access is released when `f`'s
    /// future completes, fails or is dropped.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns.
    pub async fn with_connection<'g, T, F>(&'g self, f: F) -> Result<T, AcqError>
    where
        F: for<'l> FnOnce(&'l mut ConnectionLease<'g>) -> LeaseFuture<'l, T>,
    {
        let mut lease = self.acquire().await;
        f(&mut lease).await
    }

    /// Open the connection now if it is not open yet.
    ///
    /// # Errors
    ///
    /// Returns a transport error when neither the first attempt nor the single
    /// reconnect attempt succeeds.
    pub async fn ensure_connected(&self) -> Result<(), AcqError> {
        self.acquire().await.ensure_connected().await
    }

    /// Number of connections opened so far (initial open plus reconnects).
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    async fn connect(&self) -> Result<Context, AcqError> {
        let addr = self.endpoint.addr();
        let timeout = self.endpoint.connect_timeout();
        let addrs = tokio_timeout(timeout, lookup_host(addr.as_str()))
            .await
            .map_err(|_| AcqError::Timeout("resolve"))?
            .map_err(|e| AcqError::Transport(format!("bad address {addr}: {e}")))?;

        let mut last_err: Option<AcqError> = None;
        for remote in addrs {
            let slave = Slave(self.endpoint.unit_id);
            match tokio_timeout(timeout, tcp::connect_slave(remote, slave)).await {
                Ok(Ok(ctx)) => {
                    self.connects.fetch_add(1, Ordering::Relaxed);
                    info!(%remote, unit_id = self.endpoint.unit_id, "connected to register bank");
                    return Ok(ctx);
                }
                Ok(Err(e)) => {
                    last_err = Some(AcqError::Transport(format!("connect {remote}: {e}")));
                }
                Err(_) => last_err = Some(AcqError::Timeout("connect")),
            }
        }
        Err(last_err
            .unwrap_or_else(|| AcqError::Transport(format!("{addr} resolved to no addresses"))))
    }
}

/// Exclusive handle on the shared connection. Access is released on drop.
pub struct ConnectionLease<'a> {
    guard: &'a ConnectionGuard,
    conn: MutexGuard<'a, Option<Context>>,
}

impl ConnectionLease<'_> {
    /// Read `count` consecutive holding registers starting at `address`.
    ///
    /// # Errors
    ///
    /// `AcqError::Transport`/`AcqError::Timeout` when the exchange fails twice (or
    /// the device answers with an exception), `AcqError::Decode` when the response
    /// holds the wrong number of registers.
    pub async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, AcqError> {
        debug!(address, count, "read holding registers");
        self.exchange(Request::Read { address, count }).await
    }

    /// Write one holding register.
    ///
    /// # Errors
    ///
    /// `AcqError::Transport`/`AcqError::Timeout` when the exchange fails twice or the
    /// device answers with an exception.
    pub async fn write_register(&mut self, address: u16, value: u16) -> Result<(), AcqError> {
        debug!(address, value, "write single register");
        self.exchange(Request::Write { address, value }).await.map(drop)
    }

    /// Open the connection if needed, with one retry.
    ///
    /// # Errors
    ///
    /// Returns the second connect failure.
    pub async fn ensure_connected(&mut self) -> Result<(), AcqError> {
        if self.conn.is_some() {
            return Ok(());
        }
        match self.guard.connect().await {
            Ok(ctx) => *self.conn = Some(ctx),
            Err(e) => {
                warn!(error = %e, "connect failed, retrying once");
                *self.conn = Some(self.guard.connect().await?);
            }
        }
        Ok(())
    }

    async fn attempt(&mut self, req: Request) -> Result<Vec<u16>, Failure> {
        if self.conn.is_none() {
            let ctx = self.guard.connect().await.map_err(Failure::Transport)?;
            *self.conn = Some(ctx);
        }
        let io_timeout = self.guard.endpoint.io_timeout();
        let Some(ctx) = (*self.conn).as_mut() else {
            return Err(Failure::Transport(AcqError::Transport("no connection".into())));
        };
        let res = perform(ctx, req, io_timeout).await;
        if matches!(res, Err(Failure::Transport(_))) {
            // the context may still have an unanswered request in flight
            *self.conn = None;
        }
        res
    }

    async fn exchange(&mut self, req: Request) -> Result<Vec<u16>, AcqError> {
        match self.attempt(req).await {
            Ok(words) => Ok(words),
            Err(Failure::Answered(e)) => Err(e),
            Err(Failure::Transport(e)) => {
                warn!(op = req.label(), error = %e, "transport failure, reconnecting once");
                match self.attempt(req).await {
                    Ok(words) => Ok(words),
                    Err(Failure::Answered(e) | Failure::Transport(e)) => Err(e),
                }
            }
        }
    }
}
