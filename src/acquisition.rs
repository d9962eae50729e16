//! Acquisition loop.
//!
//! A supervised background task that polls the whole point schema every interval and
//! appends each complete reading to the store. Cycle failures are contained: the
//! cycle is discarded, logged and the loop goes back to sleep. Only failing to open
//! the connection at startup ends the loop with an error.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::decode::decode_point;
use crate::error::AcqError;
use crate::reading::{now_timestamp, Reading, RecordId};
use crate::schema::PointSchema;
use crate::store::TimeSeriesStore;
use crate::transport::ConnectionGuard;

/// Read every point of `schema` under a single lease and decode it.
///
/// The timestamp is taken once, after the lease is granted and before the first
/// register is read. Any failing point fails the whole reading.
///
/// # Errors
///
/// The first transport, timeout or decode failure encountered.
pub async fn sample(guard: &ConnectionGuard, schema: &PointSchema) -> Result<Reading, AcqError> {
    let mut lease = guard.acquire().await;
    let mut reading = Reading::new(now_timestamp());
    for point in schema.all() {
        let words = lease
            .read_registers(point.address, point.decode.word_count())
            .await?;
        let value = decode_point(point.decode, &words).map_err(|e| match e {
            AcqError::Decode(msg) => AcqError::Decode(format!("{} @{}: {msg}", point.name, point.address)),
            other => other,
        })?;
        debug!(point = %point.name, address = point.address, %value, "point decoded");
        reading.insert(point.name.clone(), value);
    }
    Ok(reading)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Connecting,
    Polling,
    Persisting,
    Sleeping,
}

/// Counters updated by the loop, readable from any task.
#[derive(Debug, Default)]
pub struct LoopStats {
    completed: AtomicU64,
    failed: AtomicU64,
    // 0 until the first append; SQLite rowids start at 1
    last_record_id: AtomicI64,
}

impl LoopStats {
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn last_record_id(&self) -> Option<RecordId> {
        match self.last_record_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(RecordId(id)),
        }
    }

    fn record_success(&self, id: RecordId) {
        self.last_record_id.store(id.0, Ordering::Release);
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
    }
}

pub struct AcquisitionLoop {
    guard: Arc<ConnectionGuard>,
    store: Arc<TimeSeriesStore>,
    schema: Arc<PointSchema>,
    interval: Duration,
}

impl AcquisitionLoop {
    #[must_use]
    pub const fn new(
        guard: Arc<ConnectionGuard>,
        store: Arc<TimeSeriesStore>,
        schema: Arc<PointSchema>,
        interval: Duration,
    ) -> Self {
        Self {
            guard,
            store,
            schema,
            interval,
        }
    }

    /// Start the loop on the tokio runtime.
    #[must_use]
    pub fn spawn(self) -> AcquisitionHandle {
        let (state_tx, state_rx) = watch::channel(LoopState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(LoopStats::default());
        let task = tokio::spawn(self.run(state_tx, Arc::clone(&stats), shutdown_rx));
        AcquisitionHandle {
            state: state_rx,
            stats,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(
        self,
        state: watch::Sender<LoopState>,
        stats: Arc<LoopStats>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), AcqError> {
        state.send_replace(LoopState::Connecting);
        if let Err(e) = self.guard.ensure_connected().await {
            error!(endpoint = %self.guard.endpoint().addr(), error = %e, "cannot open field connection");
            return Err(e);
        }
        info!(
            points = self.schema.len(),
            table = self.store.table(),
            interval_ms = self.interval.as_millis() as u64,
            "acquisition loop started"
        );

        while !*shutdown.borrow() {
            state.send_replace(LoopState::Polling);
            match self.cycle(&state).await {
                Ok(id) => {
                    debug!(record_id = %id, "cycle persisted");
                    stats.record_success(id);
                }
                Err(e) => {
                    warn!(error = %e, "cycle discarded");
                    stats.record_failure();
                }
            }

            state.send_replace(LoopState::Sleeping);
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = stop_requested(&mut shutdown) => break,
            }
        }
        info!(completed = stats.completed(), failed = stats.failed(), "acquisition loop stopped");
        Ok(())
    }

    async fn cycle(&self, state: &watch::Sender<LoopState>) -> Result<RecordId, AcqError> {
        let reading = sample(&self.guard, &self.schema).await?;
        state.send_replace(LoopState::Persisting);
        self.store.append(&reading).await
    }
}

// resolves once `true` is sent; never resolves if the sender is gone
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

/// Control handle for a spawned [`AcquisitionLoop`].
pub struct AcquisitionHandle {
    state: watch::Receiver<LoopState>,
    stats: Arc<LoopStats>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), AcqError>>,
}

impl AcquisitionHandle {
    /// Watch of the loop's current state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    #[must_use]
    pub fn stats(&self) -> Arc<LoopStats> {
        Arc::clone(&self.stats)
    }

    /// Ask the loop to stop. Observed between cycles; an in-flight cycle completes.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end and return its result.
    ///
    /// # Errors
    ///
    /// The startup failure that ended the loop, if any.
    pub async fn join(self) -> Result<(), AcqError> {
        match self.task.await {
            Ok(res) => res,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(AcqError::Transport(format!("acquisition task cancelled: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_start_empty() {
        let stats = LoopStats::default();
        assert_eq!(stats.completed(), 0);
        assert_eq!(stats.last_record_id(), None);
        stats.record_success(RecordId(4));
        stats.record_failure();
        assert_eq!(stats.completed(), 1);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.last_record_id(), Some(RecordId(4)));
    }

    #[tokio::test]
    async fn stop_requested_ignores_false() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(false);
        let waited = tokio::time::timeout(Duration::from_millis(50), stop_requested(&mut rx)).await;
        assert!(waited.is_err());
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_millis(50), stop_requested(&mut rx))
            .await
            .unwrap();
    }
}
