use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::acquisition::sample;
use crate::error::AcqError;
use crate::reading::{Reading, RecordId};
use crate::schema::PointSchema;
use crate::store::TimeSeriesStore;
use crate::transport::ConnectionGuard;

/// Whether an on-demand reading reached the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Persisted {
    Stored { record_id: RecordId },
    Unpersisted { reason: String },
}

impl Persisted {
    #[must_use]
    pub const fn record_id(&self) -> Option<RecordId> {
        match self {
            Self::Stored { record_id } => Some(*record_id),
            Self::Unpersisted { .. } => None,
        }
    }
}

/// A reading taken on request, with its persistence outcome.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FreshReading {
    pub reading: Reading,
    pub persisted: Persisted,
}

impl FreshReading {
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(self.persisted, Persisted::Stored { .. })
    }
}

/// One schema-wide read outside the periodic cadence, over the shared connection.
pub struct OnDemandReader {
    guard: Arc<ConnectionGuard>,
    store: Arc<TimeSeriesStore>,
    schema: Arc<PointSchema>,
}

impl OnDemandReader {
    #[must_use]
    pub const fn new(
        guard: Arc<ConnectionGuard>,
        store: Arc<TimeSeriesStore>,
        schema: Arc<PointSchema>,
    ) -> Self {
        Self {
            guard,
            store,
            schema,
        }
    }

    /// Read all points, then append the reading.
    ///
    /// A storage outage does not hide the fresh values: the reading is returned with
    /// `Persisted::Unpersisted`.
    ///
    /// # Errors
    ///
    /// Transport, timeout and decode failures (no partial reading is returned), and
    /// `AcqError::SchemaMismatch` from the store.
    pub async fn read_once(&self) -> Result<FreshReading, AcqError> {
        let reading = sample(&self.guard, &self.schema).await?;
        let persisted = match self.store.append(&reading).await {
            Ok(id) => {
                info!(record_id = %id, "on-demand reading stored");
                Persisted::Stored { record_id: id }
            }
            Err(AcqError::StorageUnavailable(reason)) => {
                warn!(%reason, "on-demand reading not persisted");
                Persisted::Unpersisted { reason }
            }
            Err(e) => return Err(e),
        };
        Ok(FreshReading { reading, persisted })
    }
}
