//! Query surface handed to the request router.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::acquisition::{AcquisitionHandle, AcquisitionLoop};
use crate::config::Config;
use crate::decode::encode_point;
use crate::error::AcqError;
use crate::on_demand::{FreshReading, OnDemandReader};
use crate::reading::{PointValue, Reading};
use crate::schema::PointSchema;
use crate::store::TimeSeriesStore;
use crate::transport::ConnectionGuard;

pub struct AcquisitionService {
    schema: Arc<PointSchema>,
    guard: Arc<ConnectionGuard>,
    store: Arc<TimeSeriesStore>,
    reader: OnDemandReader,
    interval: Duration,
}

impl AcquisitionService {
    /// Build the engine from an explicit configuration. No connection is opened and
    /// no table is created here.
    ///
    /// # Errors
    ///
    /// `AcqError::Config`/`AcqError::Io` when the configuration or schema is invalid.
    pub fn new(config: &Config) -> Result<Self, AcqError> {
        config.validate()?;
        let schema = Arc::new(config.point_schema()?);
        let guard = Arc::new(ConnectionGuard::new(config.endpoint.clone()));
        let store = Arc::new(TimeSeriesStore::new(
            config.storage.db_path.clone(),
            config.table_name(&schema),
            Arc::clone(&schema),
            config.storage.timeout(),
        )?);
        let reader = OnDemandReader::new(Arc::clone(&guard), Arc::clone(&store), Arc::clone(&schema));
        info!(
            schema_version = schema.version(),
            points = schema.len(),
            endpoint = %config.endpoint.addr(),
            table = store.table(),
            "acquisition service ready"
        );
        Ok(Self {
            schema,
            guard,
            store,
            reader,
            interval: config.acquisition.interval(),
        })
    }

    /// # Errors
    ///
    /// See [`TimeSeriesStore::latest`].
    pub async fn get_latest(&self) -> Result<Option<Reading>, AcqError> {
        self.store.latest().await
    }

    /// # Errors
    ///
    /// See [`TimeSeriesStore::history`].
    pub async fn get_history(&self, window: Duration) -> Result<Vec<Reading>, AcqError> {
        self.store.history(window).await
    }

    /// # Errors
    ///
    /// See [`OnDemandReader::read_once`].
    pub async fn trigger_read_and_persist(&self) -> Result<FreshReading, AcqError> {
        self.reader.read_once().await
    }

    /// Write a value to a writable point. Multi-word values are written word by word
    /// under one lease, so no reader observes a half-written value.
    ///
    /// # Errors
    ///
    /// `AcqError::UnknownPoint`, `AcqError::NotWritable`, `AcqError::Decode` when the
    /// value does not fit the point, or the transport failure of a word write.
    pub async fn write_point(&self, name: &str, value: PointValue) -> Result<(), AcqError> {
        let point = self.schema.resolve(name)?;
        if !point.writable {
            return Err(AcqError::NotWritable(name.to_string()));
        }
        let words = encode_point(point.decode, value)?;

        let address = point.address;
        self.guard
            .with_connection(|lease| {
                Box::pin(async move {
                    for (offset, word) in (0u16..).zip(words) {
                        lease.write_register(address + offset, word).await?;
                    }
                    Ok::<_, AcqError>(())
                })
            })
            .await?;

        info!(point = name, address = point.address, %value, "point written");
        Ok(())
    }

    /// Start the periodic loop with the configured interval.
    #[must_use]
    pub fn spawn_acquisition(&self) -> AcquisitionHandle {
        self.acquisition_loop(self.interval).spawn()
    }

    /// Loop over this service's guard and store with a custom interval.
    #[must_use]
    pub fn acquisition_loop(&self, interval: Duration) -> AcquisitionLoop {
        AcquisitionLoop::new(
            Arc::clone(&self.guard),
            Arc::clone(&self.store),
            Arc::clone(&self.schema),
            interval,
        )
    }

    #[must_use]
    pub fn schema(&self) -> &PointSchema {
        &self.schema
    }

    #[must_use]
    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    #[must_use]
    pub fn guard(&self) -> &ConnectionGuard {
        &self.guard
    }

    #[must_use]
    pub const fn reader(&self) -> &OnDemandReader {
        &self.reader
    }
}
