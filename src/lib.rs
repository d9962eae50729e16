#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_markdown,
    clippy::too_long_first_doc_paragraph
)]

//! furnace_acq
//!
//! furnace_acq polls furnace sensors and actuators exposed as Modbus TCP holding
//! registers, decodes typed point values under a data-driven point schema and keeps an
//! append-only SQLite log of complete, timestamped readings.
//!
//! Main parts:
//! - one shared field connection behind a mutex (`ConnectionGuard`)
//! - a supervised periodic acquisition loop (`AcquisitionLoop`)
//! - on-demand reads that contend with the loop over the same connection
//! - the query surface used by a request router (`AcquisitionService`)
//! - a register-bank simulator for tests (separate crate `furnace_mock`)
//!
//! Example:
//! ```no_run
//! use furnace_acq::{AcquisitionService, Config};
//! # async fn demo() -> Result<(), furnace_acq::AcqError> {
//! let config = Config::from_path(std::path::Path::new("furnace_acq.example.toml"))?;
//! let service = AcquisitionService::new(&config)?;
//! service.store().create_table().await?;
//! let handle = service.spawn_acquisition();
//! let latest = service.get_latest().await?;
//! # let _ = (handle, latest);
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod config;
pub mod decode;
pub mod endpoint;
pub mod error;
pub mod on_demand;
pub mod reading;
pub mod schema;
pub mod service;
pub mod store;
pub mod toml_helpers;
pub mod transport;

pub use acquisition::{AcquisitionHandle, AcquisitionLoop, LoopState, LoopStats};
pub use config::Config;
pub use endpoint::FieldEndpoint;
pub use error::AcqError;
pub use on_demand::{FreshReading, OnDemandReader, Persisted};
pub use reading::{PointValue, Reading, RecordId};
pub use schema::{DecodeType, Point, PointSchema};
pub use service::AcquisitionService;
pub use store::TimeSeriesStore;
pub use transport::{ConnectionGuard, ConnectionLease, LeaseFuture};
