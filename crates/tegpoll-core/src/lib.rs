//! # tegpoll Core
//!
//! Resilient acquisition of energy-gateway telemetry.
//!
//! One poll cycle authenticates against a source, fetches the raw energy
//! summary, normalizes it into [`MetricPoint`]s and hands the complete batch
//! to a sink. Every outbound call runs under a [`RetryExecutor`]; the
//! [`FaultKind`] of an error decides whether it is retried, triggers a single
//! reauthentication, or ends the cycle.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Device clients: fleet API, local gateway, local appliance |
//! | [`builder`] | Wires a poll cycle from configuration |
//! | [`config`] | Poller configuration file |
//! | [`credentials`] | Credential record, store and file persistence |
//! | [`device`] | Device client contract and raw readings |
//! | [`domain`] | Metric points, measure table, timestamps |
//! | [`error`] | Acquisition and validation errors |
//! | [`fault`] | Fault classification |
//! | [`http_client`] | HTTP client abstraction |
//! | [`normalize`] | Raw reading to metric points |
//! | [`poll`] | Poll cycle state machine |
//! | [`refresh`] | Token refresh and session login |
//! | [`retry`] | Retry policy and executor |
//! | [`sink`] | Warehouse, InfluxDB and in-memory sinks |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tegpoll_core::{PollerBuilder, PollerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cycle = PollerBuilder::new(PollerConfig::load(None)?).build()?;
//!     let report = cycle.run().await;
//!     for point in &report.points {
//!         println!("{} {} {}", point.series(), point.value(), point.timestamp());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / cron     │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │   PollCycle     │────▶│ TokenRefresher   │──┐
//! └────────┬────────┘     └──────────────────┘  │
//!          │                                    ▼
//!          ▼                          ┌──────────────────┐
//! ┌─────────────────┐                 │ CredentialStore  │
//! │  DeviceClient   │                 └──────────────────┘
//! │ (RetryExecutor) │────▶ HttpClient
//! └────────┬────────┘
//!          │ raw JSON
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │MetricNormalizer │────▶│   MetricSink     │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use tegpoll_core::{classify, AcquisitionError, FaultKind};
//!
//! fn describe(error: &AcquisitionError) -> &'static str {
//!     match classify(error) {
//!         FaultKind::SoftTransient => "retried within budget",
//!         FaultKind::HardAuth => "one reauthentication, then fatal",
//!         FaultKind::HardOther => "fatal for the cycle",
//!     }
//! }
//! ```

pub mod adapters;
pub mod builder;
pub mod config;
pub mod credentials;
pub mod device;
pub mod domain;
pub mod error;
pub mod fault;
pub mod http_client;
pub mod normalize;
pub mod poll;
pub mod refresh;
pub mod retry;
pub mod sink;

// Device clients
pub use adapters::{FleetApiClient, LocalApplianceClient, LocalGatewayClient};

// Wiring and configuration
pub use builder::PollerBuilder;
pub use config::{BackoffConfig, ConfigError, PollerConfig, RetryConfig};

// Credentials
pub use credentials::{
    AuthFlavor, CredentialPersistence, CredentialStore, Credentials, JsonCredentialFile,
};

// Device contract
pub use device::{
    AuthPolicy, DeviceClient, DeviceFuture, FleetReading, LocalReading, RawDeviceReading,
    SourceKind,
};

// Domain models
pub use domain::{
    MeasureDescriptor, MeasureEntry, MeasureKind, MeasureTable, MetricPoint, MetricValue,
    ScalarType,
};

// Errors and classification
pub use error::{AcquisitionError, ValidationError};
pub use fault::{classify, Classify, FaultKind, FaultSet};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpClientOptions, HttpError, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient, TransportKind,
};

pub use normalize::MetricNormalizer;
pub use poll::{CycleState, PollCycle, PollOptions, PollReport};
pub use refresh::{AuthEndpoint, Reauthenticator, TokenRefresher};
pub use retry::{Backoff, RetryError, RetryExecutor, RetryPolicy};
pub use sink::{InfluxLineSink, MemorySink, MetricSink, SinkError, WarehouseSink};

// Warehouse (re-exported from tegpoll-warehouse)
pub use tegpoll_warehouse::{IngestReceipt, Warehouse, WarehouseConfig, WarehouseError};
