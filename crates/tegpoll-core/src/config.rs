//! Poller configuration, read from `<home>/config.json` or an explicit path.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tegpoll_warehouse::{resolve_tegpoll_home, WarehouseConfig};
use thiserror::Error;

use crate::adapters::FLEET_API_BASE_URL;
use crate::device::SourceKind;
use crate::domain::MeasureTable;
use crate::error::ValidationError;
use crate::http_client::DEFAULT_TIMEOUT_MS;
use crate::refresh::{DEFAULT_LOCAL_USERNAME, FLEET_TOKEN_URL};
use crate::retry::{Backoff, RetryPolicy, DEFAULT_REFRESH_RETRIES, DEFAULT_TRANSIENT_RETRIES};

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Optional jittered exponential backoff between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries for soft transient faults on data calls.
    pub transient: u32,
    /// Retries for soft transient faults on the credential refresh call.
    pub refresh: u32,
    /// Absent means retries are immediate.
    pub backoff: Option<BackoffConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transient: DEFAULT_TRANSIENT_RETRIES,
            refresh: DEFAULT_REFRESH_RETRIES,
            backoff: None,
        }
    }
}

impl RetryConfig {
    pub fn transient_policy(&self) -> RetryPolicy {
        self.with_backoff(RetryPolicy::transient(self.transient))
    }

    pub fn refresh_policy(&self) -> RetryPolicy {
        self.with_backoff(RetryPolicy::transient(self.refresh))
    }

    fn with_backoff(&self, policy: RetryPolicy) -> RetryPolicy {
        match self.backoff {
            Some(backoff) => policy.with_backoff(Backoff::jittered(
                Duration::from_millis(backoff.base_ms),
                Duration::from_millis(backoff.max_ms),
            )),
            None => policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub base_url: String,
    pub token_url: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            base_url: String::from(FLEET_API_BASE_URL),
            token_url: String::from(FLEET_TOKEN_URL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub base_url: String,
    pub username: String,
    /// Gateway only: skip the login and query without a session.
    pub anonymous: bool,
    /// Local devices serve self-signed certificates.
    pub accept_invalid_certs: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://teg.local"),
            username: String::from(DEFAULT_LOCAL_USERNAME),
            anonymous: false,
            accept_invalid_certs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub database: String,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:8086"),
            database: String::from("teg"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub source: SourceKind,
    pub timeout_ms: u64,
    pub dry_run: bool,
    pub retry: RetryConfig,
    pub fleet: FleetConfig,
    pub local: LocalConfig,
    pub influx: InfluxConfig,
    /// Layered over the built-in meter table.
    pub measures: Option<MeasureTable>,
    pub credentials_dir: PathBuf,
    pub warehouse_path: PathBuf,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::in_home(resolve_tegpoll_home())
    }
}

impl PollerConfig {
    pub fn in_home(home: impl AsRef<Path>) -> Self {
        let home = home.as_ref();
        Self {
            source: SourceKind::FleetApi,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            dry_run: false,
            retry: RetryConfig::default(),
            fleet: FleetConfig::default(),
            local: LocalConfig::default(),
            influx: InfluxConfig::default(),
            measures: None,
            credentials_dir: home.join("credentials"),
            warehouse_path: home.join("warehouse.duckdb"),
        }
    }

    /// Default config path under the tegpoll home.
    pub fn default_path() -> PathBuf {
        resolve_tegpoll_home().join(CONFIG_FILE_NAME)
    }

    /// Read and validate `path`; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path(), false),
        };
        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_ms == 0 {
            return Err(ValidationError::NotPositive { field: "timeout_ms" });
        }
        let host = match self.source {
            SourceKind::FleetApi => {
                if self.fleet.token_url.trim().is_empty() {
                    return Err(ValidationError::EmptyField {
                        field: "fleet.token_url",
                    });
                }
                ("fleet.base_url", &self.fleet.base_url)
            }
            SourceKind::LocalGateway | SourceKind::LocalAppliance => {
                ("local.base_url", &self.local.base_url)
            }
        };
        if host.1.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: host.0 });
        }
        if let Some(backoff) = self.retry.backoff {
            if backoff.base_ms == 0 {
                return Err(ValidationError::NotPositive {
                    field: "retry.backoff.base_ms",
                });
            }
        }
        if let Some(measures) = &self.measures {
            measures.validate()?;
        }
        Ok(())
    }

    /// Built-in meter table with the configured overrides applied.
    pub fn measure_table(&self) -> MeasureTable {
        match &self.measures {
            Some(overrides) => MeasureTable::energy_meters().merge(overrides.clone()),
            None => MeasureTable::energy_meters(),
        }
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        let home = self
            .warehouse_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(resolve_tegpoll_home);
        WarehouseConfig {
            db_path: self.warehouse_path.clone(),
            ..WarehouseConfig::in_home(home)
        }
    }

    /// Credential file name for the configured source.
    pub fn credential_source(&self) -> &'static str {
        match self.source {
            SourceKind::FleetApi => "tesla",
            SourceKind::LocalGateway | SourceKind::LocalAppliance => "teg",
        }
    }
}
