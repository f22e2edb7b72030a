//! Device client contract shared by every source family.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credentials::Credentials;
use crate::error::{AcquisitionError, ValidationError};

/// Source family a device client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Energy gateway on the local network.
    #[serde(rename = "gateway")]
    LocalGateway,
    /// Cloud fleet API with OAuth bearer tokens.
    #[serde(rename = "fleet")]
    FleetApi,
    /// Local web appliance behind a session cookie.
    #[serde(rename = "appliance")]
    LocalAppliance,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [Self::FleetApi, Self::LocalGateway, Self::LocalAppliance];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalGateway => "gateway",
            Self::FleetApi => "fleet",
            Self::LocalAppliance => "appliance",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ValidationError::InvalidSource {
                value: value.to_owned(),
            })
    }
}

/// When the orchestrator's `Authenticate` step runs the refresher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Reuse the persisted token; only refresh when none is present.
    Lazy,
    /// Log in before every poll.
    EveryPoll,
    /// The source serves data without credentials.
    Anonymous,
}

/// Parsed payloads of the local meter API, one per endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalReading {
    /// `/api/meters/aggregates`: device class → meter object.
    pub meters: Value,
    /// `/api/operation`.
    pub operation: Option<Value>,
    /// `/api/system_status/soe`.
    pub soe: Option<Value>,
    /// `/api/system_status/grid_status`.
    pub grid_status: Option<Value>,
}

/// Parsed payloads of the fleet API for the selected site.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetReading {
    pub site_id: String,
    /// `response` object of `live_status`.
    pub live_status: Value,
    /// `response` object of `site_info`, when the call returned one.
    pub site_info: Option<Value>,
}

/// Raw reading handed from a device client to the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDeviceReading {
    Local(LocalReading),
    Fleet(FleetReading),
}

pub type DeviceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AcquisitionError>> + Send + 'a>>;

/// One implementation per source family.
///
/// Every outbound call inside `fetch_energy_summary` goes through the retry
/// executor. Rejected credentials surface as [`AcquisitionError::AuthExpired`];
/// the client never retries those itself.
pub trait DeviceClient: Send + Sync {
    fn source(&self) -> SourceKind;

    fn auth_policy(&self) -> AuthPolicy;

    fn fetch_energy_summary<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> DeviceFuture<'a, RawDeviceReading>;

    /// Whether `error` should send the orchestrator through one reauthentication.
    fn needs_reauth(&self, error: &AcquisitionError) -> bool {
        matches!(error, AcquisitionError::AuthExpired { .. })
    }
}
