use thiserror::Error;

use crate::http_client::{HttpError, TransportKind};
use crate::sink::SinkError;

/// Validation errors for configuration values and source-reported fields.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("timestamp is not RFC3339 / ISO 8601: '{value}'")]
    InvalidTimestamp { value: String },

    #[error("invalid source '{value}', expected one of fleet, gateway, appliance")]
    InvalidSource { value: String },

    #[error("field '{field}' must not be empty")]
    EmptyField { field: &'static str },

    #[error("field '{field}' must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("measure '{field}' is declared more than once")]
    DuplicateMeasure { field: String },
}

/// Fault taxonomy for one acquisition pass.
///
/// Every error raised between the transport and the sink is one of these
/// variants; [`crate::fault::classify`] maps each one to a [`crate::FaultKind`].
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The request never produced an HTTP response.
    #[error("transport error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    /// The upstream answered with a non-2xx status.
    #[error("{endpoint} returned status {status}")]
    UpstreamStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Credentials were rejected by a data endpoint; one reauthentication is allowed.
    #[error("authentication expired: {detail}")]
    AuthExpired { detail: String },

    /// The auth endpoint did not hand out usable credentials.
    #[error("credential refresh failed (status {status:?}): {body}")]
    AuthRefreshFailed { status: Option<u16>, body: String },

    /// A response was missing an expected field or had the wrong shape.
    #[error("malformed response from {context}: {reason}")]
    MalformedResponse {
        context: String,
        reason: String,
        payload: String,
    },

    #[error("no energy sites found")]
    NoEnergySites,

    #[error("sink unavailable: {0}")]
    SinkUnavailable(#[from] SinkError),

    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AcquisitionError>,
    },

    #[error("credential persistence failed: {0}")]
    Persistence(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AcquisitionError {
    pub fn malformed(
        context: impl Into<String>,
        reason: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::MalformedResponse {
            context: context.into(),
            reason: reason.into(),
            payload: payload.into(),
        }
    }

    pub fn auth_expired(detail: impl Into<String>) -> Self {
        Self::AuthExpired {
            detail: detail.into(),
        }
    }

    /// Stable machine-readable code, used in logs and CLI output.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "acquisition.transport",
            Self::UpstreamStatus { .. } => "acquisition.upstream_status",
            Self::AuthExpired { .. } => "acquisition.auth_expired",
            Self::AuthRefreshFailed { .. } => "acquisition.auth_refresh_failed",
            Self::MalformedResponse { .. } => "acquisition.malformed_response",
            Self::NoEnergySites => "acquisition.no_energy_sites",
            Self::SinkUnavailable(_) => "acquisition.sink_unavailable",
            Self::RetriesExhausted { .. } => "acquisition.retries_exhausted",
            Self::Persistence(_) => "acquisition.persistence",
            Self::Validation(_) => "acquisition.validation",
        }
    }
}

impl From<HttpError> for AcquisitionError {
    fn from(error: HttpError) -> Self {
        Self::Transport {
            kind: error.kind(),
            message: error.message().to_owned(),
        }
    }
}
