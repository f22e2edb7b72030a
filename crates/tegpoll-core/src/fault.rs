//! Fault classification.
//!
//! Every caught error is sorted into exactly one [`FaultKind`]. The retry
//! executor only looks at the kind, never at the concrete error, so the
//! mapping below is the single place deciding what is worth another attempt.
//!
//! | Error | Kind |
//! |-------|------|
//! | transport timeout / connect / interrupted body | `SoftTransient` |
//! | status 502, 504 | `SoftTransient` |
//! | status 401, 403, `AuthExpired`, `AuthRefreshFailed` | `HardAuth` |
//! | everything else | `HardOther` |

use std::fmt::{Display, Formatter};

use crate::error::AcquisitionError;
use crate::http_client::TransportKind;

const SOFT_STATUSES: [u16; 2] = [502, 504];
const AUTH_STATUSES: [u16; 2] = [401, 403];

/// Retry-relevant category of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    SoftTransient,
    HardAuth,
    HardOther,
}

impl FaultKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SoftTransient => "soft_transient",
            Self::HardAuth => "hard_auth",
            Self::HardOther => "hard_other",
        }
    }
}

impl Display for FaultKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of fault kinds a retry policy accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultSet {
    soft_transient: bool,
    hard_auth: bool,
    hard_other: bool,
}

impl FaultSet {
    pub const fn empty() -> Self {
        Self {
            soft_transient: false,
            hard_auth: false,
            hard_other: false,
        }
    }

    pub const fn soft_transient() -> Self {
        Self::empty().with(FaultKind::SoftTransient)
    }

    pub const fn with(mut self, kind: FaultKind) -> Self {
        match kind {
            FaultKind::SoftTransient => self.soft_transient = true,
            FaultKind::HardAuth => self.hard_auth = true,
            FaultKind::HardOther => self.hard_other = true,
        }
        self
    }

    pub const fn contains(self, kind: FaultKind) -> bool {
        match kind {
            FaultKind::SoftTransient => self.soft_transient,
            FaultKind::HardAuth => self.hard_auth,
            FaultKind::HardOther => self.hard_other,
        }
    }
}

/// Errors that can be sorted into a [`FaultKind`].
pub trait Classify {
    fn fault_kind(&self) -> FaultKind;
}

/// Classify an acquisition error. Pure and total.
pub fn classify(error: &AcquisitionError) -> FaultKind {
    match error {
        AcquisitionError::Transport { kind, .. } => match kind {
            TransportKind::Timeout | TransportKind::Connect | TransportKind::Body => {
                FaultKind::SoftTransient
            }
            TransportKind::Other => FaultKind::HardOther,
        },
        AcquisitionError::UpstreamStatus { status, .. } => classify_status(*status),
        AcquisitionError::AuthExpired { .. } | AcquisitionError::AuthRefreshFailed { .. } => {
            FaultKind::HardAuth
        }
        // A spent budget is final; outer layers must not multiply it.
        AcquisitionError::RetriesExhausted { .. } => FaultKind::HardOther,
        AcquisitionError::MalformedResponse { .. }
        | AcquisitionError::NoEnergySites
        | AcquisitionError::SinkUnavailable(_)
        | AcquisitionError::Persistence(_)
        | AcquisitionError::Validation(_) => FaultKind::HardOther,
    }
}

/// Classify a bare HTTP status code.
pub fn classify_status(status: u16) -> FaultKind {
    if SOFT_STATUSES.contains(&status) {
        FaultKind::SoftTransient
    } else if AUTH_STATUSES.contains(&status) {
        FaultKind::HardAuth
    } else {
        FaultKind::HardOther
    }
}

impl Classify for AcquisitionError {
    fn fault_kind(&self) -> FaultKind {
        classify(self)
    }
}
