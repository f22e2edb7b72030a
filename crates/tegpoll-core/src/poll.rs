//! One acquisition pass: authenticate, fetch, normalize, emit.
//!
//! ```text
//! Start -> Authenticate -> FetchRaw -> Normalize -> Emit -> Done
//!                            |   ^
//!                            v   | (at most once)
//!                        Reauthenticate
//! ```
//!
//! Any error moves the cycle to `Failed`. [`PollCycle::run`] never returns an
//! error: the failure is logged and carried in the [`PollReport`].

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialStore;
use crate::device::{AuthPolicy, DeviceClient, RawDeviceReading, SourceKind};
use crate::domain::{now_epoch_seconds, MetricPoint};
use crate::error::AcquisitionError;
use crate::normalize::MetricNormalizer;
use crate::refresh::Reauthenticator;
use crate::sink::MetricSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Start,
    Authenticate,
    FetchRaw,
    Reauthenticate,
    Normalize,
    Emit,
    Done,
    Failed,
}

impl CycleState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Authenticate => "authenticate",
            Self::FetchRaw => "fetch_raw",
            Self::Reauthenticate => "reauthenticate",
            Self::Normalize => "normalize",
            Self::Emit => "emit",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOptions {
    /// Normalize as usual but never call the sink.
    pub dry_run: bool,
}

/// Outcome of one cycle.
#[derive(Debug)]
pub struct PollReport {
    pub source: SourceKind,
    pub state: CycleState,
    /// Last non-terminal state reached before `Failed`.
    pub failed_at: Option<CycleState>,
    /// The complete batch; empty when the cycle failed.
    pub points: Vec<MetricPoint>,
    pub failure: Option<AcquisitionError>,
    pub reauth_count: u32,
    pub sink_invoked: bool,
    pub elapsed_ms: u64,
}

impl PollReport {
    fn started(source: SourceKind) -> Self {
        Self {
            source,
            state: CycleState::Start,
            failed_at: None,
            points: Vec::new(),
            failure: None,
            reauth_count: 0,
            sink_invoked: false,
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == CycleState::Done
    }

    fn enter(&mut self, next: CycleState) {
        debug!(source = %self.source, from = self.state.as_str(), to = next.as_str(), "poll cycle transition");
        self.state = next;
    }
}

pub struct PollCycle {
    client: Arc<dyn DeviceClient>,
    refresher: Arc<dyn Reauthenticator>,
    credentials: Arc<CredentialStore>,
    normalizer: MetricNormalizer,
    sink: Option<Arc<dyn MetricSink>>,
    options: PollOptions,
}

impl PollCycle {
    pub fn new(
        client: Arc<dyn DeviceClient>,
        refresher: Arc<dyn Reauthenticator>,
        credentials: Arc<CredentialStore>,
        normalizer: MetricNormalizer,
    ) -> Self {
        Self {
            client,
            refresher,
            credentials,
            normalizer,
            sink: None,
            options: PollOptions::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_options(mut self, options: PollOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> PollOptions {
        self.options
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Run one cycle to a terminal state.
    pub async fn run(&self) -> PollReport {
        let started = Instant::now();
        let mut report = PollReport::started(self.client.source());

        match self.drive(&mut report).await {
            Ok(points) => {
                report.points = points;
                report.enter(CycleState::Done);
                info!(
                    source = %report.source,
                    points = report.points.len(),
                    reauths = report.reauth_count,
                    dry_run = self.options.dry_run,
                    "poll cycle done"
                );
            }
            Err(failure) => {
                report.failed_at = Some(report.state);
                report.enter(CycleState::Failed);
                error!(
                    source = %report.source,
                    state = report.failed_at.map(CycleState::as_str).unwrap_or("start"),
                    code = failure.code(),
                    error = %failure,
                    "poll cycle failed"
                );
                report.failure = Some(failure);
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report
    }

    async fn drive(&self, report: &mut PollReport) -> Result<Vec<MetricPoint>, AcquisitionError> {
        let poll_time = now_epoch_seconds();

        report.enter(CycleState::Authenticate);
        self.authenticate().await?;

        let reading = self.fetch_with_reauth(report).await?;

        report.enter(CycleState::Normalize);
        let points = self.normalizer.normalize(&reading, poll_time);
        debug!(source = %report.source, points = ?points, "normalized batch");

        report.enter(CycleState::Emit);
        if self.options.dry_run {
            info!(source = %report.source, points = points.len(), "dry run, sink skipped");
        } else if let Some(sink) = &self.sink {
            report.sink_invoked = true;
            sink.write(&points).await?;
            debug!(sink = sink.name(), points = points.len(), "batch handed to sink");
        } else {
            debug!(source = %report.source, "no sink configured");
        }

        Ok(points)
    }

    async fn authenticate(&self) -> Result<(), AcquisitionError> {
        match self.client.auth_policy() {
            AuthPolicy::Anonymous => Ok(()),
            AuthPolicy::Lazy if self.credentials.snapshot().has_session() => Ok(()),
            AuthPolicy::Lazy | AuthPolicy::EveryPoll => {
                self.refresher.refresh(&self.credentials).await?;
                Ok(())
            }
        }
    }

    async fn fetch_with_reauth(
        &self,
        report: &mut PollReport,
    ) -> Result<RawDeviceReading, AcquisitionError> {
        loop {
            report.enter(CycleState::FetchRaw);
            let credentials = self.credentials.snapshot();
            let error = match self.client.fetch_energy_summary(&credentials).await {
                Ok(reading) => return Ok(reading),
                Err(error) => error,
            };

            if report.reauth_count > 0 || !self.client.needs_reauth(&error) {
                return Err(error);
            }

            warn!(source = %report.source, error = %error, "credentials rejected, reauthenticating");
            report.enter(CycleState::Reauthenticate);
            report.reauth_count += 1;
            self.refresher.refresh(&self.credentials).await?;
        }
    }
}
