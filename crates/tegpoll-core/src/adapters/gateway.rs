use std::sync::Arc;

use tracing::info;

use crate::adapters::local::{LocalApi, GRID_STATUS_PATH};
use crate::credentials::Credentials;
use crate::device::{AuthPolicy, DeviceClient, DeviceFuture, RawDeviceReading, SourceKind};
use crate::error::AcquisitionError;
use crate::http_client::{HttpAuth, HttpClient};
use crate::retry::RetryPolicy;

/// Energy gateway on the local network.
///
/// Logs in before every poll unless built with [`anonymous`](Self::anonymous)
/// for firmware that serves the meter API without a session.
#[derive(Clone)]
pub struct LocalGatewayClient {
    api: LocalApi,
    login: bool,
}

impl LocalGatewayClient {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            api: LocalApi::new(http_client, base_url),
            login: true,
        }
    }

    pub fn anonymous(mut self) -> Self {
        self.login = false;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.api.set_retry_policy(policy);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.api.set_timeout_ms(timeout_ms);
        self
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url()
    }
}

impl DeviceClient for LocalGatewayClient {
    fn source(&self) -> SourceKind {
        SourceKind::LocalGateway
    }

    fn auth_policy(&self) -> AuthPolicy {
        if self.login {
            AuthPolicy::EveryPoll
        } else {
            AuthPolicy::Anonymous
        }
    }

    fn fetch_energy_summary<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> DeviceFuture<'a, RawDeviceReading> {
        Box::pin(async move {
            let auth = if self.login {
                credentials.session_auth()?
            } else {
                HttpAuth::None
            };
            info!(base_url = self.api.base_url(), "querying local gateway");

            let mut reading = self.api.read_summary(&auth).await?;
            reading.grid_status = Some(self.api.get_json(GRID_STATUS_PATH, &auth).await?);
            Ok(RawDeviceReading::Local(reading))
        })
    }

    fn needs_reauth(&self, error: &AcquisitionError) -> bool {
        self.login && matches!(error, AcquisitionError::AuthExpired { .. })
    }
}
