use std::sync::Arc;

use tracing::info;

use crate::adapters::local::LocalApi;
use crate::credentials::Credentials;
use crate::device::{AuthPolicy, DeviceClient, DeviceFuture, RawDeviceReading, SourceKind};
use crate::http_client::HttpClient;
use crate::retry::RetryPolicy;

/// Local web appliance reached over a session cookie established per poll.
#[derive(Clone)]
pub struct LocalApplianceClient {
    api: LocalApi,
}

impl LocalApplianceClient {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            api: LocalApi::new(http_client, base_url),
        }
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

impl DeviceClient for LocalApplianceClient {
    fn source(&self) -> SourceKind {
        SourceKind::LocalAppliance
    }

    fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy::EveryPoll
    }

    fn fetch_energy_summary<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> DeviceFuture<'a, RawDeviceReading> {
        Box::pin(async move {
            let auth = credentials.session_auth()?;
            info!(base_url = self.api.base_url(), "querying local appliance");
            let reading = self.api.read_summary(&auth).await?;
            Ok(RawDeviceReading::Local(reading))
        })
    }
}
