use std::sync::Arc;

use serde_json::Value;

use crate::adapters::{join_url, parse_json, reject_body_error, send_checked};
use crate::device::LocalReading;
use crate::error::AcquisitionError;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, DEFAULT_TIMEOUT_MS};
use crate::retry::{RetryExecutor, RetryPolicy};

pub(crate) const METERS_PATH: &str = "/api/meters/aggregates";
pub(crate) const OPERATION_PATH: &str = "/api/operation";
pub(crate) const SOE_PATH: &str = "/api/system_status/soe";
pub(crate) const GRID_STATUS_PATH: &str = "/api/system_status/grid_status";

/// Endpoints shared by the local gateway and the local web appliance.
#[derive(Clone)]
pub(crate) struct LocalApi {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    retry: RetryExecutor,
    timeout_ms: u64,
}

impl LocalApi {
    pub(crate) fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            retry: RetryExecutor::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry = RetryExecutor::new(policy);
    }

    pub(crate) fn set_timeout_ms(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    /// `GET {base}{path}` under the transient retry policy, parsed as JSON.
    pub(crate) async fn get_json(&self, path: &str, auth: &HttpAuth) -> Result<Value, AcquisitionError> {
        let request = HttpRequest::get(join_url(&self.base_url, path))
            .with_header("accept", "application/json")
            .with_auth(auth)
            .with_timeout_ms(self.timeout_ms);
        let client = self.http_client.as_ref();
        let request = &request;

        self.retry
            .execute_logged(path, move |_| {
                let request = request.clone();
                async move {
                    let response = send_checked(client, request).await?;
                    let json = parse_json(path, &response.body)?;
                    reject_body_error(path, &json)?;
                    Ok(json)
                }
            })
            .await
    }

    /// Meters, operation mode and state of energy, in that order.
    pub(crate) async fn read_summary(&self, auth: &HttpAuth) -> Result<LocalReading, AcquisitionError> {
        let meters = self.get_json(METERS_PATH, auth).await?;
        if !meters.is_object() {
            return Err(AcquisitionError::malformed(
                METERS_PATH,
                "expected an object keyed by device class",
                meters.to_string(),
            ));
        }
        let operation = self.get_json(OPERATION_PATH, auth).await?;
        let soe = self.get_json(SOE_PATH, auth).await?;

        Ok(LocalReading {
            meters,
            operation: Some(operation),
            soe: Some(soe),
            grid_status: None,
        })
    }
}
