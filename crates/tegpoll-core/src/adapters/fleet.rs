use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};

use crate::adapters::{join_url, parse_json, reject_body_error, send_checked};
use crate::credentials::Credentials;
use crate::device::{
    AuthPolicy, DeviceClient, DeviceFuture, FleetReading, RawDeviceReading, SourceKind,
};
use crate::error::AcquisitionError;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, DEFAULT_TIMEOUT_MS};
use crate::retry::{RetryExecutor, RetryPolicy};

/// Default regional fleet API host.
pub const FLEET_API_BASE_URL: &str = "https://fleet-api.prd.na.vn.cloud.tesla.com";

const BATTERY_RESOURCE: &str = "battery";

/// Cloud fleet API client.
///
/// Three sequential calls per poll: product list (site selection), live
/// status, site info. The bearer token is validated lazily by the first call.
#[derive(Clone)]
pub struct FleetApiClient {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    retry: RetryExecutor,
    timeout_ms: u64,
}

impl FleetApiClient {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_base_url(http_client, FLEET_API_BASE_URL)
    }

    pub fn with_base_url(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            retry: RetryExecutor::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Energy site ids of every battery-type product, in listing order.
    pub async fn list_sites(&self, credentials: &Credentials) -> Result<Vec<String>, AcquisitionError> {
        let json = self.get_json("/api/1/products", credentials).await?;
        let products = json
            .get("response")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                AcquisitionError::malformed("products", "missing response array", json.to_string())
            })?;

        Ok(products
            .iter()
            .filter(|product| {
                product.get("resource_type").and_then(Value::as_str) == Some(BATTERY_RESOURCE)
            })
            .filter_map(|product| product.get("energy_site_id").map(site_id_text))
            .collect())
    }

    /// First battery site; [`AcquisitionError::NoEnergySites`] when there is none.
    pub async fn select_site(&self, credentials: &Credentials) -> Result<String, AcquisitionError> {
        let sites = self.list_sites(credentials).await?;
        match sites.into_iter().next() {
            Some(site_id) => {
                info!(site_id = %site_id, "querying energy site");
                Ok(site_id)
            }
            None => {
                error!("no energy sites found");
                Err(AcquisitionError::NoEnergySites)
            }
        }
    }

    /// `response` object of `live_status`. Required.
    pub async fn live_status(
        &self,
        credentials: &Credentials,
        site_id: &str,
    ) -> Result<Value, AcquisitionError> {
        let path = format!("/api/1/energy_sites/{site_id}/live_status");
        let json = self.get_json(&path, credentials).await?;
        match json.get("response") {
            Some(response) if response.is_object() => Ok(response.clone()),
            _ => Err(AcquisitionError::malformed(
                "live_status",
                "missing response object",
                json.to_string(),
            )),
        }
    }

    /// `response` object of `site_info`, if the API returned one.
    pub async fn site_info(
        &self,
        credentials: &Credentials,
        site_id: &str,
    ) -> Result<Option<Value>, AcquisitionError> {
        let path = format!("/api/1/energy_sites/{site_id}/site_info");
        let json = self.get_json(&path, credentials).await?;
        Ok(json.get("response").filter(|response| response.is_object()).cloned())
    }

    async fn get_json(&self, path: &str, credentials: &Credentials) -> Result<Value, AcquisitionError> {
        let token = credentials
            .access_token
            .as_deref()
            .ok_or_else(|| AcquisitionError::auth_expired("no access token"))?;
        let request = HttpRequest::get(join_url(&self.base_url, path))
            .with_header("content-type", "application/json")
            .with_auth(&HttpAuth::BearerToken(token.to_owned()))
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
}

impl DeviceClient for FleetApiClient {
    fn source(&self) -> SourceKind {
        SourceKind::FleetApi
    }

    fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy::Lazy
    }

    fn fetch_energy_summary<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> DeviceFuture<'a, RawDeviceReading> {
        Box::pin(async move {
            let site_id = self.select_site(credentials).await?;
            let live_status = self.live_status(credentials, &site_id).await?;
            let site_info = self.site_info(credentials, &site_id).await?;
            Ok(RawDeviceReading::Fleet(FleetReading {
                site_id,
                live_status,
                site_info,
            }))
        })
    }
}

/// Site ids arrive as JSON numbers; keep them as text without a `.0`.
fn site_id_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
