//! Device client implementations, one per source family.
//!
//! | Client | Source | Auth |
//! |--------|--------|------|
//! | [`FleetApiClient`] | cloud fleet API | OAuth bearer token, refreshed lazily |
//! | [`LocalGatewayClient`] | gateway on the LAN | login per poll, or anonymous |
//! | [`LocalApplianceClient`] | web appliance on the LAN | session cookie per poll |

mod appliance;
mod fleet;
mod gateway;
mod local;

pub use appliance::LocalApplianceClient;
pub use fleet::{FleetApiClient, FLEET_API_BASE_URL};
pub use gateway::LocalGatewayClient;

use serde_json::Value;
use tracing::debug;

use crate::error::AcquisitionError;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};

/// Send one request; map non-2xx statuses to errors and log the payload.
///
/// 401/403 become [`AcquisitionError::AuthExpired`]; every other non-2xx
/// status is an [`AcquisitionError::UpstreamStatus`] left to the classifier.
pub(crate) async fn send_checked(
    client: &dyn HttpClient,
    request: HttpRequest,
) -> Result<HttpResponse, AcquisitionError> {
    let endpoint = request.url.clone();
    let response = client.execute(request).await?;
    debug!(endpoint = %endpoint, status = response.status, body = %response.body, "raw payload");

    if response.is_success() {
        return Ok(response);
    }
    if matches!(response.status, 401 | 403) {
        return Err(AcquisitionError::auth_expired(format!(
            "{endpoint} returned status {}",
            response.status
        )));
    }
    Err(AcquisitionError::UpstreamStatus {
        endpoint,
        status: response.status,
        body: response.body,
    })
}

/// Parse a response body as JSON.
pub(crate) fn parse_json(context: &str, body: &str) -> Result<Value, AcquisitionError> {
    serde_json::from_str(body)
        .map_err(|error| AcquisitionError::malformed(context, format!("invalid json: {error}"), body))
}

/// Application-level auth error carried in a 2xx body.
///
/// Covers the fleet API's top-level `error` string and the local API's
/// `{"code": 401, "error": ...}` envelope.
pub(crate) fn reject_body_error(context: &str, json: &Value) -> Result<(), AcquisitionError> {
    let Some(object) = json.as_object() else {
        return Ok(());
    };
    let error = object.get("error").filter(|error| !error.is_null());
    let code = object.get("code").and_then(Value::as_u64);
    match (error, code) {
        (Some(error), _) => Err(AcquisitionError::auth_expired(format!(
            "{context}: {}",
            error
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string())
        ))),
        (None, Some(code @ (401 | 403))) => Err(AcquisitionError::auth_expired(format!(
            "{context}: code {code}"
        ))),
        _ => Ok(()),
    }
}

/// `base` without a trailing slash, joined with `path`.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
