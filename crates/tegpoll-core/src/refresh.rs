//! Credential refresh: OAuth refresh-token grant or password login.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::adapters::{parse_json, send_checked};
use crate::credentials::{AuthFlavor, CredentialStore, Credentials};
use crate::device::DeviceFuture;
use crate::error::AcquisitionError;
use crate::fault::{classify_status, FaultKind};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse, DEFAULT_TIMEOUT_MS};
use crate::retry::{RetryExecutor, RetryPolicy};

/// Default fleet OAuth endpoint.
pub const FLEET_TOKEN_URL: &str = "https://fleet-auth.prd.vn.cloud.tesla.com/oauth2/v3/token";

/// Username the local login endpoint expects for the owner account.
pub const DEFAULT_LOCAL_USERNAME: &str = "customer";

/// Where and how credentials are exchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEndpoint {
    /// `POST` form `grant_type=refresh_token&client_id=…&refresh_token=…`.
    OAuthToken { token_url: String },
    /// `POST` JSON `{username, email, password, force_sm_off}`; the session
    /// is the returned cookie jar, or the body `token` when no cookie is set.
    SessionLogin { login_url: String, username: String },
}

impl AuthEndpoint {
    pub fn fleet_default() -> Self {
        Self::OAuthToken {
            token_url: String::from(FLEET_TOKEN_URL),
        }
    }

    /// `{base}/api/login/Basic` of a local gateway or appliance.
    pub fn local_login(base_url: &str) -> Self {
        Self::SessionLogin {
            login_url: format!("{}/api/login/Basic", base_url.trim_end_matches('/')),
            username: String::from(DEFAULT_LOCAL_USERNAME),
        }
    }

    /// Login as `username` instead of the owner account; OAuth is unaffected.
    pub fn with_username(self, username: impl Into<String>) -> Self {
        match self {
            Self::SessionLogin { login_url, .. } => Self::SessionLogin {
                login_url,
                username: username.into(),
            },
            other => other,
        }
    }

    const fn flavor(&self) -> AuthFlavor {
        match self {
            Self::OAuthToken { .. } => AuthFlavor::RefreshToken,
            Self::SessionLogin { .. } => AuthFlavor::Password,
        }
    }
}

/// Exchanges the stored secret for a fresh session and commits it to the store.
pub trait Reauthenticator: Send + Sync {
    fn refresh<'a>(&'a self, store: &'a CredentialStore) -> DeviceFuture<'a, Credentials>;
}

/// Production [`Reauthenticator`].
///
/// The auth call runs under its own retry policy (soft faults only, budget
/// 2 by default). Any other failure is terminal and leaves the store as-is.
#[derive(Clone)]
pub struct TokenRefresher {
    http_client: Arc<dyn HttpClient>,
    endpoint: AuthEndpoint,
    retry: RetryExecutor,
    timeout_ms: u64,
}

impl TokenRefresher {
    pub fn new(http_client: Arc<dyn HttpClient>, endpoint: AuthEndpoint) -> Self {
        Self {
            http_client,
            endpoint,
            retry: RetryExecutor::new(RetryPolicy::refresh()),
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

    pub fn endpoint(&self) -> &AuthEndpoint {
        &self.endpoint
    }

    fn build_request(&self, current: &Credentials) -> HttpRequest {
        let request = match &self.endpoint {
            AuthEndpoint::OAuthToken { token_url } => HttpRequest::post(token_url.as_str())
                .with_form(&[
                    ("grant_type", "refresh_token"),
                    ("client_id", current.identity.as_str()),
                    ("refresh_token", current.secret.as_str()),
                ]),
            AuthEndpoint::SessionLogin {
                login_url,
                username,
            } => HttpRequest::post(login_url.as_str()).with_json(&json!({
                "username": username,
                "email": current.identity,
                "password": current.secret,
                "force_sm_off": false,
            })),
        };
        request.with_timeout_ms(self.timeout_ms)
    }

    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, AcquisitionError> {
        let client = self.http_client.as_ref();
        let request = &request;
        self.retry
            .execute_logged("auth.refresh", move |_| {
                let request = request.clone();
                async move {
                    match send_checked(client, request).await {
                        Err(AcquisitionError::UpstreamStatus { status, body, .. })
                            if classify_status(status) != FaultKind::SoftTransient =>
                        {
                            Err(AcquisitionError::AuthRefreshFailed {
                                status: Some(status),
                                body,
                            })
                        }
                        Err(AcquisitionError::AuthExpired { detail }) => {
                            Err(AcquisitionError::AuthRefreshFailed {
                                status: None,
                                body: detail,
                            })
                        }
                        other => other,
                    }
                }
            })
            .await
    }
}

impl Reauthenticator for TokenRefresher {
    fn refresh<'a>(&'a self, store: &'a CredentialStore) -> DeviceFuture<'a, Credentials> {
        Box::pin(async move {
            let current = store.get();
            if current.flavor != self.endpoint.flavor() {
                return Err(AcquisitionError::AuthRefreshFailed {
                    status: None,
                    body: format!(
                        "{} credentials cannot be exchanged at a {} endpoint",
                        current.flavor.as_str(),
                        self.endpoint.flavor().as_str()
                    ),
                });
            }

            let response = self.exchange(self.build_request(&current)).await?;
            let refreshed = match self.endpoint {
                AuthEndpoint::OAuthToken { .. } => token_grant(&current, &response)?,
                AuthEndpoint::SessionLogin { .. } => login_session(&current, &response)?,
            };

            store.replace(refreshed.clone());
            info!(source = store.source(), flavor = refreshed.flavor.as_str(), "credentials refreshed");
            Ok(refreshed)
        })
    }
}

fn refresh_failed(response: &HttpResponse) -> AcquisitionError {
    AcquisitionError::AuthRefreshFailed {
        status: Some(response.status),
        body: response.body.clone(),
    }
}

fn token_grant(
    current: &Credentials,
    response: &HttpResponse,
) -> Result<Credentials, AcquisitionError> {
    let json = parse_json("oauth token", &response.body).map_err(|_| refresh_failed(response))?;
    let field = |name: &str| {
        json.get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    match (field("access_token"), field("refresh_token")) {
        (Some(access_token), Some(refresh_token)) => Ok(Credentials {
            identity: current.identity.clone(),
            flavor: AuthFlavor::RefreshToken,
            secret: refresh_token,
            access_token: Some(access_token),
            session_cookie: None,
        }),
        _ => Err(refresh_failed(response)),
    }
}

fn login_session(
    current: &Credentials,
    response: &HttpResponse,
) -> Result<Credentials, AcquisitionError> {
    let mut refreshed = Credentials {
        access_token: None,
        session_cookie: None,
        ..current.clone()
    };

    if !response.cookies.is_empty() {
        refreshed.session_cookie = Some(response.cookies.join("; "));
        return Ok(refreshed);
    }

    let token = parse_json("login", &response.body)
        .ok()
        .and_then(|json| json.get("token").and_then(Value::as_str).map(str::to_owned))
        .filter(|token| !token.is_empty());
    match token {
        Some(token) => {
            refreshed.access_token = Some(token);
            Ok(refreshed)
        }
        None => Err(refresh_failed(response)),
    }
}
