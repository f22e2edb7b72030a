use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

/// Default per-request timeout. Requests never run without one.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// HTTP methods used by device clients, the auth endpoints and sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Authentication strategy applied to outgoing HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    BearerToken(String),
    Header { name: String, value: String },
    Cookie(String),
}

impl HttpAuth {
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::None => {}
            Self::BearerToken(token) => {
                headers.insert(String::from("authorization"), format!("Bearer {token}"));
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
            Self::Cookie(cookie) => {
                headers.insert(String::from("cookie"), cookie.clone());
            }
        }
    }
}

/// HTTP request envelope used by every outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json(self, body: &Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    /// Form-encoded body (`application/x-www-form-urlencoded`).
    pub fn with_form(self, fields: &[(&str, &str)]) -> Self {
        let body = fields
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        self.with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body)
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        auth.apply(&mut self.headers);
        self
    }

    /// Zero is bumped to 1 ms: requests must always be bounded.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms.max(1);
        self
    }
}

/// HTTP response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// `name=value` pairs from `Set-Cookie` headers, attributes stripped.
    pub cookies: Vec<String>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            cookies: Vec::new(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Where a transport failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Timeout,
    Connect,
    /// The connection dropped while the body was being read.
    Body,
    Other,
}

impl TransportKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Body => "body",
            Self::Other => "other",
        }
    }
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: TransportKind,
    message: String,
}

impl HttpError {
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportKind::Connect, message)
    }

    pub fn body(message: impl Into<String>) -> Self {
        Self::new(TransportKind::Body, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportKind::Other, message)
    }

    pub const fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for HttpError {}

/// Transport contract shared by device clients, the token refresher and sinks.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Options for the production transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientOptions {
    pub user_agent: String,
    /// Local gateways serve self-signed certificates.
    pub accept_invalid_certs: bool,
    pub connect_timeout_ms: u64,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            user_agent: format!("tegpoll/{}", env!("CARGO_PKG_VERSION")),
            accept_invalid_certs: false,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Production HTTP client using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new(options: &HttpClientOptions) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.as_str())
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .connect_timeout(Duration::from_millis(options.connect_timeout_ms.max(1)))
            .build()
            .map_err(|error| HttpError::other(format!("failed to build http client: {error}")))?;
        Ok(Self::with_client(client))
    }

    /// Create a ReqwestHttpClient with a custom reqwest::Client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            builder = builder.timeout(Duration::from_millis(request.timeout_ms.max(1)));
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::timeout(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    HttpError::connect(format!("connection failed: {e}"))
                } else {
                    HttpError::other(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let cookies = response
                .headers()
                .get_all(reqwest::header::SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .filter_map(cookie_pair)
                .collect();
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::timeout(format!("timed out reading response body: {e}"))
                } else {
                    HttpError::body(format!("failed to read response body: {e}"))
                }
            })?;

            Ok(HttpResponse {
                status,
                body,
                cookies,
            })
        })
    }
}

/// `name=value` part of a `Set-Cookie` header.
fn cookie_pair(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    if pair.is_empty() || !pair.contains('=') {
        return None;
    }
    Some(pair.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_auth_populates_authorization_header() {
        let request = HttpRequest::get("https://fleet.test/api/1/products")
            .with_auth(&HttpAuth::BearerToken(String::from("token-123")));

        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer token-123")
        );
    }

    #[test]
    fn cookie_auth_populates_cookie_header() {
        let request = HttpRequest::get("https://teg.test/api/meters/aggregates")
            .with_auth(&HttpAuth::Cookie(String::from("AuthCookie=abc; UserRecord=xyz")));

        assert_eq!(
            request.headers.get("cookie").map(String::as_str),
            Some("AuthCookie=abc; UserRecord=xyz")
        );
    }

    #[test]
    fn form_body_is_url_encoded() {
        let request = HttpRequest::post("https://auth.test/oauth2/v3/token").with_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", "a/b+c=="),
        ]);

        assert_eq!(
            request.body.as_deref(),
            Some("grant_type=refresh_token&refresh_token=a%2Fb%2Bc%3D%3D")
        );
        assert_eq!(
            request.headers.get("content-type").map(String::as_str),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn zero_timeout_is_bounded() {
        let request = HttpRequest::get("https://teg.test").with_timeout_ms(0);
        assert_eq!(request.timeout_ms, 1);
    }

    #[test]
    fn set_cookie_attributes_are_stripped() {
        assert_eq!(
            cookie_pair("AuthCookie=abc123; Path=/; HttpOnly").as_deref(),
            Some("AuthCookie=abc123")
        );
        assert_eq!(cookie_pair("; Path=/"), None);
    }
}
