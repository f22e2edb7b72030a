//! Credentials, the in-process credential store and its persistence seam.

use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AcquisitionError;
use crate::http_client::HttpAuth;

/// Which secret a source authenticates with. Exactly one is active per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlavor {
    /// Email/username + password exchanged for a session at a login endpoint.
    Password,
    /// OAuth client id + refresh token exchanged for a bearer token.
    RefreshToken,
}

impl AuthFlavor {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// Credential record for one source.
///
/// `secret` is the password or the refresh token depending on `flavor`.
/// Once an access token or session cookie is present it is used instead of
/// the secret until a data endpoint rejects it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub flavor: AuthFlavor,
    pub secret: String,
    pub access_token: Option<String>,
    pub session_cookie: Option<String>,
}

impl Credentials {
    pub fn password(identity: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            flavor: AuthFlavor::Password,
            secret: password.into(),
            access_token: None,
            session_cookie: None,
        }
    }

    pub fn refresh_token(client_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            identity: client_id.into(),
            flavor: AuthFlavor::RefreshToken,
            secret: refresh_token.into(),
            access_token: None,
            session_cookie: None,
        }
    }

    /// Placeholder for gateways that serve data without a login.
    pub fn anonymous() -> Self {
        Self::password("", "")
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    pub fn has_session(&self) -> bool {
        self.session_cookie.is_some() || self.access_token.is_some()
    }

    /// Auth to put on data requests: the session cookie if one exists,
    /// otherwise the bearer token.
    pub fn session_auth(&self) -> Result<HttpAuth, AcquisitionError> {
        if let Some(cookie) = &self.session_cookie {
            return Ok(HttpAuth::Cookie(cookie.clone()));
        }
        if let Some(token) = &self.access_token {
            return Ok(HttpAuth::BearerToken(token.clone()));
        }
        Err(AcquisitionError::auth_expired("no session established"))
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("flavor", &self.flavor)
            .field("secret", &"<redacted>")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("session_cookie", &self.session_cookie.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Loading and storing credentials outside the process.
pub trait CredentialPersistence: Send + Sync {
    fn load(&self, source: &str) -> Result<Credentials, AcquisitionError>;
    fn store(&self, credentials: &Credentials, source: &str) -> Result<(), AcquisitionError>;
}

/// Current credentials of one source.
///
/// Readers get a consistent snapshot: `replace` swaps the whole record under
/// a write lock, so a new access token is never seen next to a stale refresh
/// token.
pub struct CredentialStore {
    source: String,
    current: RwLock<Arc<Credentials>>,
    persistence: Option<Arc<dyn CredentialPersistence>>,
}

impl CredentialStore {
    pub fn new(source: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            source: source.into(),
            current: RwLock::new(Arc::new(credentials)),
            persistence: None,
        }
    }

    /// Load through `persistence` and keep it for write-through on replace.
    pub fn load(
        source: impl Into<String>,
        persistence: Arc<dyn CredentialPersistence>,
    ) -> Result<Self, AcquisitionError> {
        let source = source.into();
        let credentials = persistence.load(&source)?;
        Ok(Self::new(source, credentials).with_persistence(persistence))
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn CredentialPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn get(&self) -> Credentials {
        self.snapshot().as_ref().clone()
    }

    pub fn snapshot(&self) -> Arc<Credentials> {
        Arc::clone(&self.current.read().expect("credential lock poisoned"))
    }

    /// Atomically swap in `credentials`, then write through to persistence.
    ///
    /// A persistence failure is logged; the in-memory record stays replaced.
    pub fn replace(&self, credentials: Credentials) {
        let credentials = Arc::new(credentials);
        {
            let mut current = self.current.write().expect("credential lock poisoned");
            *current = Arc::clone(&credentials);
        }
        debug!(source = %self.source, flavor = credentials.flavor.as_str(), "credentials replaced");

        if let Some(persistence) = &self.persistence {
            if let Err(error) = persistence.store(&credentials, &self.source) {
                warn!(source = %self.source, error = %error, "failed to persist refreshed credentials");
            }
        }
    }
}

impl Debug for CredentialStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("source", &self.source)
            .field("current", &self.snapshot())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

/// On-disk layout; field names match the credential files the pollers have
/// always shared (`client_id`, `refresh_token`, `email`, `password`).
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flavor: Option<AuthFlavor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_cookie: Option<String>,
}

impl CredentialFile {
    fn into_credentials(self, path: &Path) -> Result<Credentials, AcquisitionError> {
        let flavor = match self.flavor {
            Some(flavor) => flavor,
            None if self.password.is_some() => AuthFlavor::Password,
            None if self.refresh_token.is_some() => AuthFlavor::RefreshToken,
            None => {
                return Err(AcquisitionError::Persistence(format!(
                    "{} has neither a password nor a refresh_token",
                    path.display()
                )))
            }
        };

        let (identity, secret) = match flavor {
            AuthFlavor::RefreshToken => (self.client_id, self.refresh_token),
            AuthFlavor::Password => (self.email.or(self.username), self.password),
        };
        let secret = secret.ok_or_else(|| {
            AcquisitionError::Persistence(format!(
                "{} is missing the {} secret",
                path.display(),
                flavor.as_str()
            ))
        })?;

        Ok(Credentials {
            identity: identity.unwrap_or_default(),
            flavor,
            secret,
            access_token: self.access_token,
            session_cookie: self.session_cookie,
        })
    }

    fn from_credentials(credentials: &Credentials) -> Self {
        let mut file = Self {
            flavor: Some(credentials.flavor),
            access_token: credentials.access_token.clone(),
            session_cookie: credentials.session_cookie.clone(),
            ..Self::default()
        };
        match credentials.flavor {
            AuthFlavor::RefreshToken => {
                file.client_id = Some(credentials.identity.clone());
                file.refresh_token = Some(credentials.secret.clone());
            }
            AuthFlavor::Password => {
                file.email = Some(credentials.identity.clone());
                file.password = Some(credentials.secret.clone());
            }
        }
        file
    }
}

/// One JSON file per source under `dir` (`<dir>/<source>.json`).
#[derive(Debug, Clone)]
pub struct JsonCredentialFile {
    dir: PathBuf,
}

impl JsonCredentialFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{source}.json"))
    }
}

impl CredentialPersistence for JsonCredentialFile {
    fn load(&self, source: &str) -> Result<Credentials, AcquisitionError> {
        let path = self.path_for(source);
        let raw = fs::read_to_string(&path).map_err(|error| {
            AcquisitionError::Persistence(format!("failed to read {}: {error}", path.display()))
        })?;
        let file: CredentialFile = serde_json::from_str(&raw).map_err(|error| {
            AcquisitionError::Persistence(format!("failed to parse {}: {error}", path.display()))
        })?;
        file.into_credentials(&path)
    }

    fn store(&self, credentials: &Credentials, source: &str) -> Result<(), AcquisitionError> {
        let path = self.path_for(source);
        fs::create_dir_all(&self.dir).map_err(|error| {
            AcquisitionError::Persistence(format!(
                "failed to create {}: {error}",
                self.dir.display()
            ))
        })?;

        let body = serde_json::to_string_pretty(&CredentialFile::from_credentials(credentials))
            .map_err(|error| AcquisitionError::Persistence(error.to_string()))?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, body).map_err(|error| {
            AcquisitionError::Persistence(format!("failed to write {}: {error}", staging.display()))
        })?;
        fs::rename(&staging, &path).map_err(|error| {
            AcquisitionError::Persistence(format!(
                "failed to move {} into place: {error}",
                path.display()
            ))
        })
    }
}
