//! Wires a [`PollCycle`] from a [`PollerConfig`].

use std::sync::Arc;

use tracing::debug;

use crate::adapters::{FleetApiClient, LocalApplianceClient, LocalGatewayClient};
use crate::config::PollerConfig;
use crate::credentials::{CredentialStore, Credentials, JsonCredentialFile};
use crate::device::{DeviceClient, SourceKind};
use crate::error::AcquisitionError;
use crate::http_client::{HttpClient, HttpClientOptions, ReqwestHttpClient};
use crate::normalize::MetricNormalizer;
use crate::poll::{PollCycle, PollOptions};
use crate::refresh::{AuthEndpoint, TokenRefresher};
use crate::sink::MetricSink;

/// Builder for a production poll cycle.
///
/// Anything not injected is derived from the config: a reqwest transport
/// (accepting self-signed certificates for local sources when configured),
/// the credential file for the source, the device client and its refresher.
///
/// # Example
///
/// ```rust,ignore
/// use tegpoll_core::{PollerBuilder, PollerConfig};
///
/// let cycle = PollerBuilder::new(PollerConfig::load(None)?).build()?;
/// let report = cycle.run().await;
/// ```
pub struct PollerBuilder {
    config: PollerConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    credentials: Option<Arc<CredentialStore>>,
    sink: Option<Arc<dyn MetricSink>>,
}

impl PollerBuilder {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            http_client: None,
            credentials: None,
            sink: None,
        }
    }

    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn http_client(&self) -> Result<Arc<dyn HttpClient>, AcquisitionError> {
        if let Some(client) = &self.http_client {
            return Ok(Arc::clone(client));
        }
        let options = HttpClientOptions {
            accept_invalid_certs: self.config.source != SourceKind::FleetApi
                && self.config.local.accept_invalid_certs,
            ..HttpClientOptions::default()
        };
        Ok(Arc::new(ReqwestHttpClient::new(&options)?))
    }

    /// The injected store, or the source's credential file.
    pub fn credential_store(&self) -> Result<Arc<CredentialStore>, AcquisitionError> {
        if let Some(store) = &self.credentials {
            return Ok(Arc::clone(store));
        }
        let source = self.config.credential_source();
        if self.is_anonymous() {
            return Ok(Arc::new(CredentialStore::new(source, Credentials::anonymous())));
        }
        let persistence = Arc::new(JsonCredentialFile::new(&self.config.credentials_dir));
        debug!(path = %persistence.path_for(source).display(), "loading credentials");
        Ok(Arc::new(CredentialStore::load(source, persistence)?))
    }

    pub fn device_client(&self, http_client: Arc<dyn HttpClient>) -> Arc<dyn DeviceClient> {
        let config = &self.config;
        let retry = config.retry.transient_policy();
        match config.source {
            SourceKind::FleetApi => Arc::new(
                FleetApiClient::with_base_url(http_client, config.fleet.base_url.as_str())
                    .with_retry_policy(retry)
                    .with_timeout_ms(config.timeout_ms),
            ),
            SourceKind::LocalGateway => {
                let client = LocalGatewayClient::new(http_client, config.local.base_url.as_str())
                    .with_retry_policy(retry)
                    .with_timeout_ms(config.timeout_ms);
                if config.local.anonymous {
                    Arc::new(client.anonymous())
                } else {
                    Arc::new(client)
                }
            }
            SourceKind::LocalAppliance => Arc::new(
                LocalApplianceClient::new(http_client, config.local.base_url.as_str())
                    .with_retry_policy(retry)
                    .with_timeout_ms(config.timeout_ms),
            ),
        }
    }

    pub fn refresher(&self, http_client: Arc<dyn HttpClient>) -> TokenRefresher {
        let config = &self.config;
        let endpoint = match config.source {
            SourceKind::FleetApi => AuthEndpoint::OAuthToken {
                token_url: config.fleet.token_url.clone(),
            },
            SourceKind::LocalGateway | SourceKind::LocalAppliance => {
                AuthEndpoint::local_login(&config.local.base_url)
                    .with_username(config.local.username.as_str())
            }
        };
        TokenRefresher::new(http_client, endpoint)
            .with_retry_policy(config.retry.refresh_policy())
            .with_timeout_ms(config.timeout_ms)
    }

    pub fn build(self) -> Result<PollCycle, AcquisitionError> {
        self.config.validate()?;
        let http_client = self.http_client()?;
        let credentials = self.credential_store()?;
        let client = self.device_client(Arc::clone(&http_client));
        let refresher = self.refresher(http_client);

        let cycle = PollCycle::new(
            client,
            Arc::new(refresher),
            credentials,
            MetricNormalizer::new(self.config.measure_table()),
        )
        .with_options(PollOptions {
            dry_run: self.config.dry_run,
        });

        Ok(match self.sink {
            Some(sink) => cycle.with_sink(sink),
            None => cycle,
        })
    }

    fn is_anonymous(&self) -> bool {
        self.config.source == SourceKind::LocalGateway && self.config.local.anonymous
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use super::*;
    use crate::device::AuthPolicy;
    use crate::http_client::{HttpError, HttpRequest, HttpResponse};

    struct UnusedHttpClient;

    impl HttpClient for UnusedHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            Box::pin(async move { Err(HttpError::connect(format!("unexpected call to {}", request.url))) })
        }
    }

    fn builder(config: PollerConfig) -> PollerBuilder {
        PollerBuilder::new(config).with_http_client(Arc::new(UnusedHttpClient))
    }

    #[test]
    fn device_client_follows_source_selection() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = PollerConfig::in_home(temp.path());

        for (source, anonymous, policy) in [
            (SourceKind::FleetApi, false, AuthPolicy::Lazy),
            (SourceKind::LocalGateway, false, AuthPolicy::EveryPoll),
            (SourceKind::LocalGateway, true, AuthPolicy::Anonymous),
            (SourceKind::LocalAppliance, false, AuthPolicy::EveryPoll),
        ] {
            config.source = source;
            config.local.anonymous = anonymous;
            let poller = builder(config.clone());
            let client = poller.device_client(Arc::new(UnusedHttpClient));
            assert_eq!(client.source(), source);
            assert_eq!(client.auth_policy(), policy);
        }
    }

    #[test]
    fn local_refresher_uses_configured_username() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = PollerConfig::in_home(temp.path());
        config.source = SourceKind::LocalAppliance;
        config.local.base_url = String::from("https://192.168.1.20/");
        config.local.username = String::from("installer");

        let refresher = builder(config).refresher(Arc::new(UnusedHttpClient));
        assert_eq!(
            refresher.endpoint(),
            &AuthEndpoint::SessionLogin {
                login_url: String::from("https://192.168.1.20/api/login/Basic"),
                username: String::from("installer"),
            }
        );
    }

    #[test]
    fn anonymous_gateway_needs_no_credential_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = PollerConfig::in_home(temp.path());
        config.source = SourceKind::LocalGateway;
        config.local.anonymous = true;

        let store = builder(config).credential_store().expect("anonymous store");
        assert!(!store.snapshot().has_session());
    }

    #[test]
    fn missing_credential_file_fails_the_build() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = PollerConfig::in_home(temp.path());

        let error = builder(config).build().err().expect("no credentials");
        assert!(matches!(error, AcquisitionError::Persistence(_)));
    }

    #[test]
    fn invalid_config_is_rejected_before_wiring() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = PollerConfig::in_home(temp.path());
        config.timeout_ms = 0;

        let error = builder(config).build().err().expect("invalid");
        assert!(matches!(error, AcquisitionError::Validation(_)));
    }

    #[test]
    fn dry_run_flag_reaches_the_cycle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = PollerConfig::in_home(temp.path());
        config.dry_run = true;
        let store = Arc::new(CredentialStore::new(
            "tesla",
            Credentials::refresh_token("ownerapi", "refresh"),
        ));

        let cycle = builder(config).with_credentials(store).build().expect("cycle");
        assert!(cycle.options().dry_run);
    }
}
