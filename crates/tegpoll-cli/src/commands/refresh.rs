use serde::Serialize;
use tegpoll_core::{PollerBuilder, PollerConfig, Reauthenticator, SourceKind};

use crate::cli::RefreshArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct RefreshResponseData {
    source: SourceKind,
    credential_file: String,
    flavor: &'static str,
    refreshed: bool,
}

pub async fn run(args: &RefreshArgs, mut config: PollerConfig) -> Result<CommandResult, CliError> {
    if let Some(source) = args.source {
        config.source = source.into();
    }
    if let Some(dir) = &args.credentials {
        config.credentials_dir = dir.clone();
    }
    config.validate()?;
    if config.source == SourceKind::LocalGateway && config.local.anonymous {
        return Err(CliError::Command(String::from(
            "the gateway is configured for anonymous access; nothing to refresh",
        )));
    }

    let builder = PollerBuilder::new(config);
    let store = builder.credential_store()?;
    let refresher = builder.refresher(builder.http_client()?);

    let outcome = refresher.refresh(&store).await;
    let credentials = store.snapshot();
    let data = RefreshResponseData {
        source: builder.config().source,
        credential_file: builder
            .config()
            .credentials_dir
            .join(format!("{}.json", store.source()))
            .display()
            .to_string(),
        flavor: credentials.flavor.as_str(),
        refreshed: outcome.is_ok(),
    };

    let mut result = CommandResult::ok("refresh-token", serde_json::to_value(&data)?);
    if let Err(failure) = outcome {
        result = result.with_failure(failure.code(), failure.to_string());
    }
    Ok(result)
}
