mod measures;
mod poll;
mod refresh;

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tegpoll_core::PollerConfig;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Failure carried in the output instead of aborting the command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandFailure {
    pub code: &'static str,
    pub message: String,
}

pub struct CommandResult {
    pub command: &'static str,
    pub data: Value,
    pub warnings: Vec<String>,
    pub failure: Option<CommandFailure>,
    pub latency_ms: u64,
    pub failed: bool,
}

impl CommandResult {
    pub fn ok(command: &'static str, data: Value) -> Self {
        Self {
            command,
            data,
            warnings: Vec::new(),
            failure: None,
            latency_ms: 0,
            failed: false,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_failure(mut self, code: &'static str, message: impl Into<String>) -> Self {
        self.failure = Some(CommandFailure {
            code,
            message: message.into(),
        });
        self.failed = true;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let config = PollerConfig::load(cli.config.as_deref())?;
    debug!(source = %config.source, dry_run = config.dry_run, "configuration loaded");

    let result = match &cli.command {
        Command::Poll(args) => poll::run(args, config).await?,
        Command::RefreshToken(args) => refresh::run(args, config).await?,
        Command::Measures => measures::run(&config)?,
    };

    Ok(result.with_latency(started.elapsed().as_millis() as u64))
}
