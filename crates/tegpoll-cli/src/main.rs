mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use std::process::ExitCode;

use crate::cli::Cli;
use crate::error::{CliError, CYCLE_FAILED_EXIT_CODE};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let result = commands::run(cli).await?;
    output::render(&result, cli.pretty)?;

    if result.failed {
        return Ok(ExitCode::from(CYCLE_FAILED_EXIT_CODE));
    }

    Ok(ExitCode::SUCCESS)
}
