//! CLI argument definitions for tegpoll.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `poll` | Run one acquisition cycle and hand the batch to a sink |
//! | `refresh-token` | Exchange the stored secret for a fresh session |
//! | `measures` | Print the active measure table |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$TEGPOLL_HOME/config.json` | Poller configuration file |
//! | `--verbose` | `false` | Debug logging, including raw payloads |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! # One poll from the local gateway into the warehouse
//! tegpoll poll --source gateway
//!
//! # Inspect the batch without writing it
//! tegpoll poll --dry-run --print --pretty
//!
//! # Ship to InfluxDB instead
//! tegpoll poll --sink influx
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tegpoll_core::SourceKind;

/// tegpoll - energy gateway telemetry poller
///
/// Polls a Tesla energy gateway (locally or through the fleet API),
/// normalizes the readings into time-series points and stores them.
/// Meant to be invoked by cron or another external scheduler.
#[derive(Debug, Parser)]
#[command(
    name = "tegpoll",
    author,
    version,
    about = "Energy gateway telemetry poller",
    long_about = "tegpoll runs one poll cycle per invocation: authenticate, fetch the \
energy summary, normalize it into metric points and hand the batch to a sink.\n\
\n\
Use 'tegpoll <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Poller configuration file (JSON).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level, including every raw payload.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one poll cycle.
    ///
    /// Exit code 3 when the cycle ends failed.
    ///
    /// # Examples
    ///
    ///   tegpoll poll
    ///   tegpoll poll --source appliance --sink influx
    ///   tegpoll poll --dry-run --print
    Poll(PollArgs),

    /// Refresh the stored credentials and persist the result.
    RefreshToken(RefreshArgs),

    /// Print the measure table in effect, overrides applied.
    Measures,
}

/// Source family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceSelector {
    /// Cloud fleet API.
    Fleet,
    /// Local energy gateway.
    Gateway,
    /// Local web appliance.
    Appliance,
}

impl From<SourceSelector> for SourceKind {
    fn from(selector: SourceSelector) -> Self {
        match selector {
            SourceSelector::Fleet => SourceKind::FleetApi,
            SourceSelector::Gateway => SourceKind::LocalGateway,
            SourceSelector::Appliance => SourceKind::LocalAppliance,
        }
    }
}

/// Where a poll batch goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkSelector {
    /// Local DuckDB warehouse.
    Warehouse,
    /// InfluxDB v1 line protocol.
    Influx,
    /// Discard the batch.
    None,
}

/// Arguments for the `poll` command.
#[derive(Debug, Args)]
pub struct PollArgs {
    /// Source family; overrides the config file.
    #[arg(long, value_enum)]
    pub source: Option<SourceSelector>,

    /// Normalize but never write to the sink.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, value_enum, default_value_t = SinkSelector::Warehouse)]
    pub sink: SinkSelector,

    /// Directory holding `<source>.json` credential files.
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Include the normalized points in the output.
    #[arg(long, default_value_t = false)]
    pub print: bool,
}

/// Arguments for the `refresh-token` command.
#[derive(Debug, Args)]
pub struct RefreshArgs {
    #[arg(long, value_enum)]
    pub source: Option<SourceSelector>,

    #[arg(long)]
    pub credentials: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_flags_parse_into_overrides() {
        let cli = Cli::try_parse_from([
            "tegpoll", "poll", "--source", "appliance", "--sink", "influx", "--dry-run",
        ])
        .expect("parses");

        match cli.command {
            Command::Poll(args) => {
                assert_eq!(args.source.map(SourceKind::from), Some(SourceKind::LocalAppliance));
                assert_eq!(args.sink, SinkSelector::Influx);
                assert!(args.dry_run);
            }
            other => panic!("expected poll, got {other:?}"),
        }
    }

    #[test]
    fn warehouse_offers_no_query_command() {
        let error = Cli::try_parse_from([
            "tegpoll",
            "sql",
            "EXPLAIN ANALYZE DELETE FROM metric_points",
        ])
        .expect_err("unknown subcommand");

        assert_eq!(error.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }
}
