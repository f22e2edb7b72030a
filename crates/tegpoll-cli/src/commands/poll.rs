use std::sync::Arc;

use serde::Serialize;
use tegpoll_core::{
    CycleState, InfluxLineSink, MetricPoint, MetricSink, PollerBuilder, PollerConfig, SourceKind,
    Warehouse, WarehouseSink,
};

use crate::cli::{PollArgs, SinkSelector};
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct PollResponseData {
    source: SourceKind,
    state: CycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_at: Option<CycleState>,
    dry_run: bool,
    sink: Option<&'static str>,
    sink_invoked: bool,
    reauth_count: u32,
    point_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    points: Option<Vec<MetricPoint>>,
}

pub async fn run(args: &PollArgs, mut config: PollerConfig) -> Result<CommandResult, CliError> {
    if let Some(source) = args.source {
        config.source = source.into();
    }
    if let Some(dir) = &args.credentials {
        config.credentials_dir = dir.clone();
    }
    config.dry_run |= args.dry_run;
    config.validate()?;

    let builder = PollerBuilder::new(config.clone());
    let http_client = builder.http_client()?;
    let mut builder = builder.with_http_client(Arc::clone(&http_client));

    let sink: Option<Arc<dyn MetricSink>> = match args.sink {
        SinkSelector::None => None,
        // Dry runs never write, so the warehouse file is left alone.
        SinkSelector::Warehouse if config.dry_run => None,
        SinkSelector::Warehouse => {
            let warehouse = Warehouse::open(config.warehouse_config())
                .map_err(|e| CliError::Command(format!("failed to open warehouse: {e}")))?;
            Some(Arc::new(WarehouseSink::new(warehouse, config.source.as_str())))
        }
        SinkSelector::Influx => Some(Arc::new(
            InfluxLineSink::new(http_client, &config.influx.url, &config.influx.database)
                .with_timeout_ms(config.timeout_ms),
        )),
    };
    let sink_name = sink.as_ref().map(|sink| sink.name());
    if let Some(sink) = sink {
        builder = builder.with_sink(sink);
    }

    let report = builder.build()?.run().await;

    let data = PollResponseData {
        source: report.source,
        state: report.state,
        failed_at: report.failed_at,
        dry_run: config.dry_run,
        sink: sink_name,
        sink_invoked: report.sink_invoked,
        reauth_count: report.reauth_count,
        point_count: report.points.len(),
        points: args.print.then(|| report.points.clone()),
    };

    let mut result = CommandResult::ok("poll", serde_json::to_value(&data)?);
    if args.sink == SinkSelector::Warehouse && config.dry_run {
        result = result.with_warning("dry run: batch not written to the warehouse");
    }
    if let Some(failure) = &report.failure {
        result = result.with_failure(failure.code(), failure.to_string());
    }
    Ok(result)
}
