use serde::Serialize;
use tegpoll_core::{MeasureKind, MeasureTable, PollerConfig};

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct MeasuresResponseData {
    metric_count: usize,
    overridden: bool,
    table: MeasureTable,
}

pub fn run(config: &PollerConfig) -> Result<CommandResult, CliError> {
    let table = config.measure_table();
    let data = MeasuresResponseData {
        metric_count: table.fields_of_kind(MeasureKind::Metric).count(),
        overridden: config.measures.is_some(),
        table,
    };
    Ok(CommandResult::ok("measures", serde_json::to_value(&data)?))
}
