use serde::Serialize;
use serde_json::Value;

use crate::commands::{CommandFailure, CommandResult};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct OutputMeta<'a> {
    command: &'static str,
    status: &'static str,
    latency_ms: u64,
    warnings: &'a [String],
}

#[derive(Debug, Serialize)]
struct Output<'a> {
    meta: OutputMeta<'a>,
    data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a CommandFailure>,
}

pub fn render(result: &CommandResult, pretty: bool) -> Result<(), CliError> {
    let payload = to_json(result, pretty)?;
    println!("{payload}");
    Ok(())
}

fn to_json(result: &CommandResult, pretty: bool) -> Result<String, CliError> {
    let output = Output {
        meta: OutputMeta {
            command: result.command,
            status: if result.failed { "failed" } else { "ok" },
            latency_ms: result.latency_ms,
            warnings: &result.warnings,
        },
        data: &result.data,
        error: result.failure.as_ref(),
    };

    let payload = if pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn failed_result_carries_status_and_error_code() {
        let result = CommandResult::ok("poll", json!({"point_count": 0}))
            .with_failure("acquisition.no_energy_sites", "no energy sites found")
            .with_latency(12);

        let rendered: Value =
            serde_json::from_str(&to_json(&result, false).expect("json")).expect("parse");
        assert_eq!(rendered["meta"]["status"], "failed");
        assert_eq!(rendered["meta"]["latency_ms"], 12);
        assert_eq!(rendered["error"]["code"], "acquisition.no_energy_sites");
        assert_eq!(rendered["data"]["point_count"], 0);
    }

    #[test]
    fn successful_result_omits_error() {
        let result = CommandResult::ok("measures", json!({})).with_warning("note");
        let rendered: Value =
            serde_json::from_str(&to_json(&result, true).expect("json")).expect("parse");
        assert_eq!(rendered["meta"]["status"], "ok");
        assert_eq!(rendered["meta"]["warnings"][0], "note");
        assert!(rendered.get("error").is_none());
    }
}
