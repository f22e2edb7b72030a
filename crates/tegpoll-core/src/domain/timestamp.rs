use serde_json::Value;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::OffsetDateTime;

use crate::ValidationError;

/// Parse a source-reported timestamp into epoch seconds.
///
/// Sources report RFC3339 with an offset (and up to nanosecond fractions);
/// anything else the `time` ISO 8601 parser accepts is tolerated.
pub fn parse_epoch_seconds(input: &str) -> Result<i64, ValidationError> {
    let trimmed = input.trim();
    OffsetDateTime::parse(trimmed, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(trimmed, &Iso8601::DEFAULT))
        .map(OffsetDateTime::unix_timestamp)
        .map_err(|_| ValidationError::InvalidTimestamp {
            value: input.to_owned(),
        })
}

/// Epoch seconds for a JSON timestamp: a string is parsed, a number is taken as-is.
pub fn epoch_seconds_from_value(value: &Value) -> Result<i64, ValidationError> {
    match value {
        Value::String(text) => parse_epoch_seconds(text),
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.is_finite()).map(|v| v as i64))
            .ok_or_else(|| ValidationError::InvalidTimestamp {
                value: number.to_string(),
            }),
        other => Err(ValidationError::InvalidTimestamp {
            value: other.to_string(),
        }),
    }
}

pub fn now_epoch_seconds() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
