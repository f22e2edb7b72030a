//! Static measure table: raw field name → scalar type, semantic kind and unit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::MetricValue;
use crate::error::ValidationError;

/// Target scalar type of a raw field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    String,
    Integer,
    Float,
    Boolean,
    /// Keep the JSON value's own type.
    Passthrough,
}

/// Role of a raw field in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    /// Becomes a tag on every point of the same device.
    Tag,
    /// Becomes a point.
    Metric,
    /// Read by the normalizer (e.g. timestamps) but never emitted.
    Property,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureDescriptor {
    #[serde(rename = "type")]
    pub scalar: ScalarType,
    pub kind: MeasureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl MeasureDescriptor {
    pub fn new(scalar: ScalarType, kind: MeasureKind) -> Self {
        Self {
            scalar,
            kind,
            unit: None,
        }
    }

    pub fn metric(scalar: ScalarType, unit: &str) -> Self {
        Self {
            scalar,
            kind: MeasureKind::Metric,
            unit: Some(unit.to_owned()),
        }
    }

    pub fn ignored() -> Self {
        Self::new(ScalarType::Passthrough, MeasureKind::Ignored)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureEntry {
    pub field: String,
    #[serde(flatten)]
    pub descriptor: MeasureDescriptor,
}

/// Ordered field → descriptor mapping.
///
/// Declaration order is output order, which keeps normalization
/// reproducible regardless of how the source JSON was laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureTable {
    #[serde(default)]
    pub timestamp_field: Option<String>,
    #[serde(default)]
    measures: Vec<MeasureEntry>,
}

impl Default for MeasureTable {
    fn default() -> Self {
        Self::energy_meters()
    }
}

impl MeasureTable {
    pub fn empty() -> Self {
        Self {
            timestamp_field: None,
            measures: Vec::new(),
        }
    }

    /// Fields of the aggregate meter payload (`/api/meters/aggregates`).
    pub fn energy_meters() -> Self {
        use ScalarType::{Float, Integer, String};

        Self::empty()
            .with_timestamp_field("last_communication_time")
            .with(
                "last_communication_time",
                MeasureDescriptor::new(String, MeasureKind::Property),
            )
            .with("instant_power", MeasureDescriptor::metric(Float, "W"))
            .with("instant_reactive_power", MeasureDescriptor::metric(Float, "VAR"))
            .with("instant_apparent_power", MeasureDescriptor::metric(Float, "VA"))
            .with("frequency", MeasureDescriptor::metric(Float, "Hz"))
            .with("energy_exported", MeasureDescriptor::metric(Float, "Wh"))
            .with("energy_imported", MeasureDescriptor::metric(Float, "Wh"))
            .with("instant_average_voltage", MeasureDescriptor::metric(Float, "V"))
            .with("instant_average_current", MeasureDescriptor::metric(Float, "A"))
            .with("instant_total_current", MeasureDescriptor::metric(Float, "A"))
            .with("i_a_current", MeasureDescriptor::metric(Float, "A"))
            .with("i_b_current", MeasureDescriptor::metric(Float, "A"))
            .with("i_c_current", MeasureDescriptor::metric(Float, "A"))
            .with(
                "num_meters_aggregated",
                MeasureDescriptor::new(Integer, MeasureKind::Metric),
            )
            .with("timeout", MeasureDescriptor::ignored())
            .with("last_phase_voltage_communication_time", MeasureDescriptor::ignored())
            .with("last_phase_power_communication_time", MeasureDescriptor::ignored())
            .with("last_phase_energy_communication_time", MeasureDescriptor::ignored())
            .with("disclaimer", MeasureDescriptor::ignored())
    }

    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = Some(field.into());
        self
    }

    pub fn with(mut self, field: impl Into<String>, descriptor: MeasureDescriptor) -> Self {
        self.insert(field, descriptor);
        self
    }

    /// Replace an existing descriptor in place, or append a new one.
    pub fn insert(&mut self, field: impl Into<String>, descriptor: MeasureDescriptor) {
        let field = field.into();
        match self.measures.iter_mut().find(|entry| entry.field == field) {
            Some(entry) => entry.descriptor = descriptor,
            None => self.measures.push(MeasureEntry { field, descriptor }),
        }
    }

    /// Layer `overrides` on top of this table.
    pub fn merge(mut self, overrides: MeasureTable) -> Self {
        if overrides.timestamp_field.is_some() {
            self.timestamp_field = overrides.timestamp_field;
        }
        for entry in overrides.measures {
            self.insert(entry.field, entry.descriptor);
        }
        self
    }

    pub fn get(&self, field: &str) -> Option<&MeasureDescriptor> {
        self.measures
            .iter()
            .find(|entry| entry.field == field)
            .map(|entry| &entry.descriptor)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MeasureEntry> {
        self.measures.iter()
    }

    pub fn fields_of_kind(&self, kind: MeasureKind) -> impl Iterator<Item = &MeasureEntry> {
        self.measures
            .iter()
            .filter(move |entry| entry.descriptor.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }

    /// Reject tables where one field is declared twice (only reachable via deserialization).
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (index, entry) in self.measures.iter().enumerate() {
            if entry.field.trim().is_empty() {
                return Err(ValidationError::EmptyField { field: "measures.field" });
            }
            if self.measures[..index]
                .iter()
                .any(|earlier| earlier.field == entry.field)
            {
                return Err(ValidationError::DuplicateMeasure {
                    field: entry.field.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Coerce a raw JSON value to `scalar`.
///
/// Numeric coercion is lenient: null, non-numeric strings and structured
/// values become zero rather than failing the reading. String and boolean
/// descriptors pass non-matching values through with their own JSON type.
/// Returns `None` only for a passthrough of `null`.
pub fn coerce(value: &Value, scalar: ScalarType) -> Option<MetricValue> {
    match scalar {
        ScalarType::Float => Some(MetricValue::Float(lenient_f64(value))),
        ScalarType::Integer => Some(MetricValue::Integer(lenient_i64(value))),
        ScalarType::String => match value {
            Value::String(text) => Some(MetricValue::String(text.clone())),
            other => passthrough(other),
        },
        ScalarType::Boolean => match value {
            Value::Bool(flag) => Some(MetricValue::Boolean(*flag)),
            other => passthrough(other),
        },
        ScalarType::Passthrough => passthrough(value),
    }
}

/// Tag text for a raw value: strings verbatim, everything else as JSON.
/// Null and empty strings carry no tag.
pub fn tag_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn passthrough(value: &Value) -> Option<MetricValue> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some(MetricValue::Boolean(*flag)),
        Value::Number(number) => Some(match number.as_i64() {
            Some(integer) => MetricValue::Integer(integer),
            None => MetricValue::Float(finite_or_zero(number.as_f64().unwrap_or(0.0))),
        }),
        Value::String(text) => Some(MetricValue::String(text.clone())),
        other => Some(MetricValue::String(other.to_string())),
    }
}

fn lenient_f64(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(text) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    finite_or_zero(parsed)
}

fn lenient_i64(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .unwrap_or_else(|| truncate(number.as_f64().unwrap_or(0.0))),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .unwrap_or_else(|_| truncate(text.parse::<f64>().unwrap_or(0.0)))
        }
        _ => 0,
    }
}

fn truncate(value: f64) -> i64 {
    // `as` saturates and maps NaN to 0.
    value.trunc() as i64
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn float_coercion_is_lenient() {
        assert_eq!(coerce(&json!("20"), ScalarType::Float), Some(MetricValue::Float(20.0)));
        assert_eq!(coerce(&json!(12.5), ScalarType::Float), Some(MetricValue::Float(12.5)));
        assert_eq!(coerce(&json!("n/a"), ScalarType::Float), Some(MetricValue::Float(0.0)));
        assert_eq!(coerce(&Value::Null, ScalarType::Float), Some(MetricValue::Float(0.0)));
        assert_eq!(coerce(&json!("NaN"), ScalarType::Float), Some(MetricValue::Float(0.0)));
    }

    #[test]
    fn integer_coercion_truncates_and_defaults_to_zero() {
        assert_eq!(coerce(&json!(3), ScalarType::Integer), Some(MetricValue::Integer(3)));
        assert_eq!(coerce(&json!(3.9), ScalarType::Integer), Some(MetricValue::Integer(3)));
        assert_eq!(coerce(&json!("7"), ScalarType::Integer), Some(MetricValue::Integer(7)));
        assert_eq!(coerce(&json!("7.2"), ScalarType::Integer), Some(MetricValue::Integer(7)));
        assert_eq!(coerce(&json!([1]), ScalarType::Integer), Some(MetricValue::Integer(0)));
    }

    #[test]
    fn string_and_boolean_descriptors_pass_raw_values_through() {
        assert_eq!(
            coerce(&json!("SystemGridConnected"), ScalarType::String),
            Some(MetricValue::String(String::from("SystemGridConnected")))
        );
        assert_eq!(coerce(&json!(4), ScalarType::String), Some(MetricValue::Integer(4)));
        assert_eq!(coerce(&json!(true), ScalarType::Boolean), Some(MetricValue::Boolean(true)));
        assert_eq!(
            coerce(&json!("yes"), ScalarType::Boolean),
            Some(MetricValue::String(String::from("yes")))
        );
        assert_eq!(coerce(&Value::Null, ScalarType::Passthrough), None);
    }

    #[test]
    fn empty_and_null_tag_values_carry_no_tag() {
        assert_eq!(tag_text(&json!("")), None);
        assert_eq!(tag_text(&Value::Null), None);
        assert_eq!(tag_text(&json!("Home")).as_deref(), Some("Home"));
        assert_eq!(tag_text(&json!(3)).as_deref(), Some("3"));
    }

    #[test]
    fn insert_replaces_in_place_and_merge_appends_new_fields() {
        let table = MeasureTable::energy_meters();
        let position = table
            .entries()
            .position(|entry| entry.field == "frequency")
            .expect("frequency is declared");

        let merged = table.merge(
            MeasureTable::empty()
                .with("frequency", MeasureDescriptor::ignored())
                .with("grid_code", MeasureDescriptor::new(ScalarType::String, MeasureKind::Tag)),
        );

        assert_eq!(
            merged.entries().position(|entry| entry.field == "frequency"),
            Some(position)
        );
        assert_eq!(
            merged.get("frequency").map(|descriptor| descriptor.kind),
            Some(MeasureKind::Ignored)
        );
        assert_eq!(
            merged.entries().last().map(|entry| entry.field.as_str()),
            Some("grid_code")
        );
        assert_eq!(merged.timestamp_field.as_deref(), Some("last_communication_time"));
    }

    #[test]
    fn table_round_trips_through_config_json() {
        let raw = json!({
            "timestamp_field": "ts",
            "measures": [
                {"field": "instant_power", "type": "float", "kind": "metric", "unit": "W"},
                {"field": "serial", "type": "string", "kind": "tag"}
            ]
        });
        let table: MeasureTable = serde_json::from_value(raw).expect("valid table");
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get("instant_power"),
            Some(&MeasureDescriptor::metric(ScalarType::Float, "W"))
        );
        assert!(table.validate().is_ok());
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let raw = json!({
            "measures": [
                {"field": "instant_power", "type": "float", "kind": "metric"},
                {"field": "instant_power", "type": "integer", "kind": "metric"}
            ]
        });
        let table: MeasureTable = serde_json::from_value(raw).expect("parses");
        assert!(matches!(
            table.validate(),
            Err(ValidationError::DuplicateMeasure { .. })
        ));
    }
}
