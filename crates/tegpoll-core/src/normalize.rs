//! Raw reading → ordered [`MetricPoint`] batch.
//!
//! Bulk meter fields go through the [`MeasureTable`]; the handful of
//! composite series (`real_mode`, `backup_reserve`, `soe`, `grid_status`,
//! `island_status`) are read from source-specific field names first, since
//! each API spells them differently.

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::device::{FleetReading, LocalReading, RawDeviceReading};
use crate::domain::{
    coerce, epoch_seconds_from_value, tag_text, MeasureKind, MeasureTable, MetricPoint,
    ScalarType,
};

/// Tag key carrying the device class.
pub const DEVICE_TAG: &str = "device";

/// Device classes in output order. Unknown classes follow, sorted by name.
pub const DEVICE_ORDER: [&str; 4] = ["site", "battery", "load", "solar"];

/// Fleet `live_status` power field per device class.
const FLEET_POWER_FIELDS: [(&str, &str); 4] = [
    ("site", "grid_power"),
    ("battery", "battery_power"),
    ("load", "load_power"),
    ("solar", "solar_power"),
];

#[derive(Debug, Clone, Default)]
pub struct MetricNormalizer {
    table: MeasureTable,
}

impl MetricNormalizer {
    pub fn new(table: MeasureTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &MeasureTable {
        &self.table
    }

    /// Normalize a whole reading. `poll_time` is the fallback timestamp.
    pub fn normalize(&self, reading: &RawDeviceReading, poll_time: i64) -> Vec<MetricPoint> {
        match reading {
            RawDeviceReading::Local(local) => self.normalize_local(local, poll_time),
            RawDeviceReading::Fleet(fleet) => self.normalize_fleet(fleet, poll_time),
        }
    }

    /// Table-driven points for one device payload.
    ///
    /// Timestamp precedence: `timestamp_override`, then the table's timestamp
    /// field in `raw`, then `fallback`. Only `metric` fields present in `raw`
    /// produce points, in table order; `tag` fields tag every point.
    pub fn normalize_device(
        &self,
        raw: &Value,
        device_tag: Option<&str>,
        timestamp_override: Option<i64>,
        fallback: i64,
    ) -> Vec<MetricPoint> {
        let Some(fields) = raw.as_object() else {
            return Vec::new();
        };
        let timestamp = timestamp_override.unwrap_or_else(|| self.reported_timestamp(fields, fallback));

        let mut tags = std::collections::BTreeMap::new();
        if let Some(device) = device_tag {
            tags.insert(String::from(DEVICE_TAG), device.to_owned());
        }
        for entry in self.table.fields_of_kind(MeasureKind::Tag) {
            if let Some(text) = fields.get(&entry.field).and_then(tag_text) {
                tags.insert(entry.field.clone(), text);
            }
        }

        self.table
            .fields_of_kind(MeasureKind::Metric)
            .filter_map(|entry| {
                let value = coerce(fields.get(&entry.field)?, entry.descriptor.scalar)?;
                Some(MetricPoint::new(entry.field.as_str(), value, timestamp).with_tags(tags.clone()))
            })
            .collect()
    }

    fn reported_timestamp(&self, fields: &Map<String, Value>, fallback: i64) -> i64 {
        let Some(raw) = self
            .table
            .timestamp_field
            .as_deref()
            .and_then(|field| fields.get(field))
            .filter(|value| !value.is_null())
        else {
            return fallback;
        };
        resolve_timestamp(raw, fallback)
    }

    fn normalize_local(&self, reading: &LocalReading, poll_time: i64) -> Vec<MetricPoint> {
        let mut points = Vec::new();
        let Some(meters) = reading.meters.as_object() else {
            return points;
        };

        for device in device_order(meters) {
            if let Some(raw) = meters.get(device) {
                points.extend(self.normalize_device(raw, Some(device), None, poll_time));
            }
        }

        let timestamp = meters
            .get("site")
            .and_then(Value::as_object)
            .map(|site| self.reported_timestamp(site, poll_time))
            .unwrap_or(poll_time);
        let operation = reading.operation.as_ref();

        points.extend(
            [
                composite("real_mode", field(operation, "real_mode"), ScalarType::String, timestamp),
                composite(
                    "backup_reserve",
                    field(operation, "backup_reserve_percent"),
                    ScalarType::Float,
                    timestamp,
                ),
                composite(
                    "soe",
                    field(reading.soe.as_ref(), "percentage"),
                    ScalarType::Float,
                    timestamp,
                ),
                composite(
                    "grid_status",
                    field(reading.grid_status.as_ref(), "grid_status"),
                    ScalarType::String,
                    timestamp,
                ),
            ]
            .into_iter()
            .flatten(),
        );
        points
    }

    fn normalize_fleet(&self, reading: &FleetReading, poll_time: i64) -> Vec<MetricPoint> {
        let live = &reading.live_status;
        let timestamp = live
            .get("timestamp")
            .filter(|value| !value.is_null())
            .map(|raw| resolve_timestamp(raw, poll_time))
            .unwrap_or(poll_time);

        let mut points = Vec::new();
        for (device, power_field) in FLEET_POWER_FIELDS {
            let power = live.get(power_field).cloned().unwrap_or_else(|| json!(0));
            let raw = json!({ "instant_power": power });
            points.extend(self.normalize_device(&raw, Some(device), Some(timestamp), poll_time));
        }

        if let Some(site_info) = &reading.site_info {
            let mode = site_info
                .get("default_real_mode")
                .filter(|value| !value.is_null())
                .cloned()
                .unwrap_or_else(|| json!("unknown"));
            points.extend(composite("real_mode", Some(&mode), ScalarType::String, timestamp));
            points.extend(composite(
                "backup_reserve",
                site_info.get("backup_reserve_percent"),
                ScalarType::Float,
                timestamp,
            ));
        }

        points.extend(
            [
                composite("soe", live.get("percentage_charged"), ScalarType::Float, timestamp),
                composite("grid_status", truthy(live.get("grid_status")), ScalarType::String, timestamp),
                composite(
                    "island_status",
                    truthy(live.get("island_status")),
                    ScalarType::String,
                    timestamp,
                ),
            ]
            .into_iter()
            .flatten(),
        );
        points
    }
}

/// Known device classes first, then the rest by name.
fn device_order(meters: &Map<String, Value>) -> Vec<&str> {
    let mut order: Vec<&str> = DEVICE_ORDER
        .iter()
        .copied()
        .filter(|device| meters.contains_key(*device))
        .collect();
    let mut extra: Vec<&str> = meters
        .keys()
        .map(String::as_str)
        .filter(|device| !DEVICE_ORDER.contains(device))
        .collect();
    extra.sort_unstable();
    order.extend(extra);
    order
}

fn resolve_timestamp(raw: &Value, fallback: i64) -> i64 {
    match epoch_seconds_from_value(raw) {
        Ok(timestamp) => timestamp,
        Err(error) => {
            warn!(error = %error, "unparseable reported timestamp, using poll time");
            fallback
        }
    }
}

fn field<'a>(payload: Option<&'a Value>, name: &str) -> Option<&'a Value> {
    payload?.get(name)
}

/// `false` and `null` count as absent.
fn truthy(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| !matches!(value, Value::Null | Value::Bool(false)))
}

/// Untagged point for a composite series; absent or null values emit nothing.
fn composite(
    series: &str,
    value: Option<&Value>,
    scalar: ScalarType,
    timestamp: i64,
) -> Option<MetricPoint> {
    let value = value.filter(|value| !value.is_null())?;
    Some(MetricPoint::new(series, coerce(value, scalar)?, timestamp))
}
