//! Batch sinks. A sink receives the complete batch of one cycle or nothing.

use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tegpoll_warehouse::{PointRecord, StoredValue, Warehouse, WarehouseError};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{MetricPoint, MetricValue};
use crate::http_client::{HttpClient, HttpError, HttpRequest, DEFAULT_TIMEOUT_MS};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink transport failed: {0}")]
    Transport(#[from] HttpError),

    #[error("sink rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// Blocking sink work could not be joined.
    #[error("sink task failed: {0}")]
    Task(String),
}

pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Time-series store contract. Callers never retry a failed write.
pub trait MetricSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn write<'a>(&'a self, points: &'a [MetricPoint]) -> SinkFuture<'a>;
}

/// Keeps every written batch in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<MetricPoint>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<MetricPoint>> {
        self.batches
            .lock()
            .expect("memory sink lock poisoned")
            .clone()
    }

    pub fn write_count(&self) -> usize {
        self.batches.lock().expect("memory sink lock poisoned").len()
    }
}

impl MetricSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write<'a>(&'a self, points: &'a [MetricPoint]) -> SinkFuture<'a> {
        self.batches
            .lock()
            .expect("memory sink lock poisoned")
            .push(points.to_vec());
        Box::pin(async { Ok(()) })
    }
}

/// Writes batches into the local `DuckDB` warehouse.
#[derive(Clone)]
pub struct WarehouseSink {
    warehouse: Warehouse,
    source: String,
}

impl WarehouseSink {
    pub fn new(warehouse: Warehouse, source: impl Into<String>) -> Self {
        Self {
            warehouse,
            source: source.into(),
        }
    }
}

impl MetricSink for WarehouseSink {
    fn name(&self) -> &'static str {
        "warehouse"
    }

    fn write<'a>(&'a self, points: &'a [MetricPoint]) -> SinkFuture<'a> {
        let records: Vec<PointRecord> = points.iter().map(point_record).collect();
        let warehouse = self.warehouse.clone();
        let source = self.source.clone();

        Box::pin(async move {
            let receipt = tokio::task::spawn_blocking(move || warehouse.ingest_points(&source, &records))
                .await
                .map_err(|error| SinkError::Task(error.to_string()))??;
            info!(
                batch_id = %receipt.batch_id,
                points = receipt.points,
                latency_ms = receipt.latency_ms,
                "batch stored in warehouse"
            );
            Ok(())
        })
    }
}

fn point_record(point: &MetricPoint) -> PointRecord {
    let value = match point.value() {
        MetricValue::Float(value) => StoredValue::Float(*value),
        MetricValue::Integer(value) => StoredValue::Integer(*value),
        MetricValue::String(value) => StoredValue::Text(value.clone()),
        MetricValue::Boolean(value) => StoredValue::Boolean(*value),
    };
    PointRecord {
        series: point.series().to_owned(),
        tags: point.tags().clone(),
        epoch_s: point.timestamp(),
        value,
    }
}

/// InfluxDB v1 line-protocol writer (`POST {base}/write?db=…&precision=s`).
#[derive(Clone)]
pub struct InfluxLineSink {
    http_client: Arc<dyn HttpClient>,
    write_url: String,
    timeout_ms: u64,
}

impl InfluxLineSink {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: &str, database: &str) -> Self {
        Self {
            http_client,
            write_url: format!(
                "{}/write?db={}&precision=s",
                base_url.trim_end_matches('/'),
                urlencoding::encode(database)
            ),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }
}

impl MetricSink for InfluxLineSink {
    fn name(&self) -> &'static str {
        "influx"
    }

    fn write<'a>(&'a self, points: &'a [MetricPoint]) -> SinkFuture<'a> {
        Box::pin(async move {
            let body = encode_lines(points);
            debug!(url = %self.write_url, lines = points.len(), "writing line protocol batch");
            let request = HttpRequest::post(self.write_url.as_str())
                .with_header("content-type", "text/plain; charset=utf-8")
                .with_body(body)
                .with_timeout_ms(self.timeout_ms);

            let response = self.http_client.execute(request).await?;
            if response.is_success() {
                Ok(())
            } else {
                Err(SinkError::Rejected {
                    status: response.status,
                    body: response.body,
                })
            }
        })
    }
}

/// Encode points as line protocol, one line per point, field key `value`.
///
/// Tags with an empty value are left out; InfluxDB rejects `key=`.
pub fn encode_lines(points: &[MetricPoint]) -> String {
    let mut body = String::new();
    for point in points {
        body.push_str(&escape_key(point.series(), false));
        for (key, value) in point.tags().iter().filter(|(_, value)| !value.is_empty()) {
            let _ = write!(body, ",{}={}", escape_key(key, true), escape_key(value, true));
        }
        let _ = write!(body, " value={} {}", field_value(point.value()), point.timestamp());
        body.push('\n');
    }
    body
}

fn field_value(value: &MetricValue) -> String {
    match value {
        MetricValue::Float(value) => format!("{value:?}"),
        MetricValue::Integer(value) => format!("{value}i"),
        MetricValue::Boolean(value) => value.to_string(),
        MetricValue::String(value) => {
            format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
        }
    }
}

/// Measurements escape commas and spaces; tag keys and values also escape `=`.
fn escape_key(raw: &str, escape_equals: bool) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for character in raw.chars() {
        if character == ',' || character == ' ' || (escape_equals && character == '=') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpResponse;

    struct RecordingHttpClient {
        status: u16,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let response = HttpResponse::new(self.status, "");
            Box::pin(async move { Ok(response) })
        }
    }

    fn batch() -> Vec<MetricPoint> {
        vec![
            MetricPoint::new("instant_power", 20.0, 1_612_219_386).with_tag("device", "site"),
            MetricPoint::new("num_meters_aggregated", 2_i64, 1_612_219_386)
                .with_tag("device", "solar"),
            MetricPoint::new("real_mode", "self_consumption", 1_612_219_386),
            MetricPoint::new("grid status", "Grid \"Up\"", 1_612_219_386).with_tag("site name", "a=b"),
        ]
    }

    #[test]
    fn line_protocol_types_and_escapes_fields() {
        assert_eq!(
            encode_lines(&batch()),
            "instant_power,device=site value=20.0 1612219386\n\
             num_meters_aggregated,device=solar value=2i 1612219386\n\
             real_mode value=\"self_consumption\" 1612219386\n\
             grid\\ status,site\\ name=a\\=b value=\"Grid \\\"Up\\\"\" 1612219386\n"
        );
    }

    #[tokio::test]
    async fn influx_sink_posts_one_body_per_batch() {
        let client = Arc::new(RecordingHttpClient {
            status: 204,
            requests: Mutex::new(Vec::new()),
        });
        let sink = InfluxLineSink::new(client.clone(), "http://influx.local:8086/", "teg");

        sink.write(&batch()).await.expect("write succeeds");

        let requests = client.requests.lock().expect("requests");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://influx.local:8086/write?db=teg&precision=s");
        assert_eq!(requests[0].body.as_deref().map(str::lines).map(Iterator::count), Some(4));
    }

    #[tokio::test]
    async fn influx_rejection_surfaces_status() {
        let client = Arc::new(RecordingHttpClient {
            status: 400,
            requests: Mutex::new(Vec::new()),
        });
        let sink = InfluxLineSink::new(client, "http://influx.local:8086", "teg");

        let error = sink.write(&batch()).await.expect_err("rejected");
        assert!(matches!(error, SinkError::Rejected { status: 400, .. }));
    }

    #[test]
    fn empty_tag_values_are_left_out_of_the_line() {
        let points = vec![MetricPoint::new("instant_power", 5.0, 1_612_219_386)
            .with_tag("device", "load")
            .with_tag("site_name", "")];

        assert_eq!(
            encode_lines(&points),
            "instant_power,device=load value=5.0 1612219386\n"
        );
    }

    #[tokio::test]
    async fn warehouse_sink_stores_the_batch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = tegpoll_warehouse::WarehouseConfig::in_home(temp.path());
        let sink = WarehouseSink::new(Warehouse::open(config.clone()).expect("warehouse open"), "gateway");

        sink.write(&batch()).await.expect("write succeeds");
        drop(sink);

        let connection = duckdb::Connection::open(&config.db_path).expect("reopen");
        let (points, batches): (i64, i64) = connection
            .query_row(
                "SELECT (SELECT COUNT(*) FROM metric_points WHERE source = 'gateway'), \
                        (SELECT COUNT(*) FROM ingest_log WHERE point_count = 4)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("counts");
        assert_eq!((points, batches), (4, 1));
    }
}
