//! # Domain Models
//!
//! Output point model and the static measure table driving normalization.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MetricPoint`] | One timestamped, tagged scalar observation |
//! | [`MetricValue`] | Float, integer, string or boolean payload of a point |
//! | [`MeasureTable`] | Ordered raw field → [`MeasureDescriptor`] mapping |
//! | [`ScalarType`] | Target type a raw field is coerced to |
//! | [`MeasureKind`] | Role of a raw field: tag, metric, property or ignored |

mod measure;
mod metric;
mod timestamp;

pub use measure::{
    coerce, tag_text, MeasureDescriptor, MeasureEntry, MeasureKind, MeasureTable, ScalarType,
};
pub use metric::{MetricPoint, MetricValue};
pub use timestamp::{epoch_seconds_from_value, now_epoch_seconds, parse_epoch_seconds};
