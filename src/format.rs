use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rendered for absent or unrecognized timestamps.
pub const NOT_AVAILABLE: &str = "N/A";

/// ToDate
///
/// Anything that can be turned into a UTC instant. `None` means the value does not
/// describe a valid instant and is rendered as [`NOT_AVAILABLE`].
pub trait ToDate {
    fn to_date(&self) -> Option<DateTime<Utc>>;
}

/// BackendTimestamp
///
/// The document store's timestamp representation: whole seconds since the Unix epoch
/// plus a nanosecond remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTimestamp {
    pub seconds: i64,
    #[serde(default)]
    pub nanoseconds: u32,
}

impl ToDate for BackendTimestamp {
    fn to_date(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanoseconds).single()
    }
}

impl ToDate for DateTime<Utc> {
    fn to_date(&self) -> Option<DateTime<Utc>> {
        Some(*self)
    }
}

/// JSON values are recognized when they are timestamp objects, either
/// `{"seconds", "nanoseconds"}` or the REST form `{"_seconds", "_nanoseconds"}`.
/// Strings, numbers and every other shape are not.
impl ToDate for Value {
    fn to_date(&self) -> Option<DateTime<Utc>> {
        let object = self.as_object()?;
        let seconds = object
            .get("seconds")
            .or_else(|| object.get("_seconds"))
            .and_then(Value::as_i64)?;
        let nanoseconds = object
            .get("nanoseconds")
            .or_else(|| object.get("_nanoseconds"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let nanoseconds = u32::try_from(nanoseconds).ok()?;
        BackendTimestamp {
            seconds,
            nanoseconds,
        }
        .to_date()
    }
}

/// format_timestamp
///
/// Renders an instant as `YYYY/MM/DD, HH:MM (UTC)`, or `N/A` when the value is absent
/// or not a recognizable timestamp.
pub fn format_timestamp<T: ToDate + ?Sized>(value: Option<&T>) -> String {
    let Some(date) = value.and_then(|v| v.to_date()) else {
        return NOT_AVAILABLE.to_string();
    };

    format!(
        "{}/{:02}/{:02}, {:02}:{:02} (UTC)",
        date.year(),
        date.month(),
        date.day(),
        date.hour(),
        date.minute()
    )
}
