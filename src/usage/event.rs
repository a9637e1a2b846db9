use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Token counters of a single trace line. Missing fields count as zero.
#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TokenUsage {
    pub fn tokens(&self) -> u64 {
        self.input.saturating_add(self.output)
    }
}

/// One line of `cache-trace.jsonl`.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub ts: Option<DateTime<Utc>>,
    pub model_id: String,
    pub provider: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedLine {
    #[error("line is not valid JSON")]
    InvalidJson,
    #[error("line is not a JSON object")]
    NotAnObject,
    #[error("unparseable timestamp {0:?}")]
    BadTimestamp(String),
}

const UNKNOWN: &str = "unknown";

/// Lenient counter coercion: negative values clamp to zero, numeric strings are accepted,
/// anything else counts as zero.
fn to_u64(v: &Value) -> u64 {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| *f > 0.0)
            .map(|f| f as u64)
            .unwrap_or(0),
        _ => 0,
    }
}

fn usage_from_value(usage_obj: Option<&Value>) -> TokenUsage {
    let Some(obj) = usage_obj.and_then(|u| u.as_object()) else {
        return TokenUsage::default();
    };
    let field = |name: &str| obj.get(name).map(to_u64).unwrap_or(0);
    TokenUsage {
        input: field("input"),
        output: field("output"),
        cache_read: field("cacheRead"),
        cache_write: field("cacheWrite"),
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, name: &str) -> String {
    obj.get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Parse an ISO-8601 timestamp. A trailing `Z` is rewritten to `+00:00`; timestamps without an
/// offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let normalized = match raw.strip_suffix('Z').or_else(|| raw.strip_suffix('z')) {
        Some(head) => format!("{head}+00:00"),
        None => raw.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn timestamp_field(value: Option<&Value>) -> Result<Option<DateTime<Utc>>, MalformedLine> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| MalformedLine::BadTimestamp(s.clone())),
        // Epoch milliseconds, as written by the cron run logs.
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(Some)
            .ok_or_else(|| MalformedLine::BadTimestamp(n.to_string())),
        Some(other) => Err(MalformedLine::BadTimestamp(other.to_string())),
    }
}

pub fn parse_event_line(line: &str) -> Result<UsageEvent, MalformedLine> {
    let value: Value = serde_json::from_str(line.trim()).map_err(|_| MalformedLine::InvalidJson)?;
    let obj = value.as_object().ok_or(MalformedLine::NotAnObject)?;
    Ok(UsageEvent {
        ts: timestamp_field(obj.get("ts"))?,
        model_id: string_field(obj, "modelId"),
        provider: string_field(obj, "provider"),
        usage: usage_from_value(obj.get("usage")),
    })
}
