use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

pub fn format_storage_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// Whole seconds as a chrono duration, `None` when not representable
pub fn seconds_duration(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// `time - delta`, clamped to the earliest representable instant
pub fn saturating_sub(time: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    time.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `time + delta`, clamped to the latest representable instant
pub fn saturating_add(time: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    time.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Report identifier of the form `REPORT-<8 hex>-<YYYYMMDD-HHMMSS>`
pub fn generate_report_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("REPORT-{}-{}", &suffix[..8], now.format("%Y%m%d-%H%M%S"))
}
