use chrono::{Datelike, Local, TimeZone, Timelike};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Label shown next to a message: `YYYY-MM-DD` once it is more than a day
/// old, otherwise the local `H:M` without padding.
pub fn format_timestamp(timestamp_ms: i64, now_ms: i64) -> String {
    format_timestamp_in(&Local, timestamp_ms, now_ms)
}

pub fn format_timestamp_in<Tz: TimeZone>(tz: &Tz, timestamp_ms: i64, now_ms: i64) -> String {
    let Some(date) = tz.timestamp_millis_opt(timestamp_ms).single() else {
        return "Invalid Date".to_string();
    };
    if now_ms.saturating_sub(timestamp_ms) > DAY_MS {
        format!("{}-{:02}-{:02}", date.year(), date.month(), date.day())
    } else {
        format!("{}:{}", date.hour(), date.minute())
    }
}
