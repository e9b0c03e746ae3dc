//! Display-time normalization for cached prayer times.
//!
//! The application layer has written prayer times in several shapes over
//! its releases: plain `HH:mm`, local ISO timestamps with or without
//! fractional seconds, and UTC ISO timestamps. All of them are accepted and
//! rendered as `HH:mm`; nothing here ever fails.

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

pub const PLACEHOLDER: &str = "-";
pub const EMPTY_TIME: &str = "--:--";

const DISPLAY_FORMAT: &str = "%H:%M";
const ISO_LOCAL: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Trims and drops values the application writes for "nothing": the empty
/// string and a literal `null`.
pub fn sanitize(raw: Option<&str>) -> Option<&str> {
    let s = raw?.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(s)
    }
}

/// Wall-clock time of `raw` in `tz`, if it is one of the known encodings.
pub fn parse_display_time<Tz: TimeZone>(raw: &str, tz: &Tz) -> Option<NaiveTime> {
    let s = raw.trim();

    if let Ok((time, _rest)) = NaiveTime::parse_and_remainder(s, DISPLAY_FORMAT) {
        return Some(time);
    }

    if let Ok(local) = NaiveDateTime::parse_from_str(s, ISO_LOCAL) {
        return Some(local.time());
    }

    if let Some(naive) = s.strip_suffix('Z') {
        if let Ok(utc) = NaiveDateTime::parse_from_str(naive, ISO_LOCAL) {
            return Some(Utc.from_utc_datetime(&utc).with_timezone(tz).naive_local().time());
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(tz).naive_local().time())
}

fn iso_time_part(s: &str) -> Option<&str> {
    static TIME_PART: OnceLock<Option<Regex>> = OnceLock::new();
    TIME_PART
        .get_or_init(|| Regex::new(r"^[^T]*T([^.]{5})").ok())
        .as_ref()?
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn format_display_time_in<Tz: TimeZone>(raw: Option<&str>, tz: &Tz) -> String {
    let s = match sanitize(raw) {
        Some(s) => s,
        None => return PLACEHOLDER.to_string(),
    };

    if let Some(time) = parse_display_time(s, tz) {
        return time.format(DISPLAY_FORMAT).to_string();
    }

    // Unknown ISO-like shape: show whatever sits where the clock would be.
    if s.len() > 5 && s.contains('T') {
        if let Some(part) = iso_time_part(s) {
            return part.to_string();
        }
    }
    s.to_string()
}

pub fn format_display_time(raw: Option<&str>) -> String {
    format_display_time_in(raw, &Local)
}

/// `HH:mm` of an epoch-millisecond timestamp, `-` when unknown.
pub fn format_clock_ms<Tz: TimeZone>(ms: i64, tz: &Tz) -> String {
    if ms <= 0 {
        return PLACEHOLDER.to_string();
    }
    match tz.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.naive_local().time().format(DISPLAY_FORMAT).to_string(),
        None => PLACEHOLDER.to_string(),
    }
}

/// `subuh` -> `Subuh`.
pub fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
