use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDateTime, TimeZone};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::time::{
    format_clock_ms, format_display_time_in, parse_display_time, sanitize, title_case, EMPTY_TIME,
    PLACEHOLDER,
};
use crate::alarm::{AlarmScheduler, Delivery, PendingAction, WIDGET_UPDATE_REQUEST_CODE};
use crate::prefs::{keys, PreferenceStore};
use crate::services::{AlarmService, WidgetHostService};

pub type WidgetId = i32;

pub const COMPACT_MIN_WIDTH_DP: u32 = 200;
pub const UNKNOWN_PLACE: &str = "Lokasi tidak diketahui";
pub const LEGACY_UNKNOWN_PLACE: &str = "Lokasi tidak tersedia";
pub const PRAYERS: [&str; 5] = ["subuh", "dzuhur", "ashar", "maghrib", "isya"];

pub const DAILY_UPDATE_HOUR: u32 = 0;
pub const DAILY_UPDATE_MINUTE: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidgetProvider {
    Prayer,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidgetLayout {
    /// 1x3 strip: countdown plus the first two prayers.
    Compact,
    Full,
}

impl WidgetLayout {
    pub fn for_min_width(min_width_dp: u32) -> Self {
        if min_width_dp >= COMPACT_MIN_WIDTH_DP {
            WidgetLayout::Compact
        } else {
            WidgetLayout::Full
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrayerRow {
    pub name: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidgetView {
    Prayer {
        layout: WidgetLayout,
        place: String,
        next_prayer: String,
        next_time: String,
        countdown: Option<String>,
        rows: Vec<PrayerRow>,
    },
    Legacy {
        location: String,
        rows: Vec<PrayerRow>,
        updated: String,
    },
    /// Minimal layout shown when rendering failed.
    Fallback,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub rendered: usize,
    pub fallback: usize,
}

fn value_text(store: &dyn PreferenceStore, key: &str) -> Option<String> {
    let value = store.get(key)?.to_string();
    sanitize(Some(&value)).map(str::to_string)
}

/// First non-empty value among the prefixed and plain spellings of `key`,
/// searching the stores in order.
fn lookup(stores: &[&dyn PreferenceStore], key: &str) -> Option<String> {
    let prefixed = format!("{}{}", keys::FLUTTER_PREFIX, key);
    stores.iter().find_map(|store| {
        value_text(*store, &prefixed).or_else(|| value_text(*store, key))
    })
}

/// Plain key first, then the prefixed one.
fn read_prayer_time(store: &dyn PreferenceStore, prayer: &str) -> Option<String> {
    let key = format!("{}{}", keys::PRAYER_TIME_PREFIX, prayer);
    value_text(store, &key).or_else(|| value_text(store, &format!("{}{}", keys::FLUTTER_PREFIX, key)))
}

/// Earliest upcoming `prayer_time_*` entry. Times already passed today count
/// as tomorrow's occurrence.
fn upcoming_prayer<Tz: TimeZone>(
    store: &dyn PreferenceStore,
    now: NaiveDateTime,
    tz: &Tz,
) -> Option<(String, String)> {
    let mut best: Option<(NaiveDateTime, String, String)> = None;

    for (key, value) in store.entries() {
        let prayer = match key.rfind(keys::PRAYER_TIME_PREFIX) {
            Some(idx) => &key[idx + keys::PRAYER_TIME_PREFIX.len()..],
            None => continue,
        };
        let text = value.to_string();
        let raw = match sanitize(Some(&text)) {
            Some(raw) => raw,
            None => continue,
        };
        let time = match parse_display_time(raw, tz) {
            Some(time) => time,
            None => continue,
        };

        let mut at = now.date().and_time(time);
        if at <= now {
            at += ChronoDuration::days(1);
        }
        if best.as_ref().map_or(true, |(best_at, _, _)| at < *best_at) {
            best = Some((at, prayer.to_string(), raw.to_string()));
        }
    }

    best.map(|(_, prayer, raw)| (title_case(&prayer), format_display_time_in(Some(&raw), tz)))
}

/// First prayer found in any `prayer_times_cache*` JSON object.
fn cached_prayer<Tz: TimeZone>(store: &dyn PreferenceStore, tz: &Tz) -> Option<(String, String)> {
    let cache_prefixed = format!("{}{}", keys::FLUTTER_PREFIX, keys::PRAYER_TIMES_CACHE_PREFIX);
    for (key, value) in store.entries() {
        if !key.starts_with(keys::PRAYER_TIMES_CACHE_PREFIX) && !key.starts_with(&cache_prefixed) {
            continue;
        }
        let text = value.to_string();
        let cache: Value = match serde_json::from_str(&text) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("prayer_times_cache JSON parse failed for {}: {}", key, e);
                continue;
            }
        };
        for prayer in PRAYERS {
            if let Some(raw) = cache.get(prayer).and_then(Value::as_str) {
                if !raw.trim().is_empty() {
                    debug!("Using cache value for {} from {}", prayer, key);
                    return Some((title_case(prayer), format_display_time_in(Some(raw), tz)));
                }
            }
        }
    }
    None
}

fn first_explicit_prayer<Tz: TimeZone>(store: &dyn PreferenceStore, tz: &Tz) -> Option<(String, String)> {
    PRAYERS.iter().find_map(|prayer| {
        read_prayer_time(store, prayer)
            .map(|raw| (title_case(prayer), format_display_time_in(Some(&raw), tz)))
    })
}

/// Builds the prayer widget from cached state. `app` is the application
/// store, `native` the fallback store for place and next-prayer keys.
pub fn render_prayer_widget<Tz: TimeZone>(
    app: &dyn PreferenceStore,
    native: &dyn PreferenceStore,
    layout: WidgetLayout,
    now_ms: i64,
    tz: &Tz,
) -> Result<WidgetView> {
    let now = tz
        .timestamp_millis_opt(now_ms)
        .single()
        .with_context(|| format!("Invalid clock reading {}", now_ms))?
        .naive_local();

    let stores = [app, native];
    let place = lookup(&stores, keys::LAST_PLACE_NAME).unwrap_or_else(|| UNKNOWN_PLACE.to_string());
    let mut next_prayer =
        lookup(&stores, keys::NEXT_PRAYER_NAME).unwrap_or_else(|| PLACEHOLDER.to_string());
    let mut next_time =
        lookup(&stores, keys::NEXT_PRAYER_TIME).unwrap_or_else(|| PLACEHOLDER.to_string());

    let unresolved = |name: &str, time: &str| name == PLACEHOLDER || time == PLACEHOLDER;
    if unresolved(&next_prayer, &next_time) {
        let derived = upcoming_prayer(app, now, tz)
            .or_else(|| cached_prayer(app, tz))
            .or_else(|| first_explicit_prayer(app, tz));
        if let Some((name, time)) = derived {
            next_prayer = name;
            next_time = time;
        }
    }

    let shown = match layout {
        WidgetLayout::Compact => &PRAYERS[..2],
        WidgetLayout::Full => &PRAYERS[..],
    };
    let rows = shown
        .iter()
        .map(|prayer| PrayerRow {
            name: title_case(prayer),
            time: format_display_time_in(read_prayer_time(app, prayer).as_deref(), tz),
        })
        .collect();

    info!(
        "Resolved place={} nextPrayer={} nextTime={} layout={:?}",
        place, next_prayer, next_time, layout
    );

    Ok(WidgetView::Prayer {
        layout,
        countdown: (layout == WidgetLayout::Compact).then(|| next_time.clone()),
        place,
        next_prayer,
        next_time,
        rows,
    })
}

pub fn render_legacy_widget<Tz: TimeZone>(store: &dyn PreferenceStore, tz: &Tz) -> WidgetView {
    let rows = PRAYERS
        .iter()
        .map(|prayer| PrayerRow {
            name: title_case(prayer),
            time: store
                .get_string(&format!("widget_{}", prayer))
                .unwrap_or_else(|| EMPTY_TIME.to_string()),
        })
        .collect();

    WidgetView::Legacy {
        location: store
            .get_string(keys::WIDGET_LOCATION)
            .unwrap_or_else(|| LEGACY_UNKNOWN_PLACE.to_string()),
        rows,
        updated: format_clock_ms(store.get_long(keys::WIDGET_LAST_UPDATE_MS, 0), tz),
    }
}

fn apply_fallback<W: WidgetHostService + ?Sized>(host: &W, id: WidgetId, cause: anyhow::Error) {
    error!("Failed to update widget id={}: {:#}", id, cause);
    match host.update_widget(id, &WidgetView::Fallback) {
        Ok(()) => info!("Applied fallback widget layout for id={}", id),
        Err(e) => error!("Failed to apply fallback for widget id={}: {}", id, e),
    }
}

/// Re-renders every placed widget. A widget that cannot be rendered gets
/// the fallback layout; one bad widget never stops the others.
pub fn update_all_widgets<W, Tz>(
    host: &W,
    app: &dyn PreferenceStore,
    native: &dyn PreferenceStore,
    now_ms: i64,
    tz: &Tz,
) -> RenderSummary
where
    W: WidgetHostService + ?Sized,
    Tz: TimeZone,
{
    let mut summary = RenderSummary::default();

    let prayer_ids = host.widget_ids(WidgetProvider::Prayer);
    info!("updateAllWidgets called for widgetIds={:?}", prayer_ids);
    for id in prayer_ids {
        let result = host
            .widget_min_width(id)
            .map(WidgetLayout::for_min_width)
            .and_then(|layout| render_prayer_widget(app, native, layout, now_ms, tz))
            .and_then(|view| host.update_widget(id, &view));
        match result {
            Ok(()) => {
                debug!("Updated widget id={}", id);
                summary.rendered += 1;
            }
            Err(e) => {
                apply_fallback(host, id, e);
                summary.fallback += 1;
            }
        }
    }

    for id in host.widget_ids(WidgetProvider::Legacy) {
        match host.update_widget(id, &render_legacy_widget(native, tz)) {
            Ok(()) => summary.rendered += 1,
            Err(e) => {
                apply_fallback(host, id, e);
                summary.fallback += 1;
            }
        }
    }

    summary
}

/// Next `hour:minute` local time strictly after `now_ms`.
pub fn next_daily_trigger<Tz: TimeZone>(now_ms: i64, tz: &Tz, hour: u32, minute: u32) -> Option<i64> {
    let now = tz.timestamp_millis_opt(now_ms).single()?.naive_local();
    let mut next = now.date().and_hms_opt(hour, minute, 0)?;
    if next <= now {
        next += ChronoDuration::days(1);
    }
    tz.from_local_datetime(&next)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

pub fn schedule_daily_update<A, Tz>(alarms: &A, now_ms: i64, tz: &Tz) -> Delivery
where
    A: AlarmService + ?Sized,
    Tz: TimeZone,
{
    match next_daily_trigger(now_ms, tz, DAILY_UPDATE_HOUR, DAILY_UPDATE_MINUTE) {
        Some(trigger) => {
            let delivery = AlarmScheduler::new(alarms).schedule_at(trigger, &PendingAction::widget_update(), true);
            debug!("Scheduled widget daily update next={}", trigger);
            delivery
        }
        None => {
            warn!("No valid local time for the daily widget update");
            Delivery::Failed
        }
    }
}

pub fn cancel_daily_update<A: AlarmService + ?Sized>(alarms: &A) {
    AlarmScheduler::new(alarms).cancel(WIDGET_UPDATE_REQUEST_CODE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryPrefs;
    use chrono::FixedOffset;

    fn wib() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    // 2024-03-11 13:00 in UTC+7
    const NOW: i64 = 1_710_136_800_000;

    fn prayer_fields(view: &WidgetView) -> (&str, &str, &str) {
        match view {
            WidgetView::Prayer {
                place,
                next_prayer,
                next_time,
                ..
            } => (place, next_prayer, next_time),
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[test]
    fn layout_threshold() {
        assert_eq!(WidgetLayout::for_min_width(199), WidgetLayout::Full);
        assert_eq!(WidgetLayout::for_min_width(200), WidgetLayout::Compact);
    }

    #[test]
    fn empty_stores_render_placeholders() {
        let app = MemoryPrefs::new();
        let native = MemoryPrefs::new();
        let view = render_prayer_widget(&app, &native, WidgetLayout::Full, NOW, &wib()).unwrap();
        assert_eq!(prayer_fields(&view), (UNKNOWN_PLACE, "-", "-"));
        if let WidgetView::Prayer { rows, countdown, .. } = view {
            assert_eq!(rows.len(), 5);
            assert!(rows.iter().all(|r| r.time == "-"));
            assert_eq!(countdown, None);
        }
    }

    #[test]
    fn explicit_keys_win_and_prefixed_first() {
        let app = MemoryPrefs::new();
        let native = MemoryPrefs::new();
        app.put_string("flutter.last_place_name", "Bandung").unwrap();
        app.put_string("last_place_name", "Jakarta").unwrap();
        native.put_string("next_prayer_name", "Ashar").unwrap();
        native.put_string("next_prayer_time", "15:12").unwrap();

        let view = render_prayer_widget(&app, &native, WidgetLayout::Compact, NOW, &wib()).unwrap();
        assert_eq!(prayer_fields(&view), ("Bandung", "Ashar", "15:12"));
        if let WidgetView::Prayer { rows, countdown, .. } = view {
            assert_eq!(rows.len(), 2);
            assert_eq!(countdown.as_deref(), Some("15:12"));
        }
    }

    #[test]
    fn derives_earliest_upcoming_prayer() {
        let app = MemoryPrefs::new();
        let native = MemoryPrefs::new();
        app.put_string("flutter.prayer_time_subuh", "04:35").unwrap();
        app.put_string("flutter.prayer_time_dzuhur", "2024-03-11T11:58:00").unwrap();
        app.put_string("flutter.prayer_time_ashar", "2024-03-11T08:12:00.000Z").unwrap();
        app.put_string("flutter.prayer_time_maghrib", "18:02").unwrap();

        let view = render_prayer_widget(&app, &native, WidgetLayout::Full, NOW, &wib()).unwrap();
        assert_eq!(prayer_fields(&view).1, "Ashar");
        assert_eq!(prayer_fields(&view).2, "15:12");
    }

    #[test]
    fn passed_prayers_roll_to_tomorrow() {
        let app = MemoryPrefs::new();
        let native = MemoryPrefs::new();
        app.put_string("prayer_time_subuh", "04:35").unwrap();
        app.put_string("prayer_time_dzuhur", "11:58").unwrap();

        let view = render_prayer_widget(&app, &native, WidgetLayout::Full, NOW, &wib()).unwrap();
        assert_eq!(prayer_fields(&view).1, "Subuh");
        assert_eq!(prayer_fields(&view).2, "04:35");
    }

    #[test]
    fn json_cache_used_when_no_times_parse() {
        let app = MemoryPrefs::new();
        let native = MemoryPrefs::new();
        app.put_string("flutter.prayer_times_cache_2024", r#"{"dzuhur":"11:58","ashar":"15:12"}"#)
            .unwrap();

        let view = render_prayer_widget(&app, &native, WidgetLayout::Full, NOW, &wib()).unwrap();
        assert_eq!(prayer_fields(&view).1, "Dzuhur");
        assert_eq!(prayer_fields(&view).2, "11:58");
    }

    #[test]
    fn unparseable_explicit_time_is_last_resort() {
        let app = MemoryPrefs::new();
        let native = MemoryPrefs::new();
        app.put_string("prayer_time_isya", "ba'da maghrib").unwrap();

        let view = render_prayer_widget(&app, &native, WidgetLayout::Full, NOW, &wib()).unwrap();
        assert_eq!(prayer_fields(&view).1, "Isya");
        assert_eq!(prayer_fields(&view).2, "ba'da maghrib");
    }

    #[test]
    fn legacy_widget_placeholders() {
        let store = MemoryPrefs::new();
        store.put_string("widget_subuh", "04:35").unwrap();
        match render_legacy_widget(&store, &wib()) {
            WidgetView::Legacy { location, rows, updated } => {
                assert_eq!(location, LEGACY_UNKNOWN_PLACE);
                assert_eq!(rows[0].time, "04:35");
                assert_eq!(rows[1].time, EMPTY_TIME);
                assert_eq!(updated, "-");
            }
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[test]
    fn daily_trigger_today_or_tomorrow() {
        let tz = wib();
        // 13:00 local: next 00:05 is tomorrow
        let next = next_daily_trigger(NOW, &tz, 0, 5).unwrap();
        assert_eq!(next - NOW, (11 * 60 + 5) * 60_000);

        // 00:01 local: still ahead today
        let just_after_midnight = NOW - 13 * 3_600_000 + 60_000;
        let next = next_daily_trigger(just_after_midnight, &tz, 0, 5).unwrap();
        assert_eq!(next - just_after_midnight, 4 * 60_000);

        // exactly 00:05 rolls over
        let at = just_after_midnight + 4 * 60_000;
        assert_eq!(next_daily_trigger(at, &tz, 0, 5).unwrap() - at, 24 * 3_600_000);
    }
}
