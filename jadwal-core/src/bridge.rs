//! Method calls from the application layer.
//!
//! Each call names a channel and a method and carries a JSON object of
//! arguments. Results are JSON values; failures carry a stable error code the
//! application matches on.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::alarm::{PendingAction, PrayerAlarm};
use crate::audio::{AudioSource, DEFAULT_ADZAN_ASSET, TICK_RESOURCE};
use crate::config::DEFAULT_CLEANER_INTERVAL_MINUTES;
use crate::host::Host;
use crate::refresh::RefreshStatus;
use crate::services::{ServiceProvider, SettingsService};

pub const ALARM_CHANNEL: &str = "jadwalsholat.rasyid/alarm";
pub const WEB_CHANNEL: &str = "jadwalsholat.rasyid/web";
pub const AUDIO_CHANNEL: &str = "jadwalsholat.rasyid/audio";
pub const HEALTH_CHANNEL: &str = "jadwalsholat.rasyid/health";
pub const WIDGET_UPDATE_CHANNEL: &str = "jadwalsholat.rasyid/widget_update";

pub const WATCHDOG_ERR: &str = "WATCHDOG_ERR";
pub const PERSIST_ERR: &str = "PERSIST_ERR";
pub const SERVICE_ERR: &str = "SERVICE_ERR";
pub const ACTIVITY_ERROR: &str = "ACTIVITY_ERROR";
pub const AUDIO_ERROR: &str = "AUDIO_ERROR";
pub const HEALTH_ERR: &str = "HEALTH_ERR";
pub const ACTIVITY_ERR: &str = "ACTIVITY_ERR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub channel: String,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

impl MethodCall {
    pub fn new(channel: &str, method: &str, args: Value) -> Self {
        Self {
            channel: channel.to_string(),
            method: method.to_string(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum BridgeError {
    #[error("{code}: {message}")]
    Failure { code: String, message: String },
    #[error("method not implemented")]
    NotImplemented,
}

impl BridgeError {
    fn failure(code: &str, message: impl Into<String>) -> Self {
        BridgeError::Failure {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            BridgeError::Failure { code, .. } => Some(code),
            BridgeError::NotImplemented => None,
        }
    }
}

pub type BridgeResult = Result<Value, BridgeError>;

/// Loosely typed view of the argument object. Missing keys and wrong types
/// both read as absent, so callers fall back to their defaults.
struct Args<'a>(&'a Value);

impl<'a> Args<'a> {
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    fn i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Out-of-range values read as absent.
    fn i32(&self, key: &str) -> Option<i32> {
        self.i64(key).and_then(|v| i32::try_from(v).ok())
    }

    fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    fn str(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(Value::as_str)
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }
}

pub fn dispatch<S: ServiceProvider>(host: &Host<S>, call: &MethodCall) -> BridgeResult {
    debug!("Bridge call {}#{}", call.channel, call.method);
    let args = Args(&call.args);
    match call.channel.as_str() {
        ALARM_CHANNEL => alarm_call(host, &call.method, &args),
        WEB_CHANNEL => web_call(host, &call.method, &args),
        AUDIO_CHANNEL => audio_call(host, &call.method, &args),
        HEALTH_CHANNEL => health_call(host, &call.method),
        WIDGET_UPDATE_CHANNEL => widget_update_call(host, &call.method, &call.args),
        other => {
            warn!("Call on unknown channel {}", other);
            Err(BridgeError::NotImplemented)
        }
    }
}

fn alarm_call<S: ServiceProvider>(host: &Host<S>, method: &str, args: &Args<'_>) -> BridgeResult {
    match method {
        "setExactAlarm" => {
            let alarm = PrayerAlarm {
                title: args.str("title").unwrap_or(PrayerAlarm::DEFAULT_TITLE).to_string(),
                body: args.str("body").unwrap_or(PrayerAlarm::DEFAULT_BODY).to_string(),
                notification_id: args.i32("notificationId").unwrap_or(0),
                auto_play_prayer: args.str("autoPlayPrayer").map(str::to_string),
                auto_play_tick: args.bool("autoPlayTick").unwrap_or(false),
            };
            let time = args.i64("time").unwrap_or(0);
            host.alarms().schedule_at(time, &PendingAction::prayer(alarm), true);
            Ok(json!("Alarm set successfully"))
        }
        "cancelAlarm" => {
            let id = args.i32("notificationId").unwrap_or(0);
            host.alarms().cancel(id);
            Ok(json!("Alarm cancelled successfully"))
        }
        "startForegroundService" => host
            .presence()
            .start()
            .map(|_| json!("Foreground service started"))
            .map_err(|e| BridgeError::failure(SERVICE_ERR, e.to_string())),
        "stopForegroundService" => host
            .presence()
            .stop()
            .map(|_| json!("Foreground service stopped"))
            .map_err(|e| BridgeError::failure(SERVICE_ERR, e.to_string())),
        "scheduleNotificationCleaner" => {
            let minutes = args.i64("minutes").unwrap_or(DEFAULT_CLEANER_INTERVAL_MINUTES);
            host.cleaner().schedule(minutes);
            Ok(json!("Cleaner scheduled"))
        }
        "cancelNotificationCleaner" => {
            host.cleaner().cancel();
            Ok(json!("Cleaner cancelled"))
        }
        "setWatchdogInterval" => {
            let minutes = args.i64("minutes").unwrap_or(1);
            host.watchdog()
                .set_interval(minutes)
                .map(|_| json!("Watchdog interval set"))
                .map_err(|e| BridgeError::failure(WATCHDOG_ERR, format!("{:#}", e)))
        }
        "persistPrayerTimes" => persist_prayer_times(host, args.0),
        _ => Err(BridgeError::NotImplemented),
    }
}

/// Copies the string map into the native store, then makes sure the
/// presence service is running so the panel picks the values up.
fn persist_prayer_times<S: ServiceProvider>(host: &Host<S>, args: &Value) -> BridgeResult {
    let values = match args {
        Value::Object(map) => string_map(map)?,
        Value::Null => BTreeMap::new(),
        other => {
            return Err(BridgeError::failure(
                PERSIST_ERR,
                format!("expected a map of strings, got {}", other),
            ))
        }
    };

    host.native()
        .put_strings(&values)
        .map_err(|e| BridgeError::failure(PERSIST_ERR, format!("{:#}", e)))?;
    debug!("Persisted {} prayer values", values.len());

    if let Err(e) = host.presence().start() {
        warn!("Persisted, but the service did not start: {}", e);
    }
    Ok(json!("persisted"))
}

fn string_map(map: &Map<String, Value>) -> Result<BTreeMap<String, String>, BridgeError> {
    map.iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key.clone(), s.clone())),
            other => Err(BridgeError::failure(
                PERSIST_ERR,
                format!("value for {} is not a string: {}", key, other),
            )),
        })
        .collect()
}

fn web_call<S: ServiceProvider>(host: &Host<S>, method: &str, args: &Args<'_>) -> BridgeResult {
    match method {
        "openQiblaWeb" => host
            .qibla()
            .open(host.services(), args.str("url"))
            .map(|_| json!(true))
            .map_err(|e| BridgeError::failure(ACTIVITY_ERROR, e.to_string())),
        "injectLocation" => host
            .qibla()
            .inject(
                host.services(),
                args.f64("lat"),
                args.f64("lon"),
                args.f64("accuracy"),
                args.i64("timestamp"),
            )
            .map(|_| json!(true))
            .map_err(|e| BridgeError::failure(ACTIVITY_ERROR, e.to_string())),
        _ => Err(BridgeError::NotImplemented),
    }
}

fn audio_call<S: ServiceProvider>(host: &Host<S>, method: &str, args: &Args<'_>) -> BridgeResult {
    match method {
        "playRingtone" => {
            let source = match args.str("res") {
                Some(res) => AudioSource::Raw(res.to_string()),
                None => AudioSource::Asset(args.str("asset").unwrap_or(DEFAULT_ADZAN_ASSET).to_string()),
            };
            host.ringtone()
                .play(host.services(), host.app(), &source)
                .map(|_| json!(true))
                .map_err(|e| BridgeError::failure(AUDIO_ERROR, format!("Failed to play ringtone: {}", e)))
        }
        "stopRingtone" => {
            host.ringtone().stop(host.services());
            Ok(json!(true))
        }
        "playCountdownTick" => {
            let res = args.str("res").unwrap_or(TICK_RESOURCE);
            host.ringtone()
                .play_once(host.services(), res)
                .map(|_| json!(true))
                .map_err(|e| BridgeError::failure(AUDIO_ERROR, format!("Failed to play tick: {}", e)))
        }
        _ => Err(BridgeError::NotImplemented),
    }
}

fn health_call<S: ServiceProvider>(host: &Host<S>, method: &str) -> BridgeResult {
    match method {
        "reportHeartbeat" => host
            .report_heartbeat()
            .map(|ts| json!(ts))
            .map_err(|e| BridgeError::failure(HEALTH_ERR, format!("{:#}", e))),
        "getLastHeartbeat" => Ok(json!(host.last_heartbeat_ms())),
        "getBootReceivedTs" => Ok(json!(host.boot_received_ts())),
        "isBootReceiverTriggeredSinceBoot" => Ok(json!(host.is_boot_receiver_triggered_since_boot())),
        "openAppSettings" => host
            .services()
            .open_app_settings()
            .map(|_| json!(true))
            .map_err(|e| BridgeError::failure(ACTIVITY_ERR, e.to_string())),
        _ => Err(BridgeError::NotImplemented),
    }
}

fn widget_update_call<S: ServiceProvider>(host: &Host<S>, method: &str, args: &Value) -> BridgeResult {
    let status = match method {
        "updateComplete" => RefreshStatus::Complete,
        "updateFailed" => RefreshStatus::Failed(args.as_str().map(str::to_string)),
        _ => return Err(BridgeError::NotImplemented),
    };
    if !host.refresh_slot().complete(status) {
        debug!("{} arrived with no refresh running", method);
    }
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{ActionKind, CLEANER_REQUEST_CODE};
    use crate::config::MAX_INTERVAL_MINUTES;
    use crate::memory::MemoryPlatform;
    use crate::watchdog::TickSource;
    use crate::prefs::{keys, MemoryPrefs, PreferenceStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn host() -> Host<MemoryPlatform> {
        Host::new(Arc::new(MemoryPlatform::new()), MemoryPrefs::shared(), MemoryPrefs::shared())
            .with_probe_timeout(Duration::from_millis(20))
    }

    fn call(host: &Host<MemoryPlatform>, channel: &str, method: &str, args: Value) -> BridgeResult {
        dispatch(host, &MethodCall::new(channel, method, args))
    }

    #[test]
    fn exact_alarm_uses_defaults() {
        let host = host();
        let result = call(&host, ALARM_CHANNEL, "setExactAlarm", json!({"time": 5_000, "notificationId": 7}));
        assert_eq!(result, Ok(json!("Alarm set successfully")));

        let alarm = host.services().alarm(7).unwrap();
        assert_eq!(alarm.trigger_ms, 5_000);
        match alarm.action.kind {
            ActionKind::Prayer(p) => {
                assert_eq!(p.title, PrayerAlarm::DEFAULT_TITLE);
                assert_eq!(p.body, PrayerAlarm::DEFAULT_BODY);
                assert!(!p.plays_audio());
            }
            other => panic!("unexpected kind {:?}", other),
        }

        call(&host, ALARM_CHANNEL, "cancelAlarm", json!({"notificationId": 7})).unwrap();
        assert!(host.services().alarm(7).is_none());
    }

    #[test]
    fn watchdog_interval_validation() {
        let host = host();
        assert_eq!(
            call(&host, ALARM_CHANNEL, "setWatchdogInterval", json!({"minutes": 3})),
            Ok(json!("Watchdog interval set"))
        );
        assert_eq!(host.native().get_long(keys::WATCHDOG_INTERVAL_MINUTES, 0), 3);

        let err = call(&host, ALARM_CHANNEL, "setWatchdogInterval", json!({"minutes": 0})).unwrap_err();
        assert_eq!(err.code(), Some(WATCHDOG_ERR));
    }

    #[test]
    fn persist_writes_strings_and_starts_service() {
        let host = host();
        let result = call(
            &host,
            ALARM_CHANNEL,
            "persistPrayerTimes",
            json!({"next_prayer_name": "Ashar", "next_prayer_time": "15:12"}),
        );
        assert_eq!(result, Ok(json!("persisted")));
        assert_eq!(host.native().get_string("next_prayer_name").as_deref(), Some("Ashar"));
        assert_eq!(host.services().start_requests(), vec![None]);
    }

    #[test]
    fn persist_rejects_non_strings_and_schema_clashes() {
        let host = host();
        let err = call(&host, ALARM_CHANNEL, "persistPrayerTimes", json!({"a": 1})).unwrap_err();
        assert_eq!(err.code(), Some(PERSIST_ERR));

        let err = call(
            &host,
            ALARM_CHANNEL,
            "persistPrayerTimes",
            json!({(keys::WATCHDOG_INTERVAL_MINUTES): "5"}),
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(PERSIST_ERR));
        assert!(host.services().start_requests().is_empty());
    }

    #[test]
    fn cleaner_round_trip() {
        let host = host();
        call(&host, ALARM_CHANNEL, "scheduleNotificationCleaner", json!({})).unwrap();
        let alarm = host.services().alarm(CLEANER_REQUEST_CODE).unwrap();
        assert_eq!(alarm.trigger_ms, host.now_ms() + 10 * 60_000);

        assert_eq!(
            call(&host, ALARM_CHANNEL, "cancelNotificationCleaner", Value::Null),
            Ok(json!("Cleaner cancelled"))
        );
        assert!(host.services().alarm(CLEANER_REQUEST_CODE).is_none());
    }

    #[test]
    fn oversized_intervals_never_break_the_schedule() {
        let host = host();
        let err = call(
            &host,
            ALARM_CHANNEL,
            "setWatchdogInterval",
            json!({"minutes": i64::MAX}),
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(WATCHDOG_ERR));
        assert!(!host.native().contains(keys::WATCHDOG_INTERVAL_MINUTES));

        let report = host.watchdog().tick(TickSource::Alarm);
        assert_eq!(report.next_alarm_at_ms, Some(host.now_ms() + 60_000));

        call(
            &host,
            ALARM_CHANNEL,
            "scheduleNotificationCleaner",
            json!({"minutes": i64::MAX}),
        )
        .unwrap();
        let alarm = host.services().alarm(CLEANER_REQUEST_CODE).unwrap();
        assert_eq!(alarm.trigger_ms, host.now_ms() + MAX_INTERVAL_MINUTES * 60_000);
    }

    #[test]
    fn out_of_range_notification_id_reads_as_zero() {
        let host = host();
        call(
            &host,
            ALARM_CHANNEL,
            "setExactAlarm",
            json!({"time": 5_000, "notificationId": 4_294_967_297_i64}),
        )
        .unwrap();
        assert!(host.services().alarm(1).is_none());
        assert!(host.services().alarm(0).is_some());

        call(&host, ALARM_CHANNEL, "setExactAlarm", json!({"time": 6_000, "notificationId": 1})).unwrap();
        call(&host, ALARM_CHANNEL, "cancelAlarm", json!({"notificationId": 4_294_967_297_i64})).unwrap();
        assert!(host.services().alarm(1).is_some());
        assert!(host.services().alarm(0).is_none());
    }

    #[test]
    fn missing_audio_resource_is_audio_error() {
        let host = host();
        let err = call(&host, AUDIO_CHANNEL, "playRingtone", json!({"res": "no_such_sound"})).unwrap_err();
        assert_eq!(err.code(), Some(AUDIO_ERROR));

        assert_eq!(call(&host, AUDIO_CHANNEL, "playRingtone", json!({})), Ok(json!(true)));
        assert_eq!(call(&host, AUDIO_CHANNEL, "playCountdownTick", json!({})), Ok(json!(true)));
        assert_eq!(call(&host, AUDIO_CHANNEL, "stopRingtone", Value::Null), Ok(json!(true)));
        assert!(host.services().active_players().is_empty());
    }

    #[test]
    fn health_methods() {
        let host = host();
        assert_eq!(call(&host, HEALTH_CHANNEL, "getLastHeartbeat", Value::Null), Ok(json!(0)));
        let ts = call(&host, HEALTH_CHANNEL, "reportHeartbeat", Value::Null).unwrap();
        assert_eq!(ts, json!(host.now_ms()));
        assert_eq!(call(&host, HEALTH_CHANNEL, "getLastHeartbeat", Value::Null), Ok(ts));
        assert_eq!(
            call(&host, HEALTH_CHANNEL, "isBootReceiverTriggeredSinceBoot", Value::Null),
            Ok(json!(false))
        );

        host.services().set_settings_fails(true);
        let err = call(&host, HEALTH_CHANNEL, "openAppSettings", Value::Null).unwrap_err();
        assert_eq!(err.code(), Some(ACTIVITY_ERR));
    }

    #[test]
    fn web_calls() {
        let host = host();
        assert_eq!(
            call(&host, WEB_CHANNEL, "injectLocation", json!({"lat": 1.0, "lon": 2.0})),
            Ok(json!(true))
        );
        assert!(host.services().scripts().is_empty());

        call(&host, WEB_CHANNEL, "openQiblaWeb", json!({})).unwrap();
        call(&host, WEB_CHANNEL, "injectLocation", json!({"lat": 1.0, "lon": 2.0})).unwrap();
        assert_eq!(host.services().scripts().len(), 1);
    }

    #[test]
    fn widget_update_completes_waiting_refresh() {
        let host = host();
        let pending = host.refresh_slot().arm();
        assert_eq!(
            call(&host, WIDGET_UPDATE_CHANNEL, "updateFailed", json!("offline")),
            Ok(Value::Null)
        );
        assert_eq!(
            pending.wait(Duration::from_millis(50)),
            Ok(RefreshStatus::Failed(Some("offline".into())))
        );
    }

    #[test]
    fn unknown_methods_and_channels() {
        let host = host();
        assert_eq!(call(&host, HEALTH_CHANNEL, "selfDestruct", Value::Null), Err(BridgeError::NotImplemented));
        assert_eq!(call(&host, "other/channel", "anything", Value::Null), Err(BridgeError::NotImplemented));
        assert_eq!(BridgeError::NotImplemented.code(), None);
    }
}
