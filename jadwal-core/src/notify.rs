use anyhow::Result;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::alarm::{AlarmScheduler, PendingAction, PrayerAlarm, CLEANER_REQUEST_CODE};
use crate::audio::{adzan_resource, log_audio_failure, AudioSource, Ringtone, TICK_RESOURCE};
use crate::clock::{later_by, Clock};
use crate::config::{clamp_minutes, minutes, CleanerConfig};
use crate::prefs::PreferenceStore;
use crate::services::{AlarmService, AudioService, ForegroundService, NotificationService};

pub const PRAYER_CHANNEL_ID: &str = "prayer_channel";
pub const FOREGROUND_CHANNEL_ID: &str = "prayer_foreground_service";
pub const FOREGROUND_NOTIFICATION_ID: i32 = 1001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationAction {
    StopAudio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i32,
    pub channel: String,
    pub title: String,
    pub text: String,
    pub priority: Priority,
    pub ongoing: bool,
    pub auto_cancel: bool,
    pub actions: Vec<NotificationAction>,
    /// Dismissing this notification raises the notification-deleted signal.
    pub delete_signal: bool,
}

/// Builds the notification shown when a prayer alarm fires. It stays on
/// screen while its audio plays so the Stop action remains reachable.
pub fn prayer_notification(alarm: &PrayerAlarm) -> Notification {
    Notification {
        id: alarm.notification_id,
        channel: PRAYER_CHANNEL_ID.to_string(),
        title: alarm.title.clone(),
        text: alarm.body.clone(),
        priority: Priority::High,
        ongoing: alarm.plays_audio(),
        auto_cancel: true,
        actions: vec![NotificationAction::StopAudio],
        delete_signal: false,
    }
}

/// Handles a fired prayer alarm: notification first, then audio. Audio
/// failures are logged only; a failed notification skips the audio.
pub fn on_prayer_alarm<S>(
    services: &S,
    app_prefs: &dyn PreferenceStore,
    ringtone: &Ringtone,
    alarm: &PrayerAlarm,
) where
    S: NotificationService + AudioService + ?Sized,
{
    let notification = prayer_notification(alarm);
    if let Err(e) = services.notify(&notification) {
        error!("Failed to show prayer notification {}: {}", alarm.notification_id, e);
        return;
    }
    debug!("Notification shown: {}", alarm.title);

    if let Some(prayer) = alarm.auto_play_prayer.as_deref().filter(|p| !p.is_empty()) {
        let source = AudioSource::Raw(adzan_resource(prayer).to_string());
        match ringtone.play(services, app_prefs, &source) {
            Ok(_) => info!("Started auto-play adzan for {}", prayer),
            Err(e) => warn!("Failed to auto-play adzan for {}: {}", prayer, e),
        }
    }

    if alarm.auto_play_tick {
        log_audio_failure("play tick", ringtone.play_once(services, TICK_RESOURCE));
    }
}

/// Periodically clears every notification and brings the panel back.
pub struct NotificationCleaner<'a, S: ?Sized> {
    services: &'a S,
    prefs: &'a dyn PreferenceStore,
}

impl<'a, S> NotificationCleaner<'a, S>
where
    S: AlarmService + NotificationService + ForegroundService + Clock + ?Sized,
{
    pub fn new(services: &'a S, prefs: &'a dyn PreferenceStore) -> Self {
        Self { services, prefs }
    }

    pub fn schedule(&self, interval_minutes: i64) {
        let interval_minutes = clamp_minutes(interval_minutes);
        let interval = minutes(interval_minutes);
        let first = later_by(self.services.now_ms(), interval);
        AlarmScheduler::new(self.services).schedule_repeating(first, interval, &PendingAction::cleaner());
        info!("Notification cleaner scheduled every {} min", interval_minutes);
    }

    pub fn cancel(&self) {
        AlarmScheduler::new(self.services).cancel(CLEANER_REQUEST_CODE);
    }

    /// Each step is attempted even when an earlier one failed.
    pub fn on_fire(&self) -> Result<()> {
        let cleared = self.services.cancel_all();
        match &cleared {
            Ok(()) => info!("Cancelled all notifications on cleaner tick"),
            Err(e) => warn!("Failed to cancel notifications: {}", e),
        }

        match self.services.start_foreground_service(None) {
            Ok(()) => info!("Restarted presence service after cleaner"),
            Err(e) => warn!("Failed to restart service: {}", e),
        }

        self.schedule(CleanerConfig::load(self.prefs).interval_minutes);
        cleared
    }
}
