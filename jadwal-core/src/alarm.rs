use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::duration_ms;
use crate::services::AlarmService;

/// Identity of a pending alarm action. Registering an action with an id that
/// is already armed replaces the earlier registration.
pub type ActionId = i32;

pub const WATCHDOG_REQUEST_CODE: ActionId = 4201;
pub const WIDGET_UPDATE_REQUEST_CODE: ActionId = 4310;
pub const CLEANER_REQUEST_CODE: ActionId = 5210;

/// Payload carried by a prayer-time alarm and handed back when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrayerAlarm {
    pub title: String,
    pub body: String,
    pub notification_id: i32,
    pub auto_play_prayer: Option<String>,
    pub auto_play_tick: bool,
}

impl PrayerAlarm {
    pub const DEFAULT_TITLE: &'static str = "Prayer Time";
    pub const DEFAULT_BODY: &'static str = "It's time for prayer";

    /// True when firing this alarm starts audio, which keeps its
    /// notification on screen until the user stops it.
    pub fn plays_audio(&self) -> bool {
        self.auto_play_prayer
            .as_deref()
            .map(|p| !p.is_empty())
            .unwrap_or(false)
            || self.auto_play_tick
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Watchdog,
    NotificationCleaner,
    WidgetDailyUpdate,
    Prayer(PrayerAlarm),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: ActionId,
    pub kind: ActionKind,
}

impl PendingAction {
    pub fn watchdog() -> Self {
        Self {
            id: WATCHDOG_REQUEST_CODE,
            kind: ActionKind::Watchdog,
        }
    }

    pub fn cleaner() -> Self {
        Self {
            id: CLEANER_REQUEST_CODE,
            kind: ActionKind::NotificationCleaner,
        }
    }

    pub fn widget_update() -> Self {
        Self {
            id: WIDGET_UPDATE_REQUEST_CODE,
            kind: ActionKind::WidgetDailyUpdate,
        }
    }

    pub fn prayer(alarm: PrayerAlarm) -> Self {
        Self {
            id: alarm.notification_id,
            kind: ActionKind::Prayer(alarm),
        }
    }
}

/// What the platform actually agreed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Exact,
    /// Exact delivery was asked for but not permitted; the alarm may fire late.
    Inexact,
    Failed,
}

/// Best-effort wrapper over the platform timer. Nothing here returns an
/// error: a refused alarm is logged and reported as [`Delivery::Failed`].
pub struct AlarmScheduler<'a, A: AlarmService + ?Sized> {
    alarms: &'a A,
}

impl<'a, A: AlarmService + ?Sized> AlarmScheduler<'a, A> {
    pub fn new(alarms: &'a A) -> Self {
        Self { alarms }
    }

    pub fn schedule_at(&self, trigger_ms: i64, action: &PendingAction, exact: bool) -> Delivery {
        let result = if exact && self.alarms.can_schedule_exact() {
            self.alarms
                .set_exact_and_allow_while_idle(trigger_ms, action)
                .map(|_| Delivery::Exact)
        } else {
            if exact {
                debug!("Exact alarms not permitted, falling back to inexact for id={}", action.id);
            }
            self.alarms
                .set_and_allow_while_idle(trigger_ms, action)
                .map(|_| Delivery::Inexact)
        };

        match result {
            Ok(delivery) => {
                debug!("Alarm id={} set for {} ({:?})", action.id, trigger_ms, delivery);
                delivery
            }
            Err(e) => {
                error!("Failed to set alarm id={}: {}", action.id, e);
                Delivery::Failed
            }
        }
    }

    /// Arms an exact first shot, then asks for a repeating registration as a
    /// regular fallback tick. Some vendors refuse repeating alarms; the
    /// one-shot still stands in that case.
    pub fn schedule_repeating(
        &self,
        first_trigger_ms: i64,
        interval: Duration,
        action: &PendingAction,
    ) -> Delivery {
        let delivery = self.schedule_at(first_trigger_ms, action, true);

        let interval_ms = duration_ms(interval);
        if let Err(e) = self
            .alarms
            .set_repeating(first_trigger_ms, interval_ms, action)
        {
            warn!(
                "Repeating alarm refused for id={} ({}), relying on one-shots",
                action.id, e
            );
        }

        delivery
    }

    /// Removing an action that was never armed is not an error.
    pub fn cancel(&self, id: ActionId) {
        match self.alarms.cancel(id) {
            Ok(true) => info!("Alarm cancelled for id={}", id),
            Ok(false) => debug!("No alarm armed for id={}", id),
            Err(e) => error!("Failed to cancel alarm id={}: {}", id, e),
        }
    }
}
