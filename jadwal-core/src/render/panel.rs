use chrono::TimeZone;
use log::warn;

use super::time::PLACEHOLDER;
use super::widget::{render_prayer_widget, WidgetLayout, WidgetView, UNKNOWN_PLACE};
use crate::notify::{Notification, Priority, FOREGROUND_CHANNEL_ID, FOREGROUND_NOTIFICATION_ID};
use crate::prefs::PreferenceStore;

pub const STATIC_TITLE: &str = "Prayer Time Service";
pub const STATIC_TEXT: &str = "Monitoring prayer times in background";

fn panel(title: String, text: String) -> Notification {
    Notification {
        id: FOREGROUND_NOTIFICATION_ID,
        channel: FOREGROUND_CHANNEL_ID.to_string(),
        title,
        text,
        priority: Priority::Low,
        ongoing: true,
        auto_cancel: false,
        actions: Vec::new(),
        delete_signal: true,
    }
}

pub fn static_panel() -> Notification {
    panel(STATIC_TITLE.to_string(), STATIC_TEXT.to_string())
}

/// Persistent panel of the presence service, e.g. "Ashar 15:12" over the
/// place name. Degrades to the static text when nothing useful is cached.
pub fn render_panel<Tz: TimeZone>(
    app: &dyn PreferenceStore,
    native: &dyn PreferenceStore,
    now_ms: i64,
    tz: &Tz,
) -> Notification {
    let view = match render_prayer_widget(app, native, WidgetLayout::Full, now_ms, tz) {
        Ok(view) => view,
        Err(e) => {
            warn!("Panel render failed, using static text: {:#}", e);
            return static_panel();
        }
    };

    match view {
        WidgetView::Prayer {
            place,
            next_prayer,
            next_time,
            ..
        } if next_prayer != PLACEHOLDER && next_time != PLACEHOLDER => {
            let text = if place == UNKNOWN_PLACE {
                STATIC_TEXT.to_string()
            } else {
                place
            };
            panel(format!("{} {}", next_prayer, next_time), text)
        }
        _ => static_panel(),
    }
}
