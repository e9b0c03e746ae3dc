//! OS broadcasts and lifecycle callbacks, delivered as typed messages.

use log::{debug, info, warn};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use crate::alarm::PendingAction;
use crate::jobs::{retry_delay, JobOutcome, JobRequest, JobScheduler, WIDGET_PERIODIC_WORK};
use crate::refresh;
use crate::render::widget;
use crate::services::ServiceProvider;
use crate::host::Host;
use crate::web::WebViewHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    BootCompleted,
    AlarmFired(PendingAction),
    WatchdogFired,
    CleanerFired,
    /// The persistent panel was swiped away.
    NotificationDeleted,
    /// A launcher or the daily alarm asked for a redraw.
    WidgetUpdateRequested,
    /// Run the background refresh now instead of waiting for the period.
    WidgetRefresh,
    WidgetsEnabled,
    WidgetsDisabled,
    TaskRemoved,
    StopAudio,
    ServiceStarted { action: Option<String> },
    ServiceDestroyed,
    WebPageFinished(WebViewHandle),
    JobDue { request: JobRequest, attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Handled,
    Job {
        outcome: JobOutcome,
        /// When the job system should run it again; `None` means done.
        retry_in: Option<Duration>,
    },
}

pub fn signal_channel() -> (Sender<Signal>, Receiver<Signal>) {
    mpsc::channel()
}

pub fn dispatch<S: ServiceProvider>(host: &Host<S>, signal: Signal) -> SignalOutcome {
    debug!("Signal {:?}", signal);
    match signal {
        Signal::BootCompleted => host.on_boot(),
        Signal::AlarmFired(action) => {
            host.on_alarm(&action);
        }
        Signal::WatchdogFired => {
            host.on_alarm(&PendingAction::watchdog());
        }
        Signal::CleanerFired => {
            host.on_alarm(&PendingAction::cleaner());
        }
        Signal::NotificationDeleted => host.presence().on_notification_deleted(),
        Signal::WidgetUpdateRequested => {
            let summary = host.refresh_widgets();
            debug!("Widgets rendered: {:?}", summary);
        }
        Signal::WidgetRefresh => {
            if let Err(e) = refresh::enqueue_refresh_now(host.services()) {
                warn!("Failed to enqueue widget refresh: {:#}", e);
            }
        }
        Signal::WidgetsEnabled => {
            if let Err(e) = refresh::schedule_periodic_refresh(host.services()) {
                warn!("Failed to schedule periodic widget refresh: {:#}", e);
            }
            widget::schedule_daily_update(host.services(), host.now_ms(), host.tz());
            host.update_widgets();
        }
        Signal::WidgetsDisabled => {
            widget::cancel_daily_update(host.services());
            JobScheduler::new(host.services()).cancel_unique(WIDGET_PERIODIC_WORK);
            info!("Widget schedules removed");
        }
        Signal::TaskRemoved => host.presence().on_task_removed(),
        Signal::StopAudio => host.ringtone().stop(host.services()),
        Signal::ServiceStarted { action } => {
            host.presence().on_start_command(action.as_deref());
        }
        Signal::ServiceDestroyed => host.presence().on_destroy(),
        Signal::WebPageFinished(view) => host.qibla().on_page_finished(host.services(), view),
        Signal::JobDue { request, attempt } => {
            let outcome = host.run_job(&request);
            let retry_in = retry_delay(&request, attempt, outcome);
            if outcome == JobOutcome::Retry && retry_in.is_none() {
                warn!("{:?} job gave up after {} attempts", request.kind(), attempt);
            }
            return SignalOutcome::Job { outcome, retry_in };
        }
    }
    SignalOutcome::Handled
}

/// Handles signals until every sender is gone. Returns how many were handled.
pub fn run_signal_loop<S: ServiceProvider>(host: &Host<S>, signals: Receiver<Signal>) -> usize {
    let mut handled = 0;
    for signal in signals {
        dispatch(host, signal);
        handled += 1;
    }
    info!("Signal loop finished after {} signals", handled);
    handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{PrayerAlarm, WATCHDOG_REQUEST_CODE, WIDGET_UPDATE_REQUEST_CODE};
    use crate::jobs::{JobKind, SERVICE_RESTART_WORK, WATCHDOG_RETRY_WORK};
    use crate::memory::{EngineMode, MemoryPlatform};
    use crate::prefs::{keys, MemoryPrefs, PreferenceStore};
    use crate::render::widget::{WidgetProvider, WidgetView};
    use std::sync::Arc;
    use std::thread;

    fn host() -> Host<MemoryPlatform> {
        Host::new(Arc::new(MemoryPlatform::new()), MemoryPrefs::shared(), MemoryPrefs::shared())
            .with_probe_timeout(Duration::from_millis(20))
            .with_refresh_timeouts(Duration::from_millis(50), Duration::from_millis(50))
    }

    #[test]
    fn boot_signal_over_channel() {
        let host = host();
        let (tx, rx) = signal_channel();
        let sender = thread::spawn(move || {
            tx.send(Signal::BootCompleted).unwrap();
        });
        sender.join().unwrap();

        assert_eq!(run_signal_loop(&host, rx), 1);
        assert_eq!(host.native().get_long(keys::BOOT_RECEIVED_TS, 0), host.now_ms());
        assert!(host.services().alarm(WATCHDOG_REQUEST_CODE).is_some());
        assert!(host.services().alarm(WIDGET_UPDATE_REQUEST_CODE).is_some());
        assert!(host.services().unique_jobs().contains_key(SERVICE_RESTART_WORK));
    }

    #[test]
    fn two_watchdog_alarms_leave_one_retry_job() {
        let host = host();
        dispatch(&host, Signal::WatchdogFired);
        dispatch(&host, Signal::WatchdogFired);

        let jobs = host.services().unique_jobs();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.contains_key(WATCHDOG_RETRY_WORK));
        assert_eq!(host.services().start_requests().len(), 2);
    }

    #[test]
    fn prayer_alarm_then_stop_audio() {
        let host = host();
        let alarm = PrayerAlarm {
            title: "Maghrib".into(),
            body: "Waktunya sholat maghrib".into(),
            notification_id: 21,
            auto_play_prayer: Some("Maghrib".into()),
            auto_play_tick: false,
        };
        dispatch(&host, Signal::AlarmFired(PendingAction::prayer(alarm)));
        assert!(host.ringtone().is_playing());
        assert_eq!(host.services().notifications()[0].id, 21);

        dispatch(&host, Signal::StopAudio);
        assert!(!host.ringtone().is_playing());
        assert!(host.services().active_players().is_empty());
    }

    #[test]
    fn widget_lifecycle() {
        let host = host();
        host.services().add_widget(WidgetProvider::Prayer, 3, 250);

        dispatch(&host, Signal::WidgetsEnabled);
        assert!(host.services().unique_jobs().contains_key(WIDGET_PERIODIC_WORK));
        assert!(host.services().alarm(WIDGET_UPDATE_REQUEST_CODE).is_some());
        assert!(matches!(host.services().widget_view(3), Some(WidgetView::Prayer { .. })));

        dispatch(&host, Signal::WidgetsDisabled);
        assert!(host.services().unique_jobs().is_empty());
        assert!(host.services().alarm(WIDGET_UPDATE_REQUEST_CODE).is_none());
    }

    #[test]
    fn job_due_reports_retry_delay() {
        let host = host();
        host.services().set_engine_mode(EngineMode::Silent);
        dispatch(&host, Signal::WidgetRefresh);
        let request = host.services().one_shots().remove(0);
        assert_eq!(request.kind(), JobKind::WidgetRefresh);

        match dispatch(&host, Signal::JobDue { request, attempt: 1 }) {
            SignalOutcome::Job { outcome, retry_in } => {
                assert_eq!(outcome, JobOutcome::Retry);
                assert_eq!(retry_in, Some(refresh::REFRESH_BACKOFF_BASE));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn panel_dismissal_enqueues_restart() {
        let host = host();
        dispatch(&host, Signal::ServiceStarted { action: None });
        dispatch(&host, Signal::NotificationDeleted);
        assert_eq!(host.services().one_shots().len(), 1);

        dispatch(&host, Signal::ServiceDestroyed);
        assert!(host.services().alarm(WATCHDOG_REQUEST_CODE).is_none());
    }
}
