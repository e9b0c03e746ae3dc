use anyhow::Result;
use chrono::{FixedOffset, Local, Offset};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::alarm::{ActionKind, AlarmScheduler, PendingAction};
use crate::audio::Ringtone;
use crate::clock::Clock;
use crate::jobs::{JobKind, JobOutcome, JobRequest};
use crate::notify::{on_prayer_alarm, NotificationCleaner};
use crate::prefs::{keys, PreferenceStore, SharedPrefs};
use crate::probe::{ProbeEndpoint, DEFAULT_PROBE_TIMEOUT};
use crate::refresh::{self, CompletionSlot, COMPLETION_TIMEOUT, INIT_TIMEOUT};
use crate::render::widget::{self, update_all_widgets, RenderSummary};
use crate::service::PresenceService;
use crate::services::ServiceProvider;
use crate::watchdog::{TickReport, TickSource, Watchdog};
use crate::web::QiblaWeb;

/// Everything the native layer keeps for the lifetime of the process: the
/// platform services, both preference stores and the few pieces of state
/// that outlive a single callback.
pub struct Host<S> {
    services: Arc<S>,
    native: SharedPrefs,
    app: SharedPrefs,
    endpoint: ProbeEndpoint,
    ringtone: Ringtone,
    qibla: QiblaWeb,
    refresh: CompletionSlot,
    probe_timeout: Duration,
    refresh_timeouts: (Duration, Duration),
    tz: FixedOffset,
}

impl<S: ServiceProvider> Host<S> {
    pub fn new(services: Arc<S>, native: SharedPrefs, app: SharedPrefs) -> Self {
        Self {
            services,
            native,
            app,
            endpoint: ProbeEndpoint::new(),
            ringtone: Ringtone::new(),
            qibla: QiblaWeb::new(),
            refresh: CompletionSlot::new(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            refresh_timeouts: (INIT_TIMEOUT, COMPLETION_TIMEOUT),
            tz: Local::now().offset().fix(),
        }
    }

    pub fn with_tz(mut self, tz: FixedOffset) -> Self {
        self.tz = tz;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_refresh_timeouts(mut self, init: Duration, completion: Duration) -> Self {
        self.refresh_timeouts = (init, completion);
        self
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    pub fn native(&self) -> &dyn PreferenceStore {
        &*self.native
    }

    pub fn app(&self) -> &dyn PreferenceStore {
        &*self.app
    }

    pub fn endpoint(&self) -> &ProbeEndpoint {
        &self.endpoint
    }

    pub fn ringtone(&self) -> &Ringtone {
        &self.ringtone
    }

    pub fn qibla(&self) -> &QiblaWeb {
        &self.qibla
    }

    pub fn refresh_slot(&self) -> &CompletionSlot {
        &self.refresh
    }

    pub fn tz(&self) -> &FixedOffset {
        &self.tz
    }

    pub fn now_ms(&self) -> i64 {
        self.services.now_ms()
    }

    pub fn alarms(&self) -> AlarmScheduler<'_, S> {
        AlarmScheduler::new(self.services())
    }

    pub fn watchdog(&self) -> Watchdog<'_, S> {
        Watchdog::new(self.services(), self.native(), &self.endpoint).with_probe_timeout(self.probe_timeout)
    }

    pub fn presence(&self) -> PresenceService<'_, S, FixedOffset> {
        PresenceService::new(self.services(), self.native(), self.app(), &self.endpoint, &self.tz)
    }

    pub fn cleaner(&self) -> NotificationCleaner<'_, S> {
        NotificationCleaner::new(self.services(), self.native())
    }

    pub fn report_heartbeat(&self) -> Result<i64> {
        let ts = self.now_ms();
        self.native.put_long(keys::LAST_HEARTBEAT_MS, ts)?;
        debug!("Heartbeat stored at {}", ts);
        Ok(ts)
    }

    pub fn last_heartbeat_ms(&self) -> i64 {
        self.native.get_long(keys::LAST_HEARTBEAT_MS, 0)
    }

    pub fn boot_received_ts(&self) -> i64 {
        self.native.get_long(keys::BOOT_RECEIVED_TS, 0)
    }

    /// Whether the boot signal has been handled since the device last booted.
    pub fn is_boot_receiver_triggered_since_boot(&self) -> bool {
        let boot_ts = self.boot_received_ts();
        let boot_start = self.now_ms() - self.services.uptime_ms();
        boot_ts != 0 && boot_ts >= boot_start
    }

    pub fn on_boot(&self) {
        let now = self.now_ms();
        if let Err(e) = self.native.put_long(keys::BOOT_RECEIVED_TS, now) {
            warn!("Failed to record boot time: {}", e);
        }
        if let Err(e) = self.watchdog().schedule() {
            warn!("Failed to schedule watchdog on boot: {:#}", e);
        }
        widget::schedule_daily_update(self.services(), now, &self.tz);
        info!("Boot handled at {}", now);
    }

    pub fn update_widgets(&self) -> RenderSummary {
        update_all_widgets(self.services(), self.app(), self.native(), self.now_ms(), &self.tz)
    }

    /// Re-render, then make sure tomorrow's update is armed.
    pub fn refresh_widgets(&self) -> RenderSummary {
        let summary = self.update_widgets();
        widget::schedule_daily_update(self.services(), self.now_ms(), &self.tz);
        summary
    }

    pub fn on_alarm(&self, action: &PendingAction) -> Option<TickReport> {
        debug!("Alarm fired id={}", action.id);
        match &action.kind {
            ActionKind::Watchdog => return Some(self.watchdog().tick(TickSource::Alarm)),
            ActionKind::NotificationCleaner => {
                if let Err(e) = self.cleaner().on_fire() {
                    warn!("Notification cleaner tick incomplete: {}", e);
                }
            }
            ActionKind::WidgetDailyUpdate => {
                self.refresh_widgets();
            }
            ActionKind::Prayer(alarm) => {
                on_prayer_alarm(self.services(), self.app(), &self.ringtone, alarm);
            }
        }
        None
    }

    pub fn run_job(&self, request: &JobRequest) -> JobOutcome {
        match (request.kind(), request) {
            (JobKind::ServiceRestart, JobRequest::Periodic { .. }) => {
                self.watchdog().tick(TickSource::PeriodicJob).outcome
            }
            (JobKind::ServiceRestart, JobRequest::OneShot { .. }) => {
                self.watchdog().tick(TickSource::RetryJob).outcome
            }
            (JobKind::WidgetRefresh, _) => self.run_widget_refresh(),
        }
    }

    pub fn run_widget_refresh(&self) -> JobOutcome {
        let (init, completion) = self.refresh_timeouts;
        let outcome = refresh::run_refresh(self.services(), &self.refresh, init, completion);
        if outcome == JobOutcome::Success {
            self.update_widgets();
        }
        outcome
    }
}
