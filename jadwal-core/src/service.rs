use anyhow::Result;
use chrono::TimeZone;
use log::{debug, info, warn};
use std::time::Duration;

use crate::clock::Clock;
use crate::jobs::{JobKind, JobScheduler};
use crate::prefs::PreferenceStore;
use crate::probe::ProbeEndpoint;
use crate::render::panel::render_panel;
use crate::services::{AlarmService, ForegroundService, JobService, NotificationService};
use crate::watchdog::{Watchdog, WATCHDOG_RESTART_ACTION};

/// Delay before the one-shot restart job after the task or panel goes away.
pub const RESTART_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Ask the OS to recreate the service after it is killed.
    Sticky,
}

/// Lifecycle handlers of the long-running presence service. Each handler
/// logs its failures and returns normally.
pub struct PresenceService<'a, S: ?Sized, Tz> {
    services: &'a S,
    native: &'a dyn PreferenceStore,
    app: &'a dyn PreferenceStore,
    endpoint: &'a ProbeEndpoint,
    tz: &'a Tz,
}

impl<'a, S, Tz> PresenceService<'a, S, Tz>
where
    S: AlarmService + JobService + ForegroundService + NotificationService + Clock + ?Sized,
    Tz: TimeZone,
{
    pub fn new(
        services: &'a S,
        native: &'a dyn PreferenceStore,
        app: &'a dyn PreferenceStore,
        endpoint: &'a ProbeEndpoint,
        tz: &'a Tz,
    ) -> Self {
        Self {
            services,
            native,
            app,
            endpoint,
            tz,
        }
    }

    fn show_panel(&self) {
        let panel = render_panel(self.app, self.native, self.services.now_ms(), self.tz);
        if let Err(e) = self.services.notify(&panel) {
            warn!("Failed to show presence panel: {}", e);
        }
    }

    pub fn on_create(&self) {
        self.show_panel();
    }

    pub fn on_start_command(&self, action: Option<&str>) -> StartMode {
        if action == Some(WATCHDOG_RESTART_ACTION) {
            debug!("Started by watchdog");
        }
        self.show_panel();

        let watchdog = Watchdog::new(self.services, self.native, self.endpoint);
        match watchdog.schedule() {
            Ok(Some(next)) => debug!("Next watchdog tick at {}", next),
            Ok(None) => warn!("Watchdog alarm refused, relying on periodic job"),
            Err(e) => warn!("Failed to schedule watchdog: {:#}", e),
        }
        StartMode::Sticky
    }

    /// The user swiped the app away. A short one-shot job brings the
    /// service back; if the job system refuses, start directly.
    pub fn on_task_removed(&self) {
        self.restart_later("task removed");
    }

    /// The panel was dismissed; same recovery as a removed task.
    pub fn on_notification_deleted(&self) {
        self.restart_later("panel dismissed");
    }

    fn restart_later(&self, cause: &str) {
        match JobScheduler::new(self.services).schedule_one_shot(JobKind::ServiceRestart, RESTART_DELAY, None) {
            Ok(()) => info!("Enqueued restart after {}", cause),
            Err(e) => {
                warn!("Failed to enqueue restart worker after {}: {}", cause, e);
                if let Err(e) = self.services.start_foreground_service(None) {
                    warn!("Fallback start failed: {}", e);
                }
            }
        }
    }

    pub fn on_destroy(&self) {
        Watchdog::new(self.services, self.native, self.endpoint).cancel();
    }

    pub fn start(&self) -> Result<()> {
        self.services.start_foreground_service(None)
    }

    pub fn stop(&self) -> Result<()> {
        self.services.stop_foreground_service()
    }
}
