// Service traits standing in for the platform. Everything the core asks of
// the OS goes through one of these, so the core can run against the
// in-memory platform in tests and the simulator.
use anyhow::Result;

use crate::alarm::{ActionId, PendingAction};
use crate::audio::{AudioError, AudioSource, PlaybackMode, PlayerHandle};
use crate::clock::Clock;
use crate::jobs::JobRequest;
use crate::notify::Notification;
use crate::render::widget::{WidgetId, WidgetProvider, WidgetView};
use crate::reply::Replier;
use crate::web::WebViewHandle;

/// Wall-clock timer service.
pub trait AlarmService: Send + Sync {
    /// Whether exact delivery is currently permitted.
    fn can_schedule_exact(&self) -> bool;

    fn set_exact_and_allow_while_idle(&self, trigger_ms: i64, action: &PendingAction) -> Result<()>;

    fn set_and_allow_while_idle(&self, trigger_ms: i64, action: &PendingAction) -> Result<()>;

    fn set_repeating(&self, trigger_ms: i64, interval_ms: i64, action: &PendingAction) -> Result<()>;

    /// Returns whether something was armed under `id`.
    fn cancel(&self, id: ActionId) -> Result<bool>;
}

/// Constraint-aware background job system.
pub trait JobService: Send + Sync {
    /// Replaces any work already registered under `name`.
    fn enqueue_unique(&self, name: &str, request: JobRequest) -> Result<()>;

    fn enqueue(&self, request: JobRequest) -> Result<()>;

    /// Returns whether something was registered under `name`.
    fn cancel_unique(&self, name: &str) -> Result<bool>;
}

/// The long-running foreground presence.
pub trait ForegroundService: Send + Sync {
    /// Starting an already running service is a no-op on the platform side.
    fn start_foreground_service(&self, action: Option<&str>) -> Result<()>;

    fn stop_foreground_service(&self) -> Result<()>;
}

pub trait NotificationService: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;

    fn cancel_all(&self) -> Result<()>;
}

pub trait AudioService: Send + Sync {
    fn play(&self, source: &AudioSource, mode: PlaybackMode) -> Result<PlayerHandle, AudioError>;

    fn stop(&self, player: PlayerHandle);
}

pub trait WebViewService: Send + Sync {
    fn open(&self, url: &str) -> Result<WebViewHandle>;

    fn evaluate_javascript(&self, view: WebViewHandle, script: &str) -> Result<()>;

    fn close(&self, view: WebViewHandle);
}

pub trait SettingsService: Send + Sync {
    fn open_app_settings(&self) -> Result<()>;
}

pub trait WidgetHostService: Send + Sync {
    fn widget_ids(&self, provider: WidgetProvider) -> Vec<WidgetId>;

    /// Minimum width reported by the launcher, in dp.
    fn widget_min_width(&self, id: WidgetId) -> Result<u32>;

    fn update_widget(&self, id: WidgetId, view: &WidgetView) -> Result<()>;
}

/// Headless instance of the application used to refresh cached data.
pub trait BackgroundEngine: Send + Sync {
    /// Starts `entrypoint`; `ready` is answered once initialization finished,
    /// `false` if it failed.
    fn launch(&self, entrypoint: &str, ready: Replier<bool>) -> Result<()>;

    fn destroy(&self);
}

/// Combined service provider for dependency injection
pub trait ServiceProvider:
    AlarmService
    + JobService
    + ForegroundService
    + NotificationService
    + AudioService
    + WebViewService
    + SettingsService
    + WidgetHostService
    + BackgroundEngine
    + Clock
{
}

impl<T> ServiceProvider for T where
    T: AlarmService
        + JobService
        + ForegroundService
        + NotificationService
        + AudioService
        + WebViewService
        + SettingsService
        + WidgetHostService
        + BackgroundEngine
        + Clock
{
}
