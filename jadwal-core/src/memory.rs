//! In-process platform. Records every request the core makes so tests and
//! the command line simulator can inspect what would have reached the OS,
//! and exposes switches for the refusals real devices produce.

use anyhow::{anyhow, bail, Result};
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::alarm::{ActionId, PendingAction};
use crate::audio::{AudioError, AudioSource, PlaybackMode, PlayerHandle, ADZAN_RESOURCE, ADZAN_SUBUH_RESOURCE, DEFAULT_ADZAN_ASSET, TICK_RESOURCE};
use crate::clock::{Clock, ManualClock};
use crate::jobs::JobRequest;
use crate::notify::Notification;
use crate::render::widget::{WidgetId, WidgetProvider, WidgetView};
use crate::reply::Replier;
use crate::services::{
    AlarmService, AudioService, BackgroundEngine, ForegroundService, JobService,
    NotificationService, SettingsService, WebViewService, WidgetHostService,
};
use crate::web::WebViewHandle;

/// 2024-03-11 06:00 UTC, one hour after boot.
pub const DEFAULT_NOW_MS: i64 = 1_710_136_800_000;
pub const DEFAULT_UPTIME_MS: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlarmMode {
    ExactWhileIdle,
    InexactWhileIdle,
    Repeating { interval_ms: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmRegistration {
    pub trigger_ms: i64,
    pub mode: AlarmMode,
    pub action: PendingAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub handle: PlayerHandle,
    pub source: AudioSource,
    pub mode: PlaybackMode,
}

/// How the headless engine behaves on the next launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineMode {
    #[default]
    Ready,
    /// Never answers the ready callback.
    Silent,
    InitFails,
    LaunchFails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WidgetSlot {
    provider: WidgetProvider,
    min_width: u32,
}

/// Scheduling state only; comparing two snapshots tells whether an
/// operation changed what the OS would run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlatformSnapshot {
    pub alarms: BTreeMap<ActionId, AlarmRegistration>,
    pub unique_jobs: BTreeMap<String, JobRequest>,
    pub foreground_running: bool,
}

type LaunchHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct State {
    alarms: BTreeMap<ActionId, AlarmRegistration>,
    unique_jobs: BTreeMap<String, JobRequest>,
    one_shots: Vec<JobRequest>,
    start_requests: Vec<Option<String>>,
    foreground_running: bool,
    notifications: Vec<Notification>,
    cancel_all_count: usize,
    raw_resources: BTreeSet<String>,
    assets: BTreeSet<String>,
    players: BTreeMap<u64, PlayerRecord>,
    played: Vec<PlayerRecord>,
    open_urls: Vec<String>,
    open_views: BTreeSet<u64>,
    scripts: Vec<(WebViewHandle, String)>,
    settings_opened: usize,
    widgets: BTreeMap<WidgetId, WidgetSlot>,
    widget_views: BTreeMap<WidgetId, WidgetView>,
    engine_mode: EngineMode,
    engine_launches: Vec<String>,
    engine_destroys: usize,
    held_ready: Vec<Replier<bool>>,
}

#[derive(Default)]
struct Switches {
    exact_denied: AtomicBool,
    repeating_restricted: AtomicBool,
    alarms_refused: AtomicBool,
    jobs_refused: AtomicBool,
    foreground_start_fails: AtomicBool,
    settings_fail: AtomicBool,
    widget_update_fails: AtomicBool,
}

pub struct MemoryPlatform {
    clock: ManualClock,
    state: Mutex<State>,
    switches: Switches,
    next_handle: AtomicU64,
    launch_hook: Mutex<Option<Arc<LaunchHook>>>,
    notify_calls: AtomicUsize,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::with_clock(DEFAULT_NOW_MS, DEFAULT_UPTIME_MS)
    }

    pub fn with_clock(now_ms: i64, uptime_ms: i64) -> Self {
        let state = State {
            raw_resources: [ADZAN_RESOURCE, ADZAN_SUBUH_RESOURCE, TICK_RESOURCE]
                .into_iter()
                .map(String::from)
                .collect(),
            assets: [DEFAULT_ADZAN_ASSET.to_string()].into_iter().collect(),
            ..State::default()
        };
        Self {
            clock: ManualClock::new(now_ms, uptime_ms),
            state: Mutex::new(state),
            switches: Switches::default(),
            next_handle: AtomicU64::new(1),
            launch_hook: Mutex::new(None),
            notify_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    // Switches

    pub fn set_exact_permitted(&self, permitted: bool) {
        self.switches.exact_denied.store(!permitted, Ordering::SeqCst);
    }

    pub fn set_repeating_restricted(&self, restricted: bool) {
        self.switches
            .repeating_restricted
            .store(restricted, Ordering::SeqCst);
    }

    pub fn set_alarms_refused(&self, refused: bool) {
        self.switches.alarms_refused.store(refused, Ordering::SeqCst);
    }

    pub fn set_jobs_refused(&self, refused: bool) {
        self.switches.jobs_refused.store(refused, Ordering::SeqCst);
    }

    pub fn set_foreground_start_fails(&self, fails: bool) {
        self.switches
            .foreground_start_fails
            .store(fails, Ordering::SeqCst);
    }

    pub fn set_settings_fails(&self, fails: bool) {
        self.switches.settings_fail.store(fails, Ordering::SeqCst);
    }

    pub fn set_widget_update_fails(&self, fails: bool) {
        self.switches
            .widget_update_fails
            .store(fails, Ordering::SeqCst);
    }

    pub fn set_engine_mode(&self, mode: EngineMode) {
        self.state().engine_mode = mode;
    }

    /// Runs `hook` inside every successful launch, after the ready reply.
    pub fn on_engine_launch<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hook: LaunchHook = Box::new(hook);
        *self
            .launch_hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(hook));
    }

    pub fn remove_raw_resource(&self, name: &str) {
        self.state().raw_resources.remove(name);
    }

    pub fn add_widget(&self, provider: WidgetProvider, id: WidgetId, min_width: u32) {
        self.state()
            .widgets
            .insert(id, WidgetSlot { provider, min_width });
    }

    // Inspection

    pub fn alarm(&self, id: ActionId) -> Option<AlarmRegistration> {
        self.state().alarms.get(&id).cloned()
    }

    pub fn alarms(&self) -> Vec<AlarmRegistration> {
        self.state().alarms.values().cloned().collect()
    }

    pub fn unique_jobs(&self) -> BTreeMap<String, JobRequest> {
        self.state().unique_jobs.clone()
    }

    pub fn one_shots(&self) -> Vec<JobRequest> {
        self.state().one_shots.clone()
    }

    pub fn start_requests(&self) -> Vec<Option<String>> {
        self.state().start_requests.clone()
    }

    pub fn foreground_running(&self) -> bool {
        self.state().foreground_running
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state().notifications.clone()
    }

    pub fn notify_calls(&self) -> usize {
        self.notify_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_all_count(&self) -> usize {
        self.state().cancel_all_count
    }

    /// Ringtones that have not been stopped.
    pub fn active_players(&self) -> Vec<PlayerRecord> {
        self.state()
            .players
            .values()
            .filter(|p| matches!(p.mode, PlaybackMode::Ringtone { .. }))
            .cloned()
            .collect()
    }

    /// Every successful playback, in order.
    pub fn played(&self) -> Vec<PlayerRecord> {
        self.state().played.clone()
    }

    pub fn open_urls(&self) -> Vec<String> {
        self.state().open_urls.clone()
    }

    pub fn scripts(&self) -> Vec<(WebViewHandle, String)> {
        self.state().scripts.clone()
    }

    pub fn settings_opened(&self) -> usize {
        self.state().settings_opened
    }

    pub fn widget_view(&self, id: WidgetId) -> Option<WidgetView> {
        self.state().widget_views.get(&id).cloned()
    }

    pub fn engine_launches(&self) -> Vec<String> {
        self.state().engine_launches.clone()
    }

    pub fn engine_destroys(&self) -> usize {
        self.state().engine_destroys
    }

    pub fn snapshot(&self) -> PlatformSnapshot {
        let state = self.state();
        PlatformSnapshot {
            alarms: state.alarms.clone(),
            unique_jobs: state.unique_jobs.clone(),
            foreground_running: state.foreground_running,
        }
    }

    fn register_alarm(&self, trigger_ms: i64, mode: AlarmMode, action: &PendingAction) -> Result<()> {
        if self.switches.alarms_refused.load(Ordering::SeqCst) {
            bail!("alarm manager refused id={}", action.id);
        }
        self.state().alarms.insert(
            action.id,
            AlarmRegistration {
                trigger_ms,
                mode,
                action: action.clone(),
            },
        );
        Ok(())
    }
}

impl Clock for MemoryPlatform {
    fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn uptime_ms(&self) -> i64 {
        self.clock.uptime_ms()
    }
}

impl AlarmService for MemoryPlatform {
    fn can_schedule_exact(&self) -> bool {
        !self.switches.exact_denied.load(Ordering::SeqCst)
    }

    fn set_exact_and_allow_while_idle(&self, trigger_ms: i64, action: &PendingAction) -> Result<()> {
        if !self.can_schedule_exact() {
            bail!("exact alarms not permitted");
        }
        self.register_alarm(trigger_ms, AlarmMode::ExactWhileIdle, action)
    }

    fn set_and_allow_while_idle(&self, trigger_ms: i64, action: &PendingAction) -> Result<()> {
        self.register_alarm(trigger_ms, AlarmMode::InexactWhileIdle, action)
    }

    fn set_repeating(&self, trigger_ms: i64, interval_ms: i64, action: &PendingAction) -> Result<()> {
        if self.switches.repeating_restricted.load(Ordering::SeqCst) {
            bail!("repeating alarms restricted on this device");
        }
        self.register_alarm(trigger_ms, AlarmMode::Repeating { interval_ms }, action)
    }

    fn cancel(&self, id: ActionId) -> Result<bool> {
        Ok(self.state().alarms.remove(&id).is_some())
    }
}

impl JobService for MemoryPlatform {
    fn enqueue_unique(&self, name: &str, request: JobRequest) -> Result<()> {
        if self.switches.jobs_refused.load(Ordering::SeqCst) {
            bail!("job system refused {}", name);
        }
        self.state().unique_jobs.insert(name.to_string(), request);
        Ok(())
    }

    fn enqueue(&self, request: JobRequest) -> Result<()> {
        if self.switches.jobs_refused.load(Ordering::SeqCst) {
            bail!("job system refused one-shot {:?}", request.kind());
        }
        self.state().one_shots.push(request);
        Ok(())
    }

    fn cancel_unique(&self, name: &str) -> Result<bool> {
        Ok(self.state().unique_jobs.remove(name).is_some())
    }
}

impl ForegroundService for MemoryPlatform {
    fn start_foreground_service(&self, action: Option<&str>) -> Result<()> {
        if self.switches.foreground_start_fails.load(Ordering::SeqCst) {
            bail!("foreground service start not allowed from background");
        }
        let mut state = self.state();
        state.start_requests.push(action.map(str::to_string));
        state.foreground_running = true;
        Ok(())
    }

    fn stop_foreground_service(&self) -> Result<()> {
        self.state().foreground_running = false;
        Ok(())
    }
}

impl NotificationService for MemoryPlatform {
    fn notify(&self, notification: &Notification) -> Result<()> {
        self.notify_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.notifications.retain(|n| n.id != notification.id);
        state.notifications.push(notification.clone());
        Ok(())
    }

    fn cancel_all(&self) -> Result<()> {
        let mut state = self.state();
        state.notifications.clear();
        state.cancel_all_count += 1;
        Ok(())
    }
}

impl AudioService for MemoryPlatform {
    fn play(&self, source: &AudioSource, mode: PlaybackMode) -> Result<PlayerHandle, AudioError> {
        let mut state = self.state();
        let known = match source {
            AudioSource::Raw(name) => state.raw_resources.contains(name),
            AudioSource::Asset(path) => state.assets.contains(path),
        };
        if !known {
            let name = match source {
                AudioSource::Raw(name) | AudioSource::Asset(name) => name.clone(),
            };
            return Err(AudioError::NotFound(name));
        }

        let handle = PlayerHandle(self.handle());
        let record = PlayerRecord {
            handle,
            source: source.clone(),
            mode,
        };
        state.played.push(record.clone());
        if mode != PlaybackMode::Once {
            state.players.insert(handle.0, record);
        }
        Ok(handle)
    }

    fn stop(&self, player: PlayerHandle) {
        if self.state().players.remove(&player.0).is_none() {
            debug!("Stop for unknown player {:?}", player);
        }
    }
}

impl WebViewService for MemoryPlatform {
    fn open(&self, url: &str) -> Result<WebViewHandle> {
        let handle = self.handle();
        let mut state = self.state();
        state.open_urls.push(url.to_string());
        state.open_views.insert(handle);
        Ok(WebViewHandle(handle))
    }

    fn evaluate_javascript(&self, view: WebViewHandle, script: &str) -> Result<()> {
        let mut state = self.state();
        if !state.open_views.contains(&view.0) {
            bail!("web view {:?} is not open", view);
        }
        state.scripts.push((view, script.to_string()));
        Ok(())
    }

    fn close(&self, view: WebViewHandle) {
        self.state().open_views.remove(&view.0);
    }
}

impl SettingsService for MemoryPlatform {
    fn open_app_settings(&self) -> Result<()> {
        if self.switches.settings_fail.load(Ordering::SeqCst) {
            bail!("no activity to handle application settings");
        }
        self.state().settings_opened += 1;
        Ok(())
    }
}

impl WidgetHostService for MemoryPlatform {
    fn widget_ids(&self, provider: WidgetProvider) -> Vec<WidgetId> {
        self.state()
            .widgets
            .iter()
            .filter(|(_, slot)| slot.provider == provider)
            .map(|(id, _)| *id)
            .collect()
    }

    fn widget_min_width(&self, id: WidgetId) -> Result<u32> {
        self.state()
            .widgets
            .get(&id)
            .map(|slot| slot.min_width)
            .ok_or_else(|| anyhow!("no widget with id {}", id))
    }

    fn update_widget(&self, id: WidgetId, view: &WidgetView) -> Result<()> {
        // The fallback layout is minimal enough to always apply.
        if self.switches.widget_update_fails.load(Ordering::SeqCst) && *view != WidgetView::Fallback {
            bail!("launcher rejected update for widget {}", id);
        }
        self.state().widget_views.insert(id, view.clone());
        Ok(())
    }
}

impl BackgroundEngine for MemoryPlatform {
    fn launch(&self, entrypoint: &str, ready: Replier<bool>) -> Result<()> {
        let mode = {
            let mut state = self.state();
            if state.engine_mode == EngineMode::LaunchFails {
                bail!("failed to load application bundle");
            }
            state.engine_launches.push(entrypoint.to_string());
            state.engine_mode
        };

        match mode {
            EngineMode::Ready => {
                ready.reply(true);
                let hook = self
                    .launch_hook
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                if let Some(hook) = hook {
                    hook();
                }
            }
            EngineMode::InitFails => {
                ready.reply(false);
            }
            EngineMode::Silent => self.state().held_ready.push(ready),
            EngineMode::LaunchFails => {}
        }
        Ok(())
    }

    fn destroy(&self) {
        let mut state = self.state();
        state.held_ready.clear();
        state.engine_destroys += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::reply_channel;
    use std::time::Duration;

    #[test]
    fn notify_replaces_same_id() {
        let platform = MemoryPlatform::new();
        let mut n = crate::render::panel::static_panel();
        platform.notify(&n).unwrap();
        n.title = "Ashar 15:12".into();
        platform.notify(&n).unwrap();

        assert_eq!(platform.notifications().len(), 1);
        assert_eq!(platform.notifications()[0].title, "Ashar 15:12");
        assert_eq!(platform.notify_calls(), 2);
    }

    #[test]
    fn silent_engine_holds_ready_until_destroyed() {
        let platform = MemoryPlatform::new();
        platform.set_engine_mode(EngineMode::Silent);
        let (ready, pending) = reply_channel();
        platform.launch("entry", ready).unwrap();
        assert_eq!(pending.try_take(), Ok(None));

        platform.destroy();
        assert!(pending.wait(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn snapshot_tracks_scheduling_only() {
        let platform = MemoryPlatform::new();
        let before = platform.snapshot();
        platform.notify(&crate::render::panel::static_panel()).unwrap();
        assert_eq!(platform.snapshot(), before);

        platform.set_and_allow_while_idle(10, &PendingAction::watchdog()).unwrap();
        assert_ne!(platform.snapshot(), before);
    }
}
