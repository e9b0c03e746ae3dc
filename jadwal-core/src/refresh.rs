//! Background refresh of the widget cache.
//!
//! The refresh job boots a headless instance of the application, which
//! recomputes prayer times, writes them to the application store and then
//! reports back on the widget-update bridge channel. Both waits are bounded;
//! anything short of an explicit completion asks the job system to retry.

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::jobs::{Backoff, Constraints, JobKind, JobOutcome, JobScheduler, WIDGET_PERIODIC_WORK};
use crate::reply::{reply_channel, PendingReply, Replier, WaitError};
use crate::services::{BackgroundEngine, JobService};

pub const WIDGET_ENTRYPOINT: &str = "widgetBackgroundEntrypoint";
pub const INIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

pub const PERIODIC_REFRESH_MINUTES: i64 = 60;
pub const PERIODIC_REFRESH_DELAY: Duration = Duration::from_secs(60);
pub const REFRESH_BACKOFF_BASE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    Complete,
    Failed(Option<String>),
}

/// Where the bridge delivers the completion report of the running refresh.
#[derive(Debug, Clone, Default)]
pub struct CompletionSlot {
    waiting: Arc<Mutex<Option<Replier<RefreshStatus>>>>,
}

impl CompletionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn waiting(&self) -> MutexGuard<'_, Option<Replier<RefreshStatus>>> {
        self.waiting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn arm(&self) -> PendingReply<RefreshStatus> {
        let (replier, pending) = reply_channel();
        *self.waiting() = Some(replier);
        pending
    }

    /// Returns false when no refresh is waiting for a report.
    pub fn complete(&self, status: RefreshStatus) -> bool {
        match self.waiting().take() {
            Some(replier) => replier.reply(status),
            None => {
                debug!("Refresh report {:?} with nothing waiting", status);
                false
            }
        }
    }

    pub fn disarm(&self) {
        self.waiting().take();
    }
}

pub fn run_refresh<E: BackgroundEngine + ?Sized>(
    engine: &E,
    slot: &CompletionSlot,
    init_timeout: Duration,
    completion_timeout: Duration,
) -> JobOutcome {
    let completion = slot.arm();
    let outcome = drive_refresh(engine, completion, init_timeout, completion_timeout);
    slot.disarm();
    engine.destroy();
    outcome
}

fn drive_refresh<E: BackgroundEngine + ?Sized>(
    engine: &E,
    completion: PendingReply<RefreshStatus>,
    init_timeout: Duration,
    completion_timeout: Duration,
) -> JobOutcome {
    let (ready, initialized) = reply_channel();
    if let Err(e) = engine.launch(WIDGET_ENTRYPOINT, ready) {
        warn!("Background engine launch failed: {:#}", e);
        return JobOutcome::Retry;
    }

    match initialized.wait(init_timeout) {
        Ok(true) => debug!("Background engine initialized"),
        Ok(false) => {
            warn!("Background engine initialization failed");
            return JobOutcome::Retry;
        }
        Err(WaitError::Timeout(_)) => {
            warn!("Background engine did not initialize in time");
            return JobOutcome::Retry;
        }
        Err(e) => {
            warn!("Background engine initialization aborted: {}", e);
            return JobOutcome::Retry;
        }
    }

    match completion.wait(completion_timeout) {
        Ok(RefreshStatus::Complete) => {
            info!("Widget data refreshed");
            JobOutcome::Success
        }
        Ok(RefreshStatus::Failed(message)) => {
            warn!("Background update failed: {:?}", message);
            JobOutcome::Retry
        }
        Err(e) => {
            warn!("Waiting for background update completion: {}", e);
            JobOutcome::Retry
        }
    }
}

pub fn schedule_periodic_refresh<J: JobService + ?Sized>(jobs: &J) -> Result<()> {
    JobScheduler::new(jobs).schedule_unique_after(
        WIDGET_PERIODIC_WORK,
        JobKind::WidgetRefresh,
        PERIODIC_REFRESH_MINUTES,
        Some(PERIODIC_REFRESH_DELAY),
        Constraints::default(),
        Backoff::exponential(REFRESH_BACKOFF_BASE),
    )
}

pub fn enqueue_refresh_now<J: JobService + ?Sized>(jobs: &J) -> Result<()> {
    JobScheduler::new(jobs).schedule_one_shot(
        JobKind::WidgetRefresh,
        Duration::ZERO,
        Some(Backoff::exponential(REFRESH_BACKOFF_BASE)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{EngineMode, MemoryPlatform};
    use std::thread;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn completion_report_succeeds() {
        let platform = MemoryPlatform::new();
        let slot = CompletionSlot::new();
        let reporter = slot.clone();
        platform.set_engine_mode(EngineMode::Ready);
        platform.on_engine_launch(move || {
            reporter.complete(RefreshStatus::Complete);
        });

        assert_eq!(
            run_refresh(&platform, &slot, Duration::from_secs(2), Duration::from_secs(2)),
            JobOutcome::Success
        );
        assert_eq!(platform.engine_launches(), vec![WIDGET_ENTRYPOINT.to_string()]);
        assert_eq!(platform.engine_destroys(), 1);
    }

    #[test]
    fn failure_report_retries() {
        let platform = MemoryPlatform::new();
        let slot = CompletionSlot::new();
        let reporter = slot.clone();
        platform.on_engine_launch(move || {
            reporter.complete(RefreshStatus::Failed(Some("no location".into())));
        });
        assert_eq!(run_refresh(&platform, &slot, SHORT, SHORT), JobOutcome::Retry);
    }

    #[test]
    fn silent_engine_times_out() {
        let platform = MemoryPlatform::new();
        let slot = CompletionSlot::new();

        platform.set_engine_mode(EngineMode::Silent);
        assert_eq!(run_refresh(&platform, &slot, SHORT, SHORT), JobOutcome::Retry);

        platform.set_engine_mode(EngineMode::Ready);
        assert_eq!(run_refresh(&platform, &slot, SHORT, SHORT), JobOutcome::Retry);
        assert_eq!(platform.engine_destroys(), 2);
    }

    #[test]
    fn failed_init_and_launch_retry() {
        let platform = MemoryPlatform::new();
        let slot = CompletionSlot::new();

        platform.set_engine_mode(EngineMode::InitFails);
        assert_eq!(run_refresh(&platform, &slot, SHORT, SHORT), JobOutcome::Retry);

        platform.set_engine_mode(EngineMode::LaunchFails);
        assert_eq!(run_refresh(&platform, &slot, SHORT, SHORT), JobOutcome::Retry);
    }

    #[test]
    fn report_from_other_thread() {
        let slot = CompletionSlot::new();
        let pending = slot.arm();
        let reporter = slot.clone();
        thread::spawn(move || reporter.complete(RefreshStatus::Complete))
            .join()
            .unwrap();
        assert_eq!(pending.wait(SHORT), Ok(RefreshStatus::Complete));
        assert!(!slot.complete(RefreshStatus::Complete));
    }

    #[test]
    fn periodic_refresh_starts_after_a_minute() {
        let platform = MemoryPlatform::new();
        schedule_periodic_refresh(&platform).unwrap();
        let request = &platform.unique_jobs()[WIDGET_PERIODIC_WORK];
        assert_eq!(request.initial_delay(), PERIODIC_REFRESH_DELAY);
        assert_eq!(request.kind(), JobKind::WidgetRefresh);
    }
}
