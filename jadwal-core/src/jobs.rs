use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::minutes;
use crate::services::JobService;

pub const SERVICE_RESTART_WORK: &str = "jadwalsholat_service_restart_work";
pub const WATCHDOG_RETRY_WORK: &str = "jadwalsholat_watchdog_retry";
pub const WIDGET_PERIODIC_WORK: &str = "jadwalsholat_widget_periodic";

/// Platform floor for periodic work; shorter periods are raised to this.
pub const MIN_PERIODIC_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60 * 60);
pub const MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    ServiceRestart,
    WidgetRefresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    NotRequired,
    Connected,
}

/// Declarative preconditions evaluated by the platform before a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub network: NetworkType,
    pub battery_not_low: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            network: NetworkType::NotRequired,
            battery_not_low: false,
        }
    }
}

impl Constraints {
    pub fn battery_not_low(mut self, required: bool) -> Self {
        self.battery_not_low = required;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffPolicy {
    Exponential,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub policy: BackoffPolicy,
    pub base: Duration,
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Self {
            policy: BackoffPolicy::Exponential,
            base,
        }
    }

    pub fn linear(base: Duration) -> Self {
        Self {
            policy: BackoffPolicy::Linear,
            base,
        }
    }

    /// Delay before retry number `attempt` (1-based). `None` once the retry
    /// budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > MAX_ATTEMPTS {
            return None;
        }
        let delay = match self.policy {
            BackoffPolicy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base.saturating_mul(factor)
            }
            BackoffPolicy::Linear => self.base.saturating_mul(attempt),
        };
        Some(delay.min(MAX_BACKOFF))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobRequest {
    Periodic {
        kind: JobKind,
        period: Duration,
        initial_delay: Duration,
        constraints: Constraints,
        backoff: Backoff,
    },
    OneShot {
        kind: JobKind,
        initial_delay: Duration,
        backoff: Option<Backoff>,
    },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Periodic { kind, .. } | JobRequest::OneShot { kind, .. } => *kind,
        }
    }

    pub fn backoff(&self) -> Option<Backoff> {
        match self {
            JobRequest::Periodic { backoff, .. } => Some(*backoff),
            JobRequest::OneShot { backoff, .. } => *backoff,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        match self {
            JobRequest::Periodic { initial_delay, .. } | JobRequest::OneShot { initial_delay, .. } => {
                *initial_delay
            }
        }
    }
}

/// Result of one run of scheduled work. Failures always ask for a retry so a
/// single bad run never ends the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Success,
    Retry,
}

/// Delay before the next attempt of a run that returned `outcome`, or `None`
/// when no retry is due.
pub fn retry_delay(request: &JobRequest, attempt: u32, outcome: JobOutcome) -> Option<Duration> {
    if outcome == JobOutcome::Success {
        return None;
    }
    let backoff = request.backoff().unwrap_or_else(|| Backoff::exponential(Duration::from_secs(30)));
    match backoff.delay_for(attempt) {
        Some(delay) => Some(delay),
        None => {
            warn!(
                "{:?} job gave up after {} attempts",
                request.kind(),
                attempt.saturating_sub(1)
            );
            None
        }
    }
}

pub struct JobScheduler<'a, J: JobService + ?Sized> {
    jobs: &'a J,
}

impl<'a, J: JobService + ?Sized> JobScheduler<'a, J> {
    pub fn new(jobs: &'a J) -> Self {
        Self { jobs }
    }

    /// Registers periodic work under `name`, replacing any earlier
    /// registration with that name. The first run waits one full period.
    pub fn schedule_unique(
        &self,
        name: &str,
        kind: JobKind,
        period_minutes: i64,
        constraints: Constraints,
        backoff: Backoff,
    ) -> Result<()> {
        self.schedule_unique_after(name, kind, period_minutes, None, constraints, backoff)
    }

    /// Like [`schedule_unique`](Self::schedule_unique) with an explicit first
    /// delay; `None` waits one period.
    pub fn schedule_unique_after(
        &self,
        name: &str,
        kind: JobKind,
        period_minutes: i64,
        initial_delay: Option<Duration>,
        constraints: Constraints,
        backoff: Backoff,
    ) -> Result<()> {
        let requested = minutes(period_minutes);
        let period = requested.max(MIN_PERIODIC_INTERVAL);
        if period != requested {
            debug!(
                "Periodic {} raised from {:?} to platform minimum {:?}",
                name, requested, period
            );
        }

        self.jobs.enqueue_unique(
            name,
            JobRequest::Periodic {
                kind,
                period,
                initial_delay: initial_delay.unwrap_or(period),
                constraints,
                backoff,
            },
        )?;
        info!("Scheduled periodic {} every {:?}", name, period);
        Ok(())
    }

    pub fn schedule_one_shot(
        &self,
        kind: JobKind,
        delay: Duration,
        backoff: Option<Backoff>,
    ) -> Result<()> {
        self.jobs.enqueue(JobRequest::OneShot {
            kind,
            initial_delay: delay,
            backoff,
        })?;
        debug!("Enqueued one-shot {:?} in {:?}", kind, delay);
        Ok(())
    }

    pub fn schedule_unique_one_shot(
        &self,
        name: &str,
        kind: JobKind,
        delay: Duration,
        backoff: Backoff,
    ) -> Result<()> {
        self.jobs.enqueue_unique(
            name,
            JobRequest::OneShot {
                kind,
                initial_delay: delay,
                backoff: Some(backoff),
            },
        )?;
        debug!("Enqueued unique one-shot {} in {:?}", name, delay);
        Ok(())
    }

    /// No-op when nothing is registered under `name`.
    pub fn cancel_unique(&self, name: &str) {
        match self.jobs.cancel_unique(name) {
            Ok(true) => info!("Cancelled job {}", name),
            Ok(false) => debug!("No job registered as {}", name),
            Err(e) => warn!("Failed to cancel job {}: {}", name, e),
        }
    }
}
