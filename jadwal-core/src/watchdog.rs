//! Keeps the presence service alive.
//!
//! Every tick, whether from the alarm or from a background job, runs the same
//! cycle: probe the main execution context, fall back to heartbeat staleness,
//! restart the presence when both say unhealthy, then put both schedules
//! back in place. Ticks are idempotent, so duplicates from the two channels
//! are harmless.

use anyhow::{bail, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::time::Duration;

use crate::alarm::{AlarmScheduler, Delivery, PendingAction, WATCHDOG_REQUEST_CODE};
use crate::clock::{duration_ms, later_by, Clock};
use crate::config::{JobConfig, WatchdogConfig, MAX_INTERVAL_MINUTES};
use crate::jobs::{
    Backoff, Constraints, JobKind, JobOutcome, JobScheduler, SERVICE_RESTART_WORK,
    WATCHDOG_RETRY_WORK,
};
use crate::prefs::{keys, PreferenceStore};
use crate::probe::{LivenessProber, ProbeEndpoint, DEFAULT_PROBE_TIMEOUT};
use crate::services::{AlarmService, ForegroundService, JobService};

pub const WATCHDOG_RESTART_ACTION: &str = "jadwalsholat.rasyid.action.WATCHDOG_RESTART";

pub const PERIODIC_BACKOFF_BASE: Duration = Duration::from_secs(60);
pub const RETRY_DELAY: Duration = Duration::from_secs(10);
pub const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TickSource {
    Alarm,
    PeriodicJob,
    RetryJob,
}

impl TickSource {
    fn job_driven(self) -> bool {
        !matches!(self, TickSource::Alarm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatchdogState {
    Idle,
    Probing,
    Healthy,
    Unhealthy,
    Rescheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthEvidence {
    DirectProbe,
    FreshHeartbeat { age_ms: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Health {
    Healthy(HealthEvidence),
    Unhealthy,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy(_))
    }
}

/// Healthy when the direct probe answered, or when a known heartbeat is
/// younger than `stale_threshold`. A heartbeat exactly at the threshold is
/// stale, and 0 means no heartbeat was ever reported.
pub fn assess_health(
    direct_ok: bool,
    last_heartbeat_ms: i64,
    now_ms: i64,
    stale_threshold: Duration,
) -> Health {
    if direct_ok {
        return Health::Healthy(HealthEvidence::DirectProbe);
    }
    if last_heartbeat_ms == 0 {
        return Health::Unhealthy;
    }
    let age_ms = now_ms.saturating_sub(last_heartbeat_ms);
    if age_ms < duration_ms(stale_threshold) {
        Health::Healthy(HealthEvidence::FreshHeartbeat { age_ms })
    } else {
        Health::Unhealthy
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub source: TickSource,
    pub health: Health,
    pub restart_requested: bool,
    pub restart_failed: bool,
    /// `None` when the platform refused the alarm.
    pub next_alarm_at_ms: Option<i64>,
    pub trace: Vec<WatchdogState>,
    /// Meaningful for job-driven ticks; alarm ticks always report success.
    pub outcome: JobOutcome,
}

pub struct Watchdog<'a, S: ?Sized> {
    services: &'a S,
    prefs: &'a dyn PreferenceStore,
    endpoint: &'a ProbeEndpoint,
    probe_timeout: Duration,
}

impl<'a, S> Watchdog<'a, S>
where
    S: AlarmService + JobService + ForegroundService + Clock + ?Sized,
{
    pub fn new(services: &'a S, prefs: &'a dyn PreferenceStore, endpoint: &'a ProbeEndpoint) -> Self {
        Self {
            services,
            prefs,
            endpoint,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn tick(&self, source: TickSource) -> TickReport {
        let mut trace = vec![WatchdogState::Idle, WatchdogState::Probing];
        debug!("Watchdog tick from {:?}", source);

        let config = WatchdogConfig::load(self.prefs);
        let prober = LivenessProber::new(self.endpoint, self.prefs);

        let direct_ok = prober.probe_direct(self.probe_timeout);
        let health = assess_health(
            direct_ok,
            prober.last_heartbeat_ms(),
            self.services.now_ms(),
            config.stale_threshold(),
        );

        let mut restart_failed = false;
        match health {
            Health::Healthy(evidence) => {
                trace.push(WatchdogState::Healthy);
                debug!("Main context healthy ({:?})", evidence);
            }
            Health::Unhealthy => {
                trace.push(WatchdogState::Unhealthy);
                info!("Main context unresponsive, restarting presence service");
                if let Err(e) = self
                    .services
                    .start_foreground_service(Some(WATCHDOG_RESTART_ACTION))
                {
                    warn!("Failed to start service: {}", e);
                    restart_failed = true;
                }
            }
        }

        let next_alarm_at_ms = self.schedule_alarm(&config);
        let job_failed = match self.ensure_periodic_job() {
            Ok(()) => false,
            Err(e) => {
                error!("Failed to register periodic watchdog job: {:#}", e);
                true
            }
        };
        if source == TickSource::Alarm {
            self.enqueue_retry();
        }
        trace.push(WatchdogState::Rescheduled);
        trace.push(WatchdogState::Idle);

        let outcome = if source.job_driven() && (restart_failed || job_failed) {
            JobOutcome::Retry
        } else {
            JobOutcome::Success
        };

        TickReport {
            source,
            health,
            restart_requested: !health.is_healthy(),
            restart_failed,
            next_alarm_at_ms,
            trace,
            outcome,
        }
    }

    fn schedule_alarm(&self, config: &WatchdogConfig) -> Option<i64> {
        let trigger = later_by(self.services.now_ms(), config.interval());
        let delivery = AlarmScheduler::new(self.services).schedule_repeating(
            trigger,
            config.interval(),
            &PendingAction::watchdog(),
        );
        if delivery == Delivery::Failed {
            None
        } else {
            Some(trigger)
        }
    }

    fn ensure_periodic_job(&self) -> Result<()> {
        let jobs = JobConfig::load(self.prefs);
        JobScheduler::new(self.services).schedule_unique(
            SERVICE_RESTART_WORK,
            JobKind::ServiceRestart,
            jobs.interval_minutes,
            Constraints::default().battery_not_low(jobs.require_battery_not_low),
            Backoff::exponential(PERIODIC_BACKOFF_BASE),
        )
    }

    /// Backs an alarm tick with a job that survives start restrictions.
    fn enqueue_retry(&self) {
        if let Err(e) = JobScheduler::new(self.services).schedule_unique_one_shot(
            WATCHDOG_RETRY_WORK,
            JobKind::ServiceRestart,
            RETRY_DELAY,
            Backoff::exponential(RETRY_BACKOFF_BASE),
        ) {
            warn!("Failed to enqueue watchdog retry work: {}", e);
        }
    }

    /// Arms the next alarm and makes sure the periodic job is registered.
    /// Returns the next alarm time, `None` if the alarm was refused.
    pub fn schedule(&self) -> Result<Option<i64>> {
        let next = self.schedule_alarm(&WatchdogConfig::load(self.prefs));
        self.ensure_periodic_job()?;
        Ok(next)
    }

    /// Removes both channels. Nothing fires again until `schedule` runs.
    pub fn cancel(&self) {
        AlarmScheduler::new(self.services).cancel(WATCHDOG_REQUEST_CODE);
        JobScheduler::new(self.services).cancel_unique(SERVICE_RESTART_WORK);
    }

    pub fn set_interval(&self, minutes: i64) -> Result<Option<i64>> {
        if minutes < 1 {
            bail!("watchdog interval must be at least one minute, got {}", minutes);
        }
        if minutes > MAX_INTERVAL_MINUTES {
            bail!(
                "watchdog interval must be at most {} minutes, got {}",
                MAX_INTERVAL_MINUTES,
                minutes
            );
        }
        self.prefs.put_long(keys::WATCHDOG_INTERVAL_MINUTES, minutes)?;
        info!("Watchdog interval set to {} min", minutes);
        self.schedule()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPlatform;
    use crate::prefs::MemoryPrefs;

    const MINUTE: i64 = 60_000;

    #[test]
    fn heartbeat_boundary_is_stale() {
        let threshold = Duration::from_secs(5 * 60);
        let now = 10_000_000;
        assert!(assess_health(false, now - 5 * MINUTE + 1, now, threshold).is_healthy());
        assert_eq!(assess_health(false, now - 5 * MINUTE, now, threshold), Health::Unhealthy);
    }

    #[test]
    fn unknown_heartbeat_is_never_fresh() {
        for minutes in [1u64, 5, 60, 10_000] {
            let threshold = Duration::from_secs(minutes * 60);
            assert_eq!(assess_health(false, 0, 1_000, threshold), Health::Unhealthy);
        }
        assert_eq!(
            assess_health(true, 0, 1_000, Duration::from_secs(60)),
            Health::Healthy(HealthEvidence::DirectProbe)
        );
    }

    #[test]
    fn unhealthy_tick_restarts_and_reschedules() {
        let platform = MemoryPlatform::new();
        let prefs = MemoryPrefs::new();
        let endpoint = ProbeEndpoint::new();
        let now = platform.now_ms();

        let report = Watchdog::new(&platform, &prefs, &endpoint)
            .with_probe_timeout(Duration::from_millis(50))
            .tick(TickSource::Alarm);

        assert_eq!(report.health, Health::Unhealthy);
        assert!(report.restart_requested);
        assert_eq!(report.next_alarm_at_ms, Some(now + MINUTE));
        assert_eq!(
            report.trace,
            vec![
                WatchdogState::Idle,
                WatchdogState::Probing,
                WatchdogState::Unhealthy,
                WatchdogState::Rescheduled,
                WatchdogState::Idle
            ]
        );
        assert_eq!(platform.start_requests(), vec![Some(WATCHDOG_RESTART_ACTION.to_string())]);
        assert_eq!(platform.alarm(WATCHDOG_REQUEST_CODE).unwrap().trigger_ms, now + MINUTE);

        let jobs = platform.unique_jobs();
        assert!(jobs.contains_key(SERVICE_RESTART_WORK));
        assert!(jobs.contains_key(WATCHDOG_RETRY_WORK));
    }

    #[test]
    fn fresh_heartbeat_skips_restart_but_still_reschedules() {
        let platform = MemoryPlatform::new();
        let prefs = MemoryPrefs::new();
        prefs
            .put_long(keys::LAST_HEARTBEAT_MS, platform.now_ms() - 2 * MINUTE)
            .unwrap();
        let endpoint = ProbeEndpoint::new();

        let report = Watchdog::new(&platform, &prefs, &endpoint)
            .with_probe_timeout(Duration::from_millis(20))
            .tick(TickSource::PeriodicJob);

        assert_eq!(
            report.health,
            Health::Healthy(HealthEvidence::FreshHeartbeat { age_ms: 2 * MINUTE })
        );
        assert!(platform.start_requests().is_empty());
        assert!(report.next_alarm_at_ms.is_some());
        assert_eq!(report.outcome, JobOutcome::Success);
        assert!(!platform.unique_jobs().contains_key(WATCHDOG_RETRY_WORK));
    }

    #[test]
    fn failed_restart_asks_job_for_retry() {
        let platform = MemoryPlatform::new();
        platform.set_foreground_start_fails(true);
        let prefs = MemoryPrefs::new();
        let endpoint = ProbeEndpoint::new();
        let watchdog = Watchdog::new(&platform, &prefs, &endpoint).with_probe_timeout(Duration::from_millis(20));

        let job = watchdog.tick(TickSource::RetryJob);
        assert!(job.restart_failed);
        assert_eq!(job.outcome, JobOutcome::Retry);

        let alarm = watchdog.tick(TickSource::Alarm);
        assert_eq!(alarm.outcome, JobOutcome::Success);
        assert!(platform.alarm(WATCHDOG_REQUEST_CODE).is_some());
    }

    #[test]
    fn configured_interval_drives_next_alarm() {
        let platform = MemoryPlatform::new();
        let prefs = MemoryPrefs::new();
        let endpoint = ProbeEndpoint::new();
        let now = platform.now_ms();
        let watchdog = Watchdog::new(&platform, &prefs, &endpoint);

        assert_eq!(watchdog.set_interval(15).unwrap(), Some(now + 15 * MINUTE));
        assert_eq!(prefs.get_long(keys::WATCHDOG_INTERVAL_MINUTES, 0), 15);
        assert!(watchdog.set_interval(0).is_err());
    }

    #[test]
    fn oversized_interval_is_rejected_before_storing() {
        let platform = MemoryPlatform::new();
        let prefs = MemoryPrefs::new();
        let endpoint = ProbeEndpoint::new();
        let now = platform.now_ms();
        let watchdog = Watchdog::new(&platform, &prefs, &endpoint);

        assert!(watchdog.set_interval(i64::MAX).is_err());
        assert!(watchdog.set_interval(MAX_INTERVAL_MINUTES + 1).is_err());
        assert!(!prefs.contains(keys::WATCHDOG_INTERVAL_MINUTES));
        assert_eq!(
            watchdog.set_interval(MAX_INTERVAL_MINUTES).unwrap(),
            Some(now + MAX_INTERVAL_MINUTES * MINUTE)
        );
    }

    #[test]
    fn corrupt_stored_values_still_reschedule() {
        let platform = MemoryPlatform::new();
        let prefs = MemoryPrefs::new();
        let endpoint = ProbeEndpoint::new();
        let now = platform.now_ms();
        prefs.put_long(keys::WATCHDOG_INTERVAL_MINUTES, i64::MAX).unwrap();
        prefs.put_long(keys::STALE_THRESHOLD_MINUTES, i64::MAX).unwrap();
        prefs.put_long(keys::LAST_HEARTBEAT_MS, i64::MIN).unwrap();

        let report = Watchdog::new(&platform, &prefs, &endpoint)
            .with_probe_timeout(Duration::from_millis(10))
            .tick(TickSource::Alarm);
        assert_eq!(report.health, Health::Unhealthy);
        assert_eq!(report.next_alarm_at_ms, Some(now + MAX_INTERVAL_MINUTES * MINUTE));
    }

    #[test]
    fn heartbeat_age_saturates() {
        for threshold in [Duration::from_secs(60), Duration::from_secs(u64::MAX)] {
            assert_eq!(assess_health(false, i64::MIN, i64::MAX, threshold), Health::Unhealthy);
        }
    }

    #[test]
    fn cancel_removes_both_channels() {
        let platform = MemoryPlatform::new();
        let prefs = MemoryPrefs::new();
        let endpoint = ProbeEndpoint::new();
        let watchdog = Watchdog::new(&platform, &prefs, &endpoint);

        watchdog.schedule().unwrap();
        watchdog.cancel();
        watchdog.cancel();

        assert!(platform.alarm(WATCHDOG_REQUEST_CODE).is_none());
        assert!(!platform.unique_jobs().contains_key(SERVICE_RESTART_WORK));
    }
}
