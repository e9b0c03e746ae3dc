use jadwal_core::alarm::WATCHDOG_REQUEST_CODE;
use jadwal_core::bridge::{HEALTH_CHANNEL, ALARM_CHANNEL};
use jadwal_core::jobs::{JobOutcome, SERVICE_RESTART_WORK, WATCHDOG_RETRY_WORK};
use jadwal_core::memory::AlarmMode;
use jadwal_core::prefs::keys;
use jadwal_core::watchdog::{Health, HealthEvidence};
use jadwal_core::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MINUTE: i64 = 60_000;

fn host() -> Host<MemoryPlatform> {
    Host::new(Arc::new(MemoryPlatform::new()), MemoryPrefs::shared(), MemoryPrefs::shared())
        .with_probe_timeout(Duration::from_millis(30))
}

#[test]
fn rescheduling_keeps_a_single_registration() {
    let host = host();
    for minutes in [1, 5, 30] {
        host.watchdog().set_interval(minutes).unwrap();
        host.watchdog().set_interval(minutes).unwrap();

        let alarms = host.services().alarms();
        assert_eq!(alarms.len(), 1);
        assert_eq!(
            alarms[0].mode,
            AlarmMode::Repeating {
                interval_ms: minutes * MINUTE
            }
        );
        assert_eq!(host.services().unique_jobs().len(), 1);
    }
}

#[test]
fn cancel_before_schedule_is_fine() {
    let host = host();
    host.watchdog().cancel();
    assert!(host.services().alarms().is_empty());
}

#[test]
fn probe_without_responder_stays_within_timeout() {
    let host = host();
    let started = Instant::now();
    let report = host.watchdog().tick(TickSource::Alarm);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.health, Health::Unhealthy);
}

#[test]
fn unresponsive_main_context_is_restarted() {
    let host = host();
    let now = host.now_ms();

    let report = dispatch_signal(&host, Signal::WatchdogFired);
    assert_eq!(report, SignalOutcome::Handled);

    let platform = host.services();
    assert_eq!(
        platform.start_requests(),
        vec![Some(watchdog::WATCHDOG_RESTART_ACTION.to_string())]
    );
    assert_eq!(platform.alarm(WATCHDOG_REQUEST_CODE).unwrap().trigger_ms, now + MINUTE);
    let jobs = platform.unique_jobs();
    assert!(jobs.contains_key(SERVICE_RESTART_WORK));
    assert!(jobs.contains_key(WATCHDOG_RETRY_WORK));
}

#[test]
fn heartbeat_from_bridge_keeps_service_alone() {
    let host = host();
    dispatch_call(&host, &MethodCall::new(HEALTH_CHANNEL, "reportHeartbeat", Value::Null)).unwrap();
    host.services().clock().advance(4 * MINUTE);

    let report = host.watchdog().tick(TickSource::PeriodicJob);
    assert_eq!(
        report.health,
        Health::Healthy(HealthEvidence::FreshHeartbeat { age_ms: 4 * MINUTE })
    );
    assert!(host.services().start_requests().is_empty());

    host.services().clock().advance(MINUTE);
    assert_eq!(host.watchdog().tick(TickSource::PeriodicJob).health, Health::Unhealthy);
}

#[test]
fn responsive_main_context_wins_over_stale_heartbeat() {
    let host = host();
    host.native().put_long(keys::LAST_HEARTBEAT_MS, 1).unwrap();
    let _responder = host.endpoint().spawn_responder(|| ProbeReply::Success);

    let report = host.watchdog().with_probe_timeout(Duration::from_secs(2)).tick(TickSource::Alarm);
    assert_eq!(report.health, Health::Healthy(HealthEvidence::DirectProbe));
    host.endpoint().detach();
}

#[test]
fn erroring_responder_counts_as_unresponsive() {
    let host = host();
    let _responder = host.endpoint().spawn_responder(|| ProbeReply::Error {
        code: "BUSY".into(),
        message: None,
    });
    let report = host.watchdog().with_probe_timeout(Duration::from_secs(2)).tick(TickSource::Alarm);
    assert!(report.restart_requested);
    host.endpoint().detach();
}

#[test]
fn consecutive_ticks_have_identical_effects() {
    let host = host();
    host.report_heartbeat().unwrap();

    let first = host.watchdog().tick(TickSource::Alarm);
    let after_first = host.services().snapshot();
    let second = host.watchdog().tick(TickSource::Alarm);

    assert_eq!(first, second);
    assert_eq!(host.services().snapshot(), after_first);
}

#[test]
fn refused_restart_is_retried_by_job() {
    let host = host();
    host.services().set_foreground_start_fails(true);
    host.watchdog().schedule().unwrap();
    let request = host.services().unique_jobs()[SERVICE_RESTART_WORK].clone();
    match dispatch_signal(&host, Signal::JobDue { request, attempt: 1 }) {
        SignalOutcome::Job { outcome, retry_in } => {
            assert_eq!(outcome, JobOutcome::Retry);
            assert_eq!(retry_in, Some(Duration::from_secs(60)));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn interval_change_from_bridge_rejects_zero() {
    let host = host();
    let err = dispatch_call(
        &host,
        &MethodCall::new(ALARM_CHANNEL, "setWatchdogInterval", json!({"minutes": 0})),
    )
    .unwrap_err();
    assert_eq!(err.code(), Some(bridge::WATCHDOG_ERR));
    assert!(host.services().alarms().is_empty());
}
