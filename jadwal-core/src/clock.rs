use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds in `duration`, saturating at `i64::MAX`.
pub fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Epoch time `delay` after `now_ms`, saturating instead of wrapping.
pub fn later_by(now_ms: i64, delay: Duration) -> i64 {
    now_ms.saturating_add(duration_ms(delay))
}

/// Wall clock plus time since boot, both in milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    fn uptime_ms(&self) -> i64;
}

#[derive(Debug)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Device uptime where the kernel reports it, otherwise time since this
    /// clock was created.
    fn uptime_ms(&self) -> i64 {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            if let Ok(content) = std::fs::read_to_string("/proc/uptime") {
                if let Some(secs) = content
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse::<f64>().ok())
                {
                    return (secs * 1000.0) as i64;
                }
            }
        }
        self.started.elapsed().as_millis() as i64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
    uptime_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64, uptime_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
            uptime_ms: AtomicI64::new(uptime_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn set_uptime(&self, uptime_ms: i64) {
        self.uptime_ms.store(uptime_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by_ms: i64) {
        self.now_ms.fetch_add(by_ms, Ordering::SeqCst);
        self.uptime_ms.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn uptime_ms(&self) -> i64 {
        self.uptime_ms.load(Ordering::SeqCst)
    }
}
