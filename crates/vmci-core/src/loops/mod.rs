//! Thread-based loops that drive polling and worker pools.
//!
//! Both loops run their callbacks on dedicated OS threads and swallow
//! callback failures (errors and panics) so that a transient problem never
//! kills the loop. Repeated failures back off exponentially and are counted
//! in a [`LoopHealth`] snapshot.

mod concurrent;
mod task_loop;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

pub use concurrent::ConcurrentTaskLoop;
pub use task_loop::TaskLoop;

/// Error type returned by loop callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Sleep between checks while a loop has nothing to do.
pub const TICK: Duration = Duration::from_millis(25);

/// Upper bound for the failure backoff unless configured otherwise.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Errors from starting or stopping a loop.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("loop '{0}' is already started")]
    AlreadyStarted(String),

    #[error("loop '{0}' is not started")]
    NotStarted(String),

    #[error("failed to spawn thread for loop '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Counters describing how a loop's callback has been doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopHealth {
    /// Total callback invocations.
    pub invocations: u64,
    /// Invocations that returned an error or panicked.
    pub failures: u64,
    /// Failures since the last successful invocation.
    pub consecutive_failures: u32,
}

impl LoopHealth {
    /// A loop is healthy while its last invocation succeeded.
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

#[derive(Debug, Default)]
pub(crate) struct HealthCounters {
    invocations: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl HealthCounters {
    pub(crate) fn record_success(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Returns the number of consecutive failures including this one.
    pub(crate) fn record_failure(&self) -> u32 {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn snapshot(&self) -> LoopHealth {
        LoopHealth {
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

/// Minimum-interval gate: the callback may run again once `delay` has
/// passed since the last invocation. `reopen` lifts the gate immediately.
#[derive(Debug)]
pub(crate) struct Gate {
    idle_interval: Duration,
    max_backoff: Duration,
    delay: Duration,
    last: Option<Instant>,
}

impl Gate {
    pub(crate) fn new(idle_interval: Duration, max_backoff: Duration) -> Self {
        Self {
            idle_interval,
            max_backoff: max_backoff.max(idle_interval),
            delay: idle_interval,
            last: None,
        }
    }

    pub(crate) fn is_open(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.duration_since(last) > self.delay,
        }
    }

    pub(crate) fn mark_invoked(&mut self, now: Instant) {
        self.last = Some(now);
    }

    pub(crate) fn reopen(&mut self) {
        self.last = None;
    }

    /// Set the delay for the given number of consecutive failures.
    pub(crate) fn back_off(&mut self, consecutive_failures: u32) {
        self.delay = if consecutive_failures == 0 {
            self.idle_interval
        } else {
            let factor = 1u32 << (consecutive_failures - 1).min(16);
            self.idle_interval
                .saturating_mul(factor)
                .min(self.max_backoff)
        };
    }

    #[cfg(test)]
    pub(crate) fn delay(&self) -> Duration {
        self.delay
    }
}

/// Run a callback, turning both errors and panics into a message.
pub(crate) fn invoke<R>(f: impl FnOnce() -> Result<R, BoxError>) -> Result<R, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_backoff_is_bounded() {
        let mut gate = Gate::new(Duration::from_millis(100), Duration::from_secs(1));

        gate.back_off(1);
        assert_eq!(gate.delay(), Duration::from_millis(100));
        gate.back_off(2);
        assert_eq!(gate.delay(), Duration::from_millis(200));
        gate.back_off(4);
        assert_eq!(gate.delay(), Duration::from_millis(800));
        gate.back_off(5);
        assert_eq!(gate.delay(), Duration::from_secs(1));
        gate.back_off(40);
        assert_eq!(gate.delay(), Duration::from_secs(1));

        gate.back_off(0);
        assert_eq!(gate.delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_gate_open_after_delay() {
        let mut gate = Gate::new(Duration::from_millis(100), DEFAULT_MAX_BACKOFF);
        let start = Instant::now();
        assert!(gate.is_open(start));

        gate.mark_invoked(start);
        assert!(!gate.is_open(start + Duration::from_millis(50)));
        assert!(gate.is_open(start + Duration::from_millis(101)));

        gate.reopen();
        assert!(gate.is_open(start));
    }

    #[test]
    fn test_invoke_catches_errors_and_panics() {
        assert_eq!(invoke(|| Ok(5)), Ok(5));

        let err = invoke::<()>(|| Err("boom".into())).unwrap_err();
        assert_eq!(err, "boom");

        let err = invoke::<()>(|| panic!("kaputt")).unwrap_err();
        assert_eq!(err, "panic: kaputt");
    }

    #[test]
    fn test_health_counters() {
        let counters = HealthCounters::default();
        counters.record_success();
        assert_eq!(counters.record_failure(), 1);
        assert_eq!(counters.record_failure(), 2);

        let health = counters.snapshot();
        assert_eq!(health.invocations, 3);
        assert_eq!(health.failures, 2);
        assert!(!health.is_healthy());

        counters.record_success();
        assert!(counters.snapshot().is_healthy());
    }
}
