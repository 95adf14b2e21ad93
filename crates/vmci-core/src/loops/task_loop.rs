//! A single action repeated on its own thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{invoke, BoxError, Gate, HealthCounters, LoopError, LoopHealth, DEFAULT_MAX_BACKOFF, TICK};

type Action = Box<dyn FnMut() -> Result<bool, BoxError> + Send>;

/// Repeats an action on a dedicated thread until stopped.
///
/// The action returns whether it did work. After `true` it runs again right
/// away; after `false` the loop waits until the idle interval has passed
/// since the last invocation, checking for `stop` every [`TICK`].
///
/// ```no_run
/// use std::time::Duration;
/// use vmci_core::TaskLoop;
///
/// let keep_alive = TaskLoop::new("keepalive", || Ok(false), Duration::from_secs(60));
/// keep_alive.start()?;
/// // ...
/// keep_alive.stop()?;
/// # Ok::<(), vmci_core::LoopError>(())
/// ```
pub struct TaskLoop {
    name: String,
    idle_interval: Duration,
    max_backoff: Duration,
    action: Arc<Mutex<Action>>,
    health: Arc<HealthCounters>,
    running: Mutex<Option<Running>>,
}

struct Running {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl TaskLoop {
    /// Create a stopped loop.
    pub fn new<F>(name: impl Into<String>, action: F, idle_interval: Duration) -> Self
    where
        F: FnMut() -> Result<bool, BoxError> + Send + 'static,
    {
        Self {
            name: name.into(),
            idle_interval,
            max_backoff: DEFAULT_MAX_BACKOFF,
            action: Arc::new(Mutex::new(Box::new(action))),
            health: Arc::new(HealthCounters::default()),
            running: Mutex::new(None),
        }
    }

    /// Set the cap for the delay after repeated failures.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Start the loop thread.
    pub fn start(&self) -> Result<(), LoopError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return Err(LoopError::AlreadyStarted(self.name.clone()));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let worker = LoopThread {
            name: self.name.clone(),
            action: self.action.clone(),
            health: self.health.clone(),
            stop: stop.clone(),
            gate: Gate::new(self.idle_interval, self.max_backoff),
        };

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker.run())
            .map_err(|source| LoopError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        debug!(name = %self.name, "Loop started");
        *running = Some(Running { stop, handle });
        Ok(())
    }

    /// Stop the loop and wait for the current invocation to finish.
    ///
    /// When this returns the action will not be called again.
    pub fn stop(&self) -> Result<(), LoopError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let Some(Running { stop, handle }) = running.take() else {
            return Err(LoopError::NotStarted(self.name.clone()));
        };

        stop.store(true, Ordering::SeqCst);
        if handle.join().is_err() {
            warn!(name = %self.name, "Loop thread panicked");
        }

        debug!(name = %self.name, "Loop stopped");
        Ok(())
    }

    /// Whether the loop thread is running.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Snapshot of the action's success/failure counters.
    pub fn health(&self) -> LoopHealth {
        self.health.snapshot()
    }
}

impl Drop for TaskLoop {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

struct LoopThread {
    name: String,
    action: Arc<Mutex<Action>>,
    health: Arc<HealthCounters>,
    stop: Arc<AtomicBool>,
    gate: Gate,
}

impl LoopThread {
    fn run(mut self) {
        while !self.stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if !self.gate.is_open(now) {
                thread::sleep(TICK);
                continue;
            }

            self.gate.mark_invoked(now);
            let result = invoke(|| {
                let mut action = self.action.lock().unwrap_or_else(|e| e.into_inner());
                (*action)()
            });

            match result {
                Ok(did_work) => {
                    self.health.record_success();
                    self.gate.back_off(0);
                    if did_work {
                        self.gate.reopen();
                    }
                }
                Err(e) => {
                    let failures = self.health.record_failure();
                    self.gate.back_off(failures);
                    warn!(
                        name = %self.name,
                        consecutive_failures = failures,
                        error = %e,
                        "Loop action failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(
        counter: &Arc<AtomicUsize>,
        sleep: Duration,
        result: bool,
    ) -> impl FnMut() -> Result<bool, BoxError> + Send + 'static {
        let counter = counter.clone();
        move || {
            if !sleep.is_zero() {
                thread::sleep(sleep);
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(result)
        }
    }

    #[test]
    fn test_idle_action_is_rate_limited() {
        let count = Arc::new(AtomicUsize::new(0));
        let task_loop = TaskLoop::new(
            "idle",
            counting(&count, Duration::ZERO, false),
            Duration::from_millis(100),
        );

        task_loop.start().unwrap();
        thread::sleep(Duration::from_millis(250));
        task_loop.stop().unwrap();

        let count = count.load(Ordering::SeqCst);
        assert!((2..=4).contains(&count), "count was {count}");
    }

    #[test]
    fn test_busy_action_is_not_idled() {
        let count = Arc::new(AtomicUsize::new(0));
        let task_loop = TaskLoop::new(
            "busy",
            counting(&count, Duration::ZERO, true),
            Duration::from_millis(100),
        );

        task_loop.start().unwrap();
        thread::sleep(Duration::from_millis(250));
        task_loop.stop().unwrap();

        assert!(count.load(Ordering::SeqCst) > 1000);
    }

    #[test]
    fn test_stop_is_fast_while_idle() {
        let count = Arc::new(AtomicUsize::new(0));
        let task_loop = TaskLoop::new(
            "fast-stop",
            counting(&count, Duration::ZERO, false),
            Duration::from_secs(5),
        );

        let start = Instant::now();
        task_loop.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        task_loop.stop().unwrap();

        assert!(start.elapsed() < Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_waits_for_running_action() {
        let count = Arc::new(AtomicUsize::new(0));
        let task_loop = TaskLoop::new(
            "slow",
            counting(&count, Duration::from_secs(1), true),
            Duration::from_secs(5),
        );

        let start = Instant::now();
        task_loop.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        task_loop.stop().unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed > Duration::from_millis(800), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1300), "elapsed {elapsed:?}");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_double_start_and_stop_are_rejected() {
        let task_loop = TaskLoop::new("twice", || Ok(false), Duration::from_millis(10));

        assert!(matches!(task_loop.stop(), Err(LoopError::NotStarted(_))));
        task_loop.start().unwrap();
        assert!(matches!(task_loop.start(), Err(LoopError::AlreadyStarted(_))));
        task_loop.stop().unwrap();
        assert!(matches!(task_loop.stop(), Err(LoopError::NotStarted(_))));
    }

    #[test]
    fn test_loop_can_be_restarted() {
        let count = Arc::new(AtomicUsize::new(0));
        let task_loop = TaskLoop::new(
            "restart",
            counting(&count, Duration::ZERO, false),
            Duration::from_secs(5),
        );

        task_loop.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        task_loop.stop().unwrap();
        task_loop.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        task_loop.stop().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failures_are_swallowed_and_backed_off() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task_loop = TaskLoop::new(
            "failing",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("unreachable server".into())
            },
            Duration::from_millis(20),
        );

        task_loop.start().unwrap();
        thread::sleep(Duration::from_millis(400));
        task_loop.stop().unwrap();

        // Without backoff this would be ~20 invocations.
        let count = count.load(Ordering::SeqCst);
        assert!((2..=8).contains(&count), "count was {count}");

        let health = task_loop.health();
        assert_eq!(health.failures as usize, count);
        assert!(!health.is_healthy());
    }

    #[test]
    fn test_panicking_action_does_not_kill_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task_loop = TaskLoop::new(
            "panicking",
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first call explodes");
                }
                Ok(false)
            },
            Duration::from_millis(10),
        );

        task_loop.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        task_loop.stop().unwrap();

        assert!(count.load(Ordering::SeqCst) >= 2);
        assert_eq!(task_loop.health().failures, 1);
        assert!(task_loop.health().is_healthy());
    }
}
