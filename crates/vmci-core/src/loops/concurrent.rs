//! One dispatcher thread feeding a fixed pool of worker threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{invoke, BoxError, Gate, HealthCounters, LoopError, LoopHealth, DEFAULT_MAX_BACKOFF, TICK};

type Dispatch<T> = Box<dyn FnMut() -> Result<Option<T>, BoxError> + Send>;
type Process<T> = Arc<dyn Fn(T) -> Result<(), BoxError> + Send + Sync>;

/// Bounded-parallelism work loop.
///
/// The dispatcher thread calls `dispatch` whenever one of the `concurrency`
/// worker slots is free and hands the produced item to that slot. Each worker
/// thread owns one slot and calls `process` for the item it finds there. A
/// slot stays occupied until `process` returns, so at most `concurrency`
/// items are ever in flight and `dispatch` is never asked for work that
/// nobody could pick up.
pub struct ConcurrentTaskLoop<T: Send + 'static> {
    name: String,
    idle_interval: Duration,
    max_backoff: Duration,
    concurrency: usize,
    dispatch: Arc<Mutex<Dispatch<T>>>,
    process: Process<T>,
    dispatch_health: Arc<HealthCounters>,
    process_health: Arc<HealthCounters>,
    running: Mutex<Option<Running>>,
}

struct Running {
    stop_dispatch: Arc<AtomicBool>,
    stop_workers: Arc<AtomicBool>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> ConcurrentTaskLoop<T> {
    /// Create a stopped loop. `concurrency` is clamped to at least one.
    pub fn new<D, P>(
        name: impl Into<String>,
        dispatch: D,
        process: P,
        idle_interval: Duration,
        concurrency: usize,
    ) -> Self
    where
        D: FnMut() -> Result<Option<T>, BoxError> + Send + 'static,
        P: Fn(T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            idle_interval,
            max_backoff: DEFAULT_MAX_BACKOFF,
            concurrency: concurrency.max(1),
            dispatch: Arc::new(Mutex::new(Box::new(dispatch))),
            process: Arc::new(process),
            dispatch_health: Arc::new(HealthCounters::default()),
            process_health: Arc::new(HealthCounters::default()),
            running: Mutex::new(None),
        }
    }

    /// Set the cap for the dispatch delay after repeated failures.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Start the dispatcher and worker threads.
    pub fn start(&self) -> Result<(), LoopError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return Err(LoopError::AlreadyStarted(self.name.clone()));
        }

        let stop_dispatch = Arc::new(AtomicBool::new(false));
        let stop_workers = Arc::new(AtomicBool::new(false));
        let slots: Arc<Vec<Slot<T>>> =
            Arc::new((0..self.concurrency).map(|_| Slot::default()).collect());

        let mut workers = Vec::with_capacity(self.concurrency);
        for index in 0..self.concurrency {
            let worker = WorkerThread {
                name: self.name.clone(),
                index,
                slots: slots.clone(),
                process: self.process.clone(),
                health: self.process_health.clone(),
                stop: stop_workers.clone(),
            };
            match thread::Builder::new()
                .name(format!("{}-worker-{}", self.name, index))
                .spawn(move || worker.run())
            {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    stop_workers.store(true, Ordering::SeqCst);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(LoopError::Spawn {
                        name: self.name.clone(),
                        source,
                    });
                }
            }
        }

        let dispatcher = DispatcherThread {
            name: self.name.clone(),
            slots,
            dispatch: self.dispatch.clone(),
            health: self.dispatch_health.clone(),
            stop: stop_dispatch.clone(),
            gate: Gate::new(self.idle_interval, self.max_backoff),
        };
        let dispatcher = match thread::Builder::new()
            .name(format!("{}-dispatcher", self.name))
            .spawn(move || dispatcher.run())
        {
            Ok(handle) => handle,
            Err(source) => {
                stop_workers.store(true, Ordering::SeqCst);
                for handle in workers {
                    let _ = handle.join();
                }
                return Err(LoopError::Spawn {
                    name: self.name.clone(),
                    source,
                });
            }
        };

        debug!(name = %self.name, concurrency = self.concurrency, "Concurrent loop started");
        *running = Some(Running {
            stop_dispatch,
            stop_workers,
            dispatcher,
            workers,
        });
        Ok(())
    }

    /// Stop dispatching, then wait for every worker to finish its item.
    pub fn stop(&self) -> Result<(), LoopError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let Some(running) = running.take() else {
            return Err(LoopError::NotStarted(self.name.clone()));
        };

        running.stop_dispatch.store(true, Ordering::SeqCst);
        if running.dispatcher.join().is_err() {
            warn!(name = %self.name, "Dispatcher thread panicked");
        }

        // No new items can arrive now; workers drain what they hold.
        running.stop_workers.store(true, Ordering::SeqCst);
        for handle in running.workers {
            if handle.join().is_err() {
                warn!(name = %self.name, "Worker thread panicked");
            }
        }

        debug!(name = %self.name, "Concurrent loop stopped");
        Ok(())
    }

    /// Whether the loop threads are running.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Counters for the `dispatch` callback.
    pub fn health(&self) -> LoopHealth {
        self.dispatch_health.snapshot()
    }

    /// Counters for the `process` callback across all workers.
    pub fn process_health(&self) -> LoopHealth {
        self.process_health.snapshot()
    }
}

impl<T: Send + 'static> Drop for ConcurrentTaskLoop<T> {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

enum SlotState<T> {
    Empty,
    Pending(T),
    Busy,
}

/// Single-item mailbox between the dispatcher and one worker.
///
/// Only the dispatcher moves `Empty -> Pending`; only the owning worker moves
/// `Pending -> Busy -> Empty`.
struct Slot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }
}

impl<T> Slot<T> {
    fn is_empty(&self) -> bool {
        matches!(*self.lock(), SlotState::Empty)
    }

    fn put(&self, item: T) {
        let mut state = self.lock();
        debug_assert!(matches!(*state, SlotState::Empty));
        *state = SlotState::Pending(item);
    }

    fn take(&self) -> Option<T> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, SlotState::Busy) {
            SlotState::Pending(item) => Some(item),
            other => {
                *state = other;
                None
            }
        }
    }

    fn release(&self) {
        *self.lock() = SlotState::Empty;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct DispatcherThread<T> {
    name: String,
    slots: Arc<Vec<Slot<T>>>,
    dispatch: Arc<Mutex<Dispatch<T>>>,
    health: Arc<HealthCounters>,
    stop: Arc<AtomicBool>,
    gate: Gate,
}

impl<T> DispatcherThread<T> {
    fn run(mut self) {
        while !self.stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if self.gate.is_open(now) {
                self.gate.mark_invoked(now);

                if let Some(slot) = self.slots.iter().find(|slot| slot.is_empty()) {
                    let result = invoke(|| {
                        let mut dispatch = self.dispatch.lock().unwrap_or_else(|e| e.into_inner());
                        (*dispatch)()
                    });

                    match result {
                        Ok(Some(item)) => {
                            self.health.record_success();
                            self.gate.back_off(0);
                            slot.put(item);
                            // Work is flowing: look for the next free slot right away.
                            self.gate.reopen();
                            continue;
                        }
                        Ok(None) => {
                            self.health.record_success();
                            self.gate.back_off(0);
                        }
                        Err(e) => {
                            let failures = self.health.record_failure();
                            self.gate.back_off(failures);
                            warn!(
                                name = %self.name,
                                consecutive_failures = failures,
                                error = %e,
                                "Dispatch failed"
                            );
                        }
                    }
                }
            }

            thread::sleep(TICK);
        }
    }
}

struct WorkerThread<T> {
    name: String,
    index: usize,
    slots: Arc<Vec<Slot<T>>>,
    process: Process<T>,
    health: Arc<HealthCounters>,
    stop: Arc<AtomicBool>,
}

impl<T> WorkerThread<T> {
    fn run(self) {
        while !self.stop.load(Ordering::SeqCst) {
            if !self.process_next() {
                thread::sleep(TICK);
            }
        }
        self.process_next();
    }

    fn process_next(&self) -> bool {
        let slot = &self.slots[self.index];
        let Some(item) = slot.take() else {
            return false;
        };

        match invoke(|| (self.process)(item)) {
            Ok(()) => self.health.record_success(),
            Err(e) => {
                self.health.record_failure();
                warn!(name = %self.name, worker = self.index, error = %e, "Processing failed");
            }
        }
        slot.release();
        true
    }
}
