//! Single-shot flush timer backed by a dedicated worker thread.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use strata_time::{Time, TimeProvider};
use tracing::debug;

/// How often the worker re-reads the time provider while a deadline is
/// armed. The deadline is evaluated through a [`TimeProvider`], which may be
/// mocked and move independently of the wall clock the condvar waits on, so
/// the worker never sleeps past one tick without re-checking.
const TICK: Duration = Duration::from_millis(10);

type FireFn = Box<dyn Fn(u64) + Send + Sync>;

/// A cancellable single-shot timer.
///
/// Each armed deadline carries a generation number, handed to the fire
/// callback. [`cancel`](Self::cancel) disarms without invalidating a fire
/// already dispatched; [`cancel_interrupting`](Self::cancel_interrupting)
/// additionally bumps the generation so the receiver recognises an in-flight
/// fire as stale.
pub(crate) struct FlushScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("FlushScheduler")
            .field("deadline", &state.deadline)
            .field("generation", &state.generation)
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
    time_provider: Arc<dyn TimeProvider>,
}

#[derive(Debug)]
struct State {
    deadline: Option<Deadline>,
    generation: u64,
    shutdown: bool,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Time,
    generation: u64,
}

impl FlushScheduler {
    pub(crate) fn new(time_provider: Arc<dyn TimeProvider>, on_fire: FireFn) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                deadline: None,
                generation: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            time_provider,
        });
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("memstore-flush".to_owned())
                .spawn(move || worker_loop(&shared, on_fire))
                .expect("flush worker thread spawn")
        };
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Arm the timer `delay` from now, superseding any armed deadline.
    /// Returns the deadline's generation.
    pub(crate) fn schedule(&self, delay: Duration) -> u64 {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        state.deadline = Some(Deadline {
            at: self.shared.time_provider.now() + delay,
            generation: state.generation,
        });
        self.shared.wakeup.notify_one();
        state.generation
    }

    /// Disarm without interrupting: a fire already handed to the callback
    /// completes normally.
    pub(crate) fn cancel(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = None;
    }

    /// Disarm and invalidate any in-flight fire.
    pub(crate) fn cancel_interrupting(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = None;
        state.generation += 1;
    }

    /// Stop and join the worker. Idempotent.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.deadline = None;
        }
        self.shared.wakeup.notify_one();

        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() == thread::current().id() {
                // The scheduler is being dropped from its own fire callback;
                // the loop exits on the shutdown flag without a join.
                return;
            }
            if worker.join().is_err() {
                debug!("flush worker exited with a panic");
            }
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, on_fire: FireFn) {
    loop {
        let generation = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                match state.deadline {
                    None => {
                        shared.wakeup.wait(&mut state);
                    }
                    Some(deadline) => {
                        let now = shared.time_provider.now();
                        if now.checked_duration_since(deadline.at).is_some() {
                            state.deadline = None;
                            break deadline.generation;
                        }
                        let wait = deadline
                            .at
                            .checked_duration_since(now)
                            .map_or(TICK, |remaining| remaining.min(TICK));
                        let _ = shared.wakeup.wait_for(&mut state, wait);
                    }
                }
            }
        };
        on_fire(generation);
    }
}
