//! A small bounded worker pool for operations like
//! [`crate::layout::Layout::write_image`]'s concurrent blob writes: the
//! sync-threads analogue of a goroutine errgroup. A counting semaphore
//! caps how many tasks run at once, and the first error any task reports
//! is recorded and checked before each later task starts, so a failure
//! stops new work from beginning without needing to interrupt work already
//! in flight.

use std::sync::{Condvar, Mutex, OnceLock};
use std::thread::Scope;

use crate::error::{Error, Result};

/// Tuning knobs for concurrent operations.
#[derive(Debug, Clone)]
pub struct Options {
    /// How many tasks may run at once.
    pub concurrency: usize,
}

impl Options {
    /// Build options with an explicit concurrency (clamped to at least 1).
    pub fn new(concurrency: usize) -> Self {
        Options { concurrency: concurrency.max(1) }
    }
}

impl Default for Options {
    /// Defaults to the number of available cores.
    fn default() -> Self {
        Options::new(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}

/// A counting semaphore bounding concurrent scoped threads, plus a slot
/// recording the first error any of them hit.
pub struct WorkerPool {
    permits: Mutex<usize>,
    available: Condvar,
    error: OnceLock<Error>,
}

impl WorkerPool {
    /// Build a pool sized by `options.concurrency`.
    pub fn new(options: &Options) -> Self {
        WorkerPool {
            permits: Mutex::new(options.concurrency.max(1)),
            available: Condvar::new(),
            error: OnceLock::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock().expect("worker pool mutex poisoned");
        while *permits == 0 {
            permits = self.available.wait(permits).expect("worker pool mutex poisoned");
        }
        *permits -= 1;
    }

    fn release(&self) {
        *self.permits.lock().expect("worker pool mutex poisoned") += 1;
        self.available.notify_one();
    }

    /// Has any task recorded an error yet?
    pub fn failed(&self) -> bool {
        self.error.get().is_some()
    }

    /// Run each of `tasks` on `scope`, gated by the pool's semaphore. Once
    /// one task has failed, later tasks still acquire and release their
    /// permit (so the pool drains cleanly) but never actually run.
    pub fn run<'scope, 'env, T>(&'scope self, scope: &'scope Scope<'scope, 'env>, tasks: Vec<T>)
    where
        T: FnOnce() -> Result<()> + Send + 'scope,
    {
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            self.acquire();
            if self.failed() {
                self.release();
                continue;
            }
            handles.push(scope.spawn(move || {
                if let Err(e) = task() {
                    let _ = self.error.set(e);
                }
                self.release();
            }));
        }
        for handle in handles {
            handle.join().expect("worker pool thread panicked");
        }
    }

    /// Consume the pool, returning the first recorded error if any task
    /// failed.
    pub fn into_error(mut self) -> Option<Error> {
        self.error.take()
    }
}
