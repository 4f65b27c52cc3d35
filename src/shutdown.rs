//! Cooperative shutdown signalling.
//!
//! One process-wide flag, observed by everything that blocks: workers poll
//! it between network calls and wait on its condvar during pacing sleeps,
//! the poll loop checks it between long-poll requests, and the signal
//! handlers raise it. Raising the flag is idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Shared shutdown state: a flag plus a condvar for interruptible sleeps.
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Shutdown {
    pub fn new() -> Shutdown {
        Shutdown {
            requested: Arc::new(AtomicBool::new(false)),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// The raw flag, for signal-handler registration. Signal delivery sets
    /// the flag but cannot notify the condvar; sleepers poll the deadline in
    /// bounded waits so they still notice.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.requested)
    }

    /// True once shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    /// Requests shutdown and wakes every sleeper.
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::Relaxed);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.condvar.notify_all();
    }

    /// Sleeps for `duration` unless shutdown interrupts it first.
    ///
    /// Returns `true` when the full interval elapsed and `false` when
    /// shutdown was requested before it did. Waits in bounded slices so a
    /// flag raised from a signal handler (no condvar notification) is
    /// still seen promptly.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(200);
        let deadline = Instant::now() + duration;

        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.requested.load(Ordering::Relaxed) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let wait = (deadline - now).min(SLICE);
            let (next_guard, _timeout) = self
                .condvar
                .wait_timeout(guard, wait)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next_guard;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Shutdown::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unrequested_and_trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_requested());
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_requested());
    }

    #[test]
    fn sleep_completes_when_not_interrupted() {
        let shutdown = Shutdown::new();
        let started = Instant::now();
        assert!(shutdown.sleep(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn sleep_returns_immediately_when_already_requested() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let started = Instant::now();
        assert!(!shutdown.sleep(Duration::from_secs(60)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn trigger_interrupts_a_sleeping_thread() {
        let shutdown = Arc::new(Shutdown::new());
        let sleeper = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || shutdown.sleep(Duration::from_secs(60)))
        };
        std::thread::sleep(Duration::from_millis(50));
        shutdown.trigger();
        assert!(!sleeper.join().unwrap(), "sleep should report interruption");
    }

    #[test]
    fn flag_raised_externally_is_noticed_within_a_slice() {
        let shutdown = Arc::new(Shutdown::new());
        let flag = shutdown.flag();
        let sleeper = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || shutdown.sleep(Duration::from_secs(60)))
        };
        std::thread::sleep(Duration::from_millis(50));
        // As a signal handler would: set the flag without notifying.
        flag.store(true, Ordering::Relaxed);
        assert!(!sleeper.join().unwrap());
    }
}
