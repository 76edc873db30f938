//! Shutdown signalling shared by worker threads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Inner {
    set: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

/// One-shot stop flag that sleeping threads can wait on.
///
/// Cloning gives another handle to the same flag.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter
    pub fn trigger(&self) {
        let _guard = self.inner.lock.lock();
        self.inner.set.store(true, Ordering::SeqCst);
        self.inner.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout` or until triggered. Returns `true` if triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_set() {
            if self.inner.cond.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_set()
    }

    /// Block until triggered
    pub fn wait(&self) {
        let mut guard = self.inner.lock.lock();
        while !self.is_set() {
            self.inner.cond.wait(&mut guard);
        }
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal").field("set", &self.is_set()).finish()
    }
}
