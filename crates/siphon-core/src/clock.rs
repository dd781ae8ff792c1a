//! Time sources for session start and end stamps.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::Timestamp;

pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to. Used for replaying recorded events.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_millis(&self) -> Timestamp {
        (**self).now_millis()
    }
}
