//! Time sources
//!
//! Every component that reads the current time takes an `Arc<dyn Clock>` so
//! tests can pin or advance time without sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{TimeDelta, Utc};

/// Source of the current time in Unix seconds
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current Unix time in seconds
    fn now(&self) -> i64;

    /// Current Unix time in milliseconds
    fn now_millis(&self) -> i64 {
        self.now() * 1000
    }
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock
///
/// ```rust
/// use chrono::TimeDelta;
/// use turbomcp_tokens::{Clock, ManualClock};
///
/// let clock = ManualClock::at(1_700_000_000);
/// clock.advance(TimeDelta::minutes(30));
/// assert_eq!(clock.now(), 1_700_001_800);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Clock frozen at `unix_seconds`
    pub fn at(unix_seconds: i64) -> Self {
        Self {
            now: AtomicI64::new(unix_seconds),
        }
    }

    /// Shared handle, ready to inject
    pub fn shared(unix_seconds: i64) -> Arc<Self> {
        Arc::new(Self::at(unix_seconds))
    }

    /// Move the clock forward (or backward, for negative deltas)
    pub fn advance(&self, delta: TimeDelta) {
        self.now.fetch_add(delta.num_seconds(), Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, unix_seconds: i64) {
        self.now.store(unix_seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Default shared clock
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
