use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// Injectable monotonic millisecond clock.
///
/// Every deadline in the session layer is computed against this trait
/// instead of calling `Instant::now()`/`SystemTime::now()` directly, so
/// tests can drive the state machines deterministically.
pub trait Clock {
    /// Milliseconds since an arbitrary, monotonically increasing epoch.
    ///
    /// Only deltas between two calls are meaningful; callers must not
    /// assume this lines up with wall-clock time.
    fn now_millis(&self) -> i64;
}

/// Real-time clock backed by the system clock.
///
/// Not perfectly monotonic across NTP adjustments, but adequate for the
/// second-and-millisecond-granularity deadlines used by the session layer;
/// production deployments that need hardened monotonicity can supply their
/// own [`Clock`] impl over `Instant`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64
    }
}

/// Clock controlled by the test driver, advanced explicitly via [`TestClock::advance`]
/// or [`TestClock::set`].
#[derive(Debug, Default)]
pub struct TestClock {
    millis: AtomicI64,
}

impl TestClock {
    pub fn new(start_millis: i64) -> TestClock {
        TestClock {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, delta_millis: i64) {
        self.millis.fetch_add(delta_millis, Ordering::Relaxed);
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::Relaxed);
    }
}

impl Clock for TestClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::Relaxed)
    }
}
