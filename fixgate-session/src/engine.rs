//! The single-threaded cooperative owner of a sweep of sessions (§4.6,
//! §5): each tick it polls every session once and uses the aggregate
//! progress count to drive an adaptive idle strategy — any progress resets
//! to a busy-spin sweep, a fully idle sweep backs off with bounded
//! exponential sleep. This is the same shape as the teacher's
//! tokio-`select!`-based input/output loops, reimplemented without an
//! async runtime.

use std::time::Duration;

/// A session the engine can drive. `FixSession`/`Ilink3Session` are wrapped
/// in a small adapter closure (see the bundled demo) rather than
/// implementing this directly, since their `poll` signatures carry
/// protocol-specific publication/store/handler type parameters the engine
/// itself doesn't need to know about.
pub trait Pollable {
    fn poll(&mut self, now_ms: i64) -> bool;
}

pub struct IdleStrategy {
    min_backoff: Duration,
    max_backoff: Duration,
    current: Duration,
}

impl IdleStrategy {
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> IdleStrategy {
        IdleStrategy {
            min_backoff,
            max_backoff,
            current: min_backoff,
        }
    }

    /// Call after each sweep with whether any session made progress.
    /// Returns how long the engine should idle before the next sweep.
    pub fn on_sweep(&mut self, progressed: bool) -> Duration {
        if progressed {
            self.current = self.min_backoff;
            Duration::ZERO
        } else {
            let next = self.current * 2;
            self.current = next.min(self.max_backoff);
            self.current
        }
    }
}

impl Default for IdleStrategy {
    fn default() -> IdleStrategy {
        IdleStrategy::new(Duration::from_micros(50), Duration::from_millis(50))
    }
}

/// Drives one sweep across `sessions`, returning how many made progress.
/// The caller owns the actual clock/sleep loop (and, in the demo binary,
/// the socket polling that feeds inbound bytes); this just encapsulates
/// the sweep-and-backoff policy so it can be unit tested without I/O.
pub fn sweep(sessions: &mut [Box<dyn Pollable>], now_ms: i64) -> usize {
    sessions.iter_mut().filter(|s| s.poll(now_ms)).count()
}
