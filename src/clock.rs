//! Server Clock
//!
//! A single clock value is created at startup and shared by the keyspace,
//! the eviction sweeper, and the command handlers. All expiry arithmetic
//! goes through it instead of calling `Instant::now()` directly, which gives
//! tests a seam: `advance()` shifts the clock forward without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic clock with a test-adjustable forward offset.
///
/// `now()` is `Instant::now()` plus the accumulated offset. Real deployments
/// never call `advance()`, so the offset stays zero and the clock behaves
/// exactly like the system monotonic clock.
#[derive(Debug)]
pub struct Clock {
    /// Instant the clock was created; LRU stamps are measured from here.
    started: Instant,
    /// Accumulated test offset in milliseconds.
    offset_ms: AtomicU64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Current monotonic time, including any test offset.
    pub fn now(&self) -> Instant {
        Instant::now() + Duration::from_millis(self.offset_ms.load(Ordering::Relaxed))
    }

    /// Milliseconds elapsed since the clock was created.
    ///
    /// Used as the LRU access stamp: it fits in a `u64`, is monotone, and is
    /// cheap to store atomically.
    pub fn elapsed_ms(&self) -> u64 {
        (self.now() - self.started).as_millis() as u64
    }

    /// Current wall-clock time in milliseconds since the Unix epoch,
    /// including any test offset. Used by EXPIREAT/PEXPIREAT conversions
    /// and the TIME command.
    pub fn wall_ms(&self) -> u64 {
        let base = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        base + self.offset_ms.load(Ordering::Relaxed)
    }

    /// Converts a wall-clock deadline (ms since epoch) to a monotonic
    /// instant. Deadlines already in the past map to `now()`, which makes
    /// the key expire on next contact.
    pub fn instant_at_wall_ms(&self, at_ms: u64) -> Instant {
        let now_wall = self.wall_ms();
        if at_ms <= now_wall {
            self.now()
        } else {
            self.now() + Duration::from_millis(at_ms - now_wall)
        }
    }

    /// Shifts the clock forward. Test-only in spirit; harmless elsewhere.
    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
