//! Randomized truncated exponential backoff for listen windows

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveBackoff {
    base_ns: u64,
    max_shift: u32,
}

impl ReceiveBackoff {
    pub fn new(base_ns: u64, max_shift: u32) -> Self {
        Self {
            base_ns,
            max_shift: max_shift.min(63),
        }
    }

    pub fn base_ns(&self) -> u64 {
        self.base_ns
    }

    /// Upper bound of the window for `attempt`: `base << attempt`, saturating.
    pub fn ceiling_ns(&self, attempt: u32) -> u64 {
        let shift = attempt.min(self.max_shift);
        self.base_ns.saturating_mul(1u64 << shift)
    }

    /// Window for `attempt`: exactly the base on the first attempt, then uniform in `[base, ceiling]`.
    pub fn window_ns<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> u64 {
        if attempt == 0 {
            return self.base_ns;
        }
        rng.random_range(self.base_ns..=self.ceiling_ns(attempt))
    }

    pub fn window<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        Duration::from_nanos(self.window_ns(attempt, rng))
    }
}
