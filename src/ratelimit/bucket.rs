use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::ratelimit::{ConsumptionProbe, RateLimitPolicy};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Fixed-capacity bucket with greedy periodic refill.
///
/// Refill is computed lazily on every consume: all whole periods elapsed since
/// `last_refill` are credited at once and `last_refill` moves forward by exactly
/// those periods, so partial progress toward the next refill is kept.
pub struct TokenBucket {
    capacity: u64,
    refill_tokens: u64,
    refill_period: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    available: u64,
    last_refill: Instant,
    last_seen: Instant,
    retired: bool,
}

impl TokenBucket {
    pub fn new(policy: &RateLimitPolicy, now: Instant) -> Self {
        Self {
            capacity: policy.capacity,
            refill_tokens: policy.refill_tokens,
            refill_period: policy.refill_period,
            state: Mutex::new(BucketState {
                available: policy.capacity,
                last_refill: now,
                last_seen: now,
                retired: false,
            }),
        }
    }

    /// Returns `None` once the bucket has been retired by eviction; the caller
    /// must look the key up again.
    pub fn try_consume(&self, tokens: u64, now: Instant) -> Option<ConsumptionProbe> {
        let mut state = self.state.lock();
        if state.retired {
            return None;
        }
        self.refill(&mut state, now);
        if now > state.last_seen {
            state.last_seen = now;
        }

        if state.available >= tokens {
            state.available -= tokens;
            return Some(ConsumptionProbe {
                consumed: true,
                remaining_tokens: state.available,
                nanos_to_wait_for_refill: 0,
            });
        }

        Some(ConsumptionProbe {
            consumed: false,
            remaining_tokens: state.available,
            nanos_to_wait_for_refill: self.nanos_until_available(&state, tokens, now),
        })
    }

    /// Retires the bucket if it has sat unused for `idle` and is back at
    /// capacity, so replacing it with a fresh bucket is unobservable. A retired
    /// bucket refuses every later consume.
    pub fn retire_if_idle(&self, now: Instant, idle: Duration) -> bool {
        let mut state = self.state.lock();
        if state.retired {
            return true;
        }
        if now.saturating_duration_since(state.last_seen) < idle {
            return false;
        }
        if self.project(&state, now).0 < self.capacity {
            return false;
        }
        state.retired = true;
        true
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        if let (available, Some(remainder)) = self.project(state, now) {
            state.available = available;
            state.last_refill = now.checked_sub(remainder).unwrap_or(now);
        }
    }

    /// Token count at `now`, plus the progress into the current period when at
    /// least one whole period has elapsed.
    fn project(&self, state: &BucketState, now: Instant) -> (u64, Option<Duration>) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_nanos();
        let period = self.refill_period.as_nanos();
        let periods = elapsed / period;
        if periods == 0 {
            return (state.available, None);
        }

        let credited = periods.saturating_mul(u128::from(self.refill_tokens));
        let available = u128::from(state.available)
            .saturating_add(credited)
            .min(u128::from(self.capacity)) as u64;

        (available, Some(nanos_to_duration(elapsed % period)))
    }

    fn nanos_until_available(&self, state: &BucketState, tokens: u64, now: Instant) -> u64 {
        if tokens > self.capacity {
            return u64::MAX;
        }

        let deficit = tokens - state.available;
        let periods_needed = u128::from(deficit.div_ceil(self.refill_tokens));
        let ready_after = periods_needed.saturating_mul(self.refill_period.as_nanos());
        let since_refill = now.saturating_duration_since(state.last_refill).as_nanos();

        u64::try_from(ready_after.saturating_sub(since_refill)).unwrap_or(u64::MAX)
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
}
