//! Interval-window token bucket with a reservation sub-ledger.
//!
//! The marketplace counts requests per fixed window, so the bucket resets to
//! full once per interval instead of refilling continuously. Reserved tokens
//! are invisible to `can_spend` but survive refills, which is what lets a
//! multi-step operation pre-pay for its recovery call.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::CoreError;
use crate::models::BucketSpec;

#[derive(Debug)]
struct BucketState {
    capacity: u32,
    interval_ms: u64,
    spent: u32,
    reserved: u32,
    last_refill_ms: u64,
}

impl BucketState {
    /// Reset the unreserved pool if at least one whole interval has elapsed.
    /// `last_refill_ms` advances by whole intervals only, never into the
    /// future.
    fn refill(&mut self, now_ms: u64) {
        if self.interval_ms == 0 {
            return;
        }
        let elapsed = now_ms.saturating_sub(self.last_refill_ms);
        if elapsed >= self.interval_ms {
            let intervals = elapsed / self.interval_ms;
            self.spent = 0;
            self.last_refill_ms += intervals * self.interval_ms;
        }
    }

    fn available(&self) -> u32 {
        self.capacity
            .saturating_sub(self.spent)
            .saturating_sub(self.reserved)
    }
}

pub struct TokenBucket {
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    pub fn new(spec: BucketSpec, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            state: Mutex::new(BucketState {
                capacity: spec.max_requests,
                interval_ms: spec.interval_ms,
                spent: 0,
                reserved: 0,
                last_refill_ms: now,
            }),
            clock,
        }
    }

    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        state.refill(self.clock.now_ms());
        state.available()
    }

    pub fn can_spend(&self, n: u32) -> bool {
        self.available() >= n
    }

    pub fn spend(&self, n: u32) -> bool {
        self.acquire(n, 0)
    }

    pub fn reserve(&self, n: u32) -> bool {
        self.acquire(0, n)
    }

    /// Atomically spend and reserve in one step; fails without side effects
    /// when the unreserved pool cannot cover both.
    pub fn acquire(&self, spend: u32, reserve: u32) -> bool {
        let mut state = self.state.lock();
        state.refill(self.clock.now_ms());
        if state.available() < spend + reserve {
            return false;
        }
        state.spent += spend;
        state.reserved += reserve;
        true
    }

    /// Undo an `acquire` that could not be matched on a sibling bucket.
    pub(crate) fn unacquire(&self, spend: u32, reserve: u32) {
        let mut state = self.state.lock();
        state.spent = state.spent.saturating_sub(spend);
        state.reserved = state.reserved.saturating_sub(reserve);
    }

    /// Consume tokens that were previously reserved.
    pub fn spend_reserved(&self, n: u32) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        state.refill(self.clock.now_ms());
        if n > state.reserved {
            return Err(CoreError::Data(format!(
                "spend_reserved({}) exceeds reserved pool of {}",
                n, state.reserved
            )));
        }
        state.reserved -= n;
        state.spent += n;
        Ok(())
    }

    /// Return reserved tokens to the unreserved pool.
    pub fn release_reservation(&self, n: u32) {
        let mut state = self.state.lock();
        state.reserved = state.reserved.saturating_sub(n);
    }

    /// Atomically change the bucket shape. In-flight reservations survive;
    /// the next refill uses the new capacity.
    pub fn reconfigure(&self, spec: BucketSpec) {
        let mut state = self.state.lock();
        state.capacity = spec.max_requests;
        state.interval_ms = spec.interval_ms;
    }

    /// (capacity, spent, reserved, available) after applying any pending
    /// refill; used by the admin readout and tests.
    pub fn snapshot(&self) -> (u32, u32, u32, u32) {
        let mut state = self.state.lock();
        state.refill(self.clock.now_ms());
        (
            state.capacity,
            state.spent,
            state.reserved,
            state.available(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn bucket(capacity: u32, interval_ms: u64) -> (TokenBucket, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let b = TokenBucket::new(
            BucketSpec {
                interval_ms,
                max_requests: capacity,
            },
            clock.clone(),
        );
        (b, clock)
    }

    fn invariant_holds(b: &TokenBucket) {
        let (capacity, spent, reserved, available) = b.snapshot();
        assert!(available + spent + reserved <= capacity);
    }

    #[test]
    fn spend_decrements_until_empty() {
        let (b, _clock) = bucket(3, 1_000);
        assert!(b.spend(2));
        assert_eq!(b.available(), 1);
        assert!(!b.spend(2));
        assert!(b.spend(1));
        assert!(!b.can_spend(1));
        invariant_holds(&b);
    }

    #[test]
    fn refill_at_exact_boundary_refills_once() {
        let (b, clock) = bucket(2, 1_000);
        assert!(b.spend(2));

        clock.advance_ms(1_000);
        assert_eq!(b.available(), 2);
        assert!(b.spend(2));

        // No double refill from the same boundary.
        assert_eq!(b.available(), 0);
        invariant_holds(&b);
    }

    #[test]
    fn refill_advances_by_whole_intervals_only() {
        let (b, clock) = bucket(2, 1_000);
        assert!(b.spend(2));

        clock.advance_ms(2_500);
        assert_eq!(b.available(), 2);
        assert!(b.spend(2));

        // 500ms into the current interval; next refill at 3_000ms.
        clock.advance_ms(400);
        assert_eq!(b.available(), 0);
        clock.advance_ms(100);
        assert_eq!(b.available(), 2);
    }

    #[test]
    fn reservations_survive_refill() {
        let (b, clock) = bucket(3, 1_000);
        assert!(b.reserve(1));
        assert!(b.spend(2));
        assert_eq!(b.available(), 0);

        clock.advance_ms(1_000);
        // Unreserved pool resets to capacity - reserved.
        assert_eq!(b.available(), 2);
        assert!(b.spend_reserved(1).is_ok());
        assert_eq!(b.available(), 2);
        invariant_holds(&b);
    }

    #[test]
    fn spend_reserved_beyond_pool_errors() {
        let (b, _clock) = bucket(3, 1_000);
        assert!(b.reserve(1));
        assert!(b.spend_reserved(2).is_err());
        assert!(b.spend_reserved(1).is_ok());
    }

    #[test]
    fn release_returns_tokens_to_pool() {
        let (b, _clock) = bucket(3, 1_000);
        assert!(b.reserve(2));
        assert_eq!(b.available(), 1);
        b.release_reservation(2);
        assert_eq!(b.available(), 3);
        invariant_holds(&b);
    }

    #[test]
    fn acquire_is_all_or_nothing() {
        let (b, _clock) = bucket(2, 1_000);
        assert!(!b.acquire(2, 1));
        assert_eq!(b.available(), 2);
        assert!(b.acquire(1, 1));
        assert_eq!(b.available(), 0);
    }

    #[test]
    fn reconfigure_takes_effect_on_next_refill() {
        let (b, clock) = bucket(2, 1_000);
        assert!(b.reserve(1));
        assert!(b.spend(1));

        b.reconfigure(BucketSpec {
            interval_ms: 500,
            max_requests: 5,
        });

        // Reservation survives; new capacity visible immediately for the
        // unreserved headroom, fully after the refill.
        clock.advance_ms(500);
        assert_eq!(b.available(), 4);
        assert!(b.spend_reserved(1).is_ok());
        invariant_holds(&b);
    }
}
