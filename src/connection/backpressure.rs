//! In-flight request bounding.
//!
//! Every stage consumes one token; every acknowledgement or discard
//! returns it.  With the rate-limited strategy, staging blocks once the
//! configured number of requests is in flight.

use std::sync::{Condvar, Mutex};

/// How many requests may be in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureStrategy {
    /// Block staging beyond this many pending requests.
    RateLimitPendingRequests(usize),
    /// Never block staging.
    InfinitePendingRequests,
}

impl Default for BackpressureStrategy {
    fn default() -> Self {
        BackpressureStrategy::RateLimitPendingRequests(32768)
    }
}

/// Counting semaphore applying a [`BackpressureStrategy`].
pub(crate) struct BackpressureApplier {
    limit: Option<usize>,
    in_flight: Mutex<usize>,
    released: Condvar,
}

impl BackpressureApplier {
    pub(crate) fn new(strategy: BackpressureStrategy) -> BackpressureApplier {
        let limit = match strategy {
            BackpressureStrategy::RateLimitPendingRequests(n) => Some(n),
            BackpressureStrategy::InfinitePendingRequests => None,
        };
        BackpressureApplier {
            limit,
            in_flight: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    /// Acquire one token, blocking while the limit is exhausted.
    pub(crate) fn reserve(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(limit) = self.limit {
            while *in_flight >= limit {
                in_flight = self.released.wait(in_flight).unwrap();
            }
        }
        *in_flight += 1;
    }

    /// Return one token.
    pub(crate) fn release(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        debug_assert!(*in_flight > 0, "released more tokens than reserved");
        *in_flight = in_flight.saturating_sub(1);
        self.released.notify_one();
    }
}
