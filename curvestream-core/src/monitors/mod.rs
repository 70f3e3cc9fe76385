//! SpecializedMonitors: narrow subscriptions layered on top of the generic
//! stream manager that watch for specific on-chain signals - pool creation and bonding-curve
//! completion - rather than relying solely on trade-instruction parsing.

pub mod bonding_curve_completion;
pub mod pool_creation;

pub use bonding_curve_completion::BondingCurveCompletionMonitor;
pub use pool_creation::PoolCreationMonitor;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Short-TTL seen-set shared by both monitors to absorb duplicate deliveries of the same
/// on-chain event without growing unbounded.
pub(crate) struct SeenWithTtl {
    ttl: Duration,
    entries: parking_lot::Mutex<VecDeque<(String, Instant)>>,
}

impl SeenWithTtl {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    /// Returns `true` the first time `key` is seen within the TTL window.
    pub(crate) fn insert(&self, key: String) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        while let Some((_, seen_at)) = entries.front() {
            if now.duration_since(*seen_at) > self.ttl {
                entries.pop_front();
            } else {
                break;
            }
        }
        if entries.iter().any(|(k, _)| k == &key) {
            return false;
        }
        entries.push_back((key, now));
        true
    }
}
