// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - WAF Circuit Breaker
 * Halts probing across all workers after repeated active blocking
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

/// Shared counter of consecutive WAF blocks. Once open it stays open:
/// cool-down is the caller's decision, made by starting a new run.
#[derive(Debug)]
pub struct WafCircuitBreaker {
    threshold: u32,
    consecutive_blocks: AtomicU32,
    total_blocks: AtomicU64,
    open: AtomicBool,
}

impl WafCircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_blocks: AtomicU32::new(0),
            total_blocks: AtomicU64::new(0),
            open: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn state(&self) -> CircuitState {
        if self.is_open() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// A non-blocked response breaks the streak
    pub fn record_success(&self) {
        if self.is_open() {
            return;
        }
        let previous = self.consecutive_blocks.swap(0, Ordering::AcqRel);
        if previous > 0 {
            debug!(previous_blocks = previous, "WAF block streak broken");
        }
    }

    /// Returns true for the single call that trips the breaker
    pub fn record_block(&self) -> bool {
        self.total_blocks.fetch_add(1, Ordering::Relaxed);
        let count = self.consecutive_blocks.fetch_add(1, Ordering::AcqRel) + 1;

        if count < self.threshold {
            debug!(
                consecutive_blocks = count,
                threshold = self.threshold,
                "WAF block recorded"
            );
            return false;
        }

        let tripped = self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if tripped {
            warn!(
                consecutive_blocks = count,
                threshold = self.threshold,
                "Circuit breaker opening: probing halted"
            );
        }
        tripped
    }

    pub fn consecutive_blocks(&self) -> u32 {
        self.consecutive_blocks.load(Ordering::Acquire)
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_opens_after_threshold() {
        let cb = WafCircuitBreaker::new(3);

        assert!(!cb.record_block());
        assert!(!cb.record_block());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.record_block());
        assert_eq!(cb.state(), CircuitState::Open);

        // Only the first crossing reports the trip
        assert!(!cb.record_block());
        assert_eq!(cb.total_blocks(), 4);
    }

    #[test]
    fn test_success_resets_streak() {
        let cb = WafCircuitBreaker::new(3);

        cb.record_block();
        cb.record_block();
        cb.record_success();
        assert_eq!(cb.consecutive_blocks(), 0);

        cb.record_block();
        cb.record_block();
        assert!(!cb.is_open());
    }

    #[test]
    fn test_no_auto_reset() {
        let cb = WafCircuitBreaker::new(1);
        assert!(cb.record_block());

        cb.record_success();
        assert!(cb.is_open());
    }

    #[tokio::test]
    async fn test_trips_once_under_contention() {
        let cb = Arc::new(WafCircuitBreaker::new(5));
        let mut handles = Vec::new();

        for _ in 0..20 {
            let cb = Arc::clone(&cb);
            handles.push(tokio::spawn(async move { cb.record_block() }));
        }

        let mut trips = 0;
        for handle in handles {
            if handle.await.unwrap() {
                trips += 1;
            }
        }

        assert_eq!(trips, 1);
        assert!(cb.is_open());
    }
}
