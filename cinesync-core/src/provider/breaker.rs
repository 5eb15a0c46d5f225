//! Sliding-window circuit breaker for vendor backends.
//!
//! Counts outcomes over the last `window` (bounded to `sample` entries).
//! When more than half of a full sample failed, the breaker opens and
//! fast-fails callers; after a cool-down one probe request is let through
//! and its outcome closes or re-opens the circuit.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Number of outcomes that constitute a full sample.
    pub sample: usize,
    /// Age limit for counted outcomes.
    pub window: Duration,
    /// How long the circuit stays open before a probe is allowed.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            sample: 25,
            window: Duration::from_secs(15),
            cooldown: Duration::from_secs(15),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct SlidingWindowBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl SlidingWindowBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
            }),
        }
    }

    fn trim(&self, inner: &mut BreakerInner) {
        let cutoff = Instant::now() - self.config.window;
        while inner
            .outcomes
            .front()
            .is_some_and(|(at, _)| *at < cutoff)
        {
            inner.outcomes.pop_front();
        }
        while inner.outcomes.len() > self.config.sample {
            inner.outcomes.pop_front();
        }
    }

    /// Whether a request may proceed right now.
    #[must_use]
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.cooldown);
                if cooled {
                    // Exactly one probe passes while half-open.
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
            inner.outcomes.clear();
            return;
        }
        inner.outcomes.push_back((Instant::now(), true));
        self.trim(&mut inner);
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            return;
        }
        inner.outcomes.push_back((Instant::now(), false));
        self.trim(&mut inner);

        if inner.outcomes.len() >= self.config.sample {
            let failures = inner.outcomes.iter().filter(|(_, ok)| !ok).count();
            if failures * 2 > inner.outcomes.len() {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }
}

impl Default for SlidingWindowBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(sample: usize) -> SlidingWindowBreaker {
        SlidingWindowBreaker::new(BreakerConfig {
            sample,
            window: Duration::from_secs(60),
            cooldown: Duration::from_millis(10),
        })
    }

    #[test]
    fn test_closed_allows() {
        let b = breaker(4);
        assert!(b.allow());
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_failed_sample() {
        let b = breaker(4);
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn test_probe_after_cooldown_closes_on_success() {
        let b = breaker(4);
        for _ in 0..4 {
            b.record_failure();
        }
        std::thread::sleep(Duration::from_millis(20));

        // One probe allowed, others rejected while it is in flight.
        assert!(b.allow());
        assert!(!b.allow());

        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let b = breaker(4);
        for _ in 0..4 {
            b.record_failure();
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(b.allow());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn test_mixed_outcomes_stay_closed() {
        let b = breaker(4);
        for _ in 0..10 {
            b.record_success();
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
