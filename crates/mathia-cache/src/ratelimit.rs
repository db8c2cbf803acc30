//! Per-key sliding-window rate limiter. One window of event timestamps per
//! key; atomic take-or-deny on the shared map.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of a `take` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Operations left in the window after this call.
    pub remaining: u32,
    /// When denied, how long until the oldest event leaves the window.
    pub retry_after: Duration,
}

#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Record one operation under `key` if the window has capacity.
    /// Limit N accepts exactly N operations per `window`; the N+1th is
    /// denied with a positive `retry_after`.
    pub fn take(&self, key: &str, limit: u32, window: Duration) -> Decision {
        self.take_at(key, limit, window, Instant::now())
    }

    /// Peek at current usage without consuming a slot.
    pub fn usage(&self, key: &str, window: Duration) -> u32 {
        let now = Instant::now();
        match self.windows.get(key) {
            Some(events) => events.iter().filter(|t| **t + window > now).count() as u32,
            None => 0,
        }
    }

    pub(crate) fn take_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: Instant,
    ) -> Decision {
        let mut events = self.windows.entry(key.to_string()).or_default();

        // evict events that slid out of the window
        while events.front().is_some_and(|t| *t + window <= now) {
            events.pop_front();
        }

        if (events.len() as u32) < limit {
            events.push_back(now);
            return Decision {
                allowed: true,
                remaining: limit - events.len() as u32,
                retry_after: Duration::ZERO,
            };
        }

        let retry_after = events
            .front()
            .map(|oldest| (*oldest + window).saturating_duration_since(now))
            .unwrap_or(window);
        Decision {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(3600);

    #[test]
    fn accepts_exactly_limit_then_rejects() {
        let rl = RateLimiter::new();
        let t0 = Instant::now();

        for i in 0..100 {
            let d = rl.take_at("alice|flights", 100, WINDOW, t0);
            assert!(d.allowed, "call {i} should be allowed");
        }

        let denied = rl.take_at("alice|flights", 100, WINDOW, t0);
        assert!(!denied.allowed);
        assert!(denied.retry_after > Duration::ZERO);
    }

    #[test]
    fn window_slides() {
        let rl = RateLimiter::new();
        let t0 = Instant::now();

        for _ in 0..3 {
            assert!(rl.take_at("k", 3, Duration::from_secs(60), t0).allowed);
        }
        assert!(!rl.take_at("k", 3, Duration::from_secs(60), t0).allowed);

        // 61s later the whole window has slid out
        let later = t0 + Duration::from_secs(61);
        assert!(rl.take_at("k", 3, Duration::from_secs(60), later).allowed);
    }

    #[test]
    fn keys_are_independent() {
        let rl = RateLimiter::new();
        let t0 = Instant::now();

        assert!(rl.take_at("alice|wallet", 1, WINDOW, t0).allowed);
        assert!(!rl.take_at("alice|wallet", 1, WINDOW, t0).allowed);
        // bob is unaffected by alice's exhaustion
        assert!(rl.take_at("bob|wallet", 1, WINDOW, t0).allowed);
    }

    #[test]
    fn retry_after_reflects_oldest_event() {
        let rl = RateLimiter::new();
        let t0 = Instant::now();
        rl.take_at("k", 1, Duration::from_secs(60), t0);

        let denied = rl.take_at("k", 1, Duration::from_secs(60), t0 + Duration::from_secs(20));
        assert_eq!(denied.retry_after, Duration::from_secs(40));
    }
}
