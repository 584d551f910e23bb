//! Fixed-window rate limiting
//!
//! Each key (normally the client IP) gets `max_requests` per window. The
//! window opens on the key's first request and resets once `window` has
//! elapsed since then. Every call counts, whatever the outcome of the
//! request it guards.
//!
//! Handlers only see the `RateLimiter` trait; the in-process
//! `FixedWindowLimiter` is injected through the application state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        /// Requests left in the current window
        remaining: u32,
    },
    Limited {
        /// Whole seconds until the window resets (at least 1)
        retry_after_secs: u64,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request for `key` and decide whether it may proceed
    async fn check(&self, key: &str) -> RateDecision;

    async fn allow(&self, key: &str) -> bool {
        self.check(key).await.is_allowed()
    }

    /// Drop windows that have already expired
    async fn cleanup(&self);
}

pub type DynRateLimiter = Arc<dyn RateLimiter>;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// In-process fixed-window limiter keyed by string.
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared(max_requests: u32, window: Duration) -> DynRateLimiter {
        Arc::new(Self::new(max_requests, window))
    }

    /// Number of keys currently tracked
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        window.count = window.count.saturating_add(1);
        if window.count <= self.max_requests {
            return RateDecision::Allowed {
                remaining: self.max_requests - window.count,
            };
        }

        let elapsed = now.duration_since(window.started);
        let left = self.window.saturating_sub(elapsed);
        let mut retry_after_secs = left.as_secs();
        if left.subsec_nanos() > 0 {
            retry_after_secs += 1;
        }
        RateDecision::Limited {
            retry_after_secs: retry_after_secs.max(1),
        }
    }

    async fn cleanup(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.started) < self.window);
        let purged = before - windows.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = windows.len(), "Purged stale rate-limit windows");
        }
    }
}

/// Limiter that never refuses, used when rate limiting is disabled
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn check(&self, _key: &str) -> RateDecision {
        RateDecision::Allowed {
            remaining: u32::MAX,
        }
    }

    async fn cleanup(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_limit() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60));

        for expected_remaining in [2, 1, 0] {
            assert_eq!(
                limiter.check("1.2.3.4").await,
                RateDecision::Allowed {
                    remaining: expected_remaining
                }
            );
        }
        assert!(!limiter.allow("1.2.3.4").await);
        assert!(!limiter.allow("1.2.3.4").await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.allow("a").await);
        assert!(!limiter.allow("a").await);
        assert!(limiter.allow("b").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_elapsed() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_millis(1000));

        assert!(limiter.allow("k").await);
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(limiter.allow("k").await);

        // Window is anchored at the first request, not the latest
        tokio::time::advance(Duration::from_millis(400)).await;
        match limiter.check("k").await {
            RateDecision::Limited { retry_after_secs } => assert_eq!(retry_after_secs, 1),
            other => panic!("expected limited, got {:?}", other),
        }

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(limiter.allow("k").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_rounds_up() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(900));

        assert!(limiter.allow("k").await);
        tokio::time::advance(Duration::from_millis(100_500)).await;
        assert_eq!(
            limiter.check("k").await,
            RateDecision::Limited {
                retry_after_secs: 800
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_purges_only_expired() {
        let limiter = FixedWindowLimiter::new(5, Duration::from_secs(10));

        limiter.allow("old").await;
        tokio::time::advance(Duration::from_secs(6)).await;
        limiter.allow("new").await;
        tokio::time::advance(Duration::from_secs(5)).await;

        limiter.cleanup().await;
        assert_eq!(limiter.tracked_keys().await, 1);
        assert!(limiter.allow("new").await);
    }

    #[tokio::test]
    async fn test_concurrent_checks_count_exactly() {
        let limiter = Arc::new(FixedWindowLimiter::new(50, Duration::from_secs(60)));

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.allow("shared").await })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 50);
    }

    #[tokio::test]
    async fn test_unlimited() {
        let limiter = Unlimited;
        for _ in 0..1000 {
            assert!(limiter.allow("x").await);
        }
    }
}
