//! QPS rate limiting for outbound requests to insurer sites.
//!
//! Every outbound request on the crawl path goes through [`RateLimiter`]:
//! a global token bucket bounds system-wide load, a per-domain bucket bounds
//! load on each insurer, and a per-domain circuit breaker suspends a domain
//! after hostile responses (403/429) or repeated failures.
//!
//! The crawler contract is small: call [`RateLimiter::acquire`] before every
//! request, then [`RateLimiter::record_success`] or
//! [`RateLimiter::record_failure`] with the response status. Circuit-open is
//! a non-retryable error at this layer; the caller decides what to do next.

mod breaker;
mod bucket;

pub use breaker::{BreakerState, CircuitBreaker};
pub use bucket::TokenBucket;

use policyrag_core::LimiterError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

/// Limiter configuration. QPS defaults stay below 1 req/s per compliance
/// guidance for insurer disclosure portals.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub global_qps: f64,
    pub per_domain_qps: f64,
    pub breaker_enabled: bool,
    pub breaker_cooldown: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            global_qps: 0.8,
            per_domain_qps: 0.8,
            breaker_enabled: true,
            breaker_cooldown: Duration::from_secs(300),
        }
    }
}

/// Counters exposed for the CLI status command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimiterStats {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub circuit_trips: u64,
    pub active_domains: usize,
    pub open_breakers: usize,
}

/// Per-domain bucket and breaker, guarded together so record calls serialize
/// with acquire on the same domain.
struct DomainState {
    bucket: TokenBucket,
    breaker: CircuitBreaker,
}

/// Global + per-domain QPS limiter with circuit breaking.
pub struct RateLimiter {
    config: LimiterConfig,
    global: Mutex<TokenBucket>,
    domains: Mutex<HashMap<String, Arc<Mutex<DomainState>>>>,
    stats: Mutex<LimiterStats>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        let global = TokenBucket::new(config.global_qps * 2.0, config.global_qps);
        Self {
            config,
            global: Mutex::new(global),
            domains: Mutex::new(HashMap::new()),
            stats: Mutex::new(LimiterStats::default()),
        }
    }

    /// Registered domain of a request URL; "unknown" when unparseable.
    fn domain_of(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Look up or create the per-domain state. The map lock is held only for
    /// the lookup; bucket and breaker work happens under the domain's own
    /// lock.
    async fn domain_state(&self, domain: &str) -> Arc<Mutex<DomainState>> {
        let mut domains = self.domains.lock().await;
        domains
            .entry(domain.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DomainState {
                    bucket: TokenBucket::new(
                        self.config.per_domain_qps * 2.0,
                        self.config.per_domain_qps,
                    ),
                    breaker: CircuitBreaker::new(self.config.breaker_cooldown),
                }))
            })
            .clone()
    }

    /// Check the domain's breaker, transitioning Open → HalfOpen when the
    /// cooldown has elapsed. Returns the remaining cooldown on refusal.
    async fn check_breaker(&self, state: &Arc<Mutex<DomainState>>, domain: &str) -> Result<(), LimiterError> {
        if !self.config.breaker_enabled {
            return Ok(());
        }
        let mut guard = state.lock().await;
        match guard.breaker.poll() {
            Ok(()) => Ok(()),
            Err(retry_after) => {
                let mut stats = self.stats.lock().await;
                stats.blocked_requests += 1;
                drop(stats);
                Err(LimiterError::CircuitOpen {
                    domain: domain.to_string(),
                    retry_after_secs: retry_after.as_secs(),
                })
            }
        }
    }

    /// Block until a token is available under both the global and the domain
    /// bucket, or fail fast with circuit-open if the domain is tripped.
    ///
    /// Global is acquired first so system-wide load stays bounded even when a
    /// new domain appears. Dropping the future releases nothing: tokens are
    /// only consumed on success.
    pub async fn acquire(&self, url: &str) -> Result<(), LimiterError> {
        let domain = Self::domain_of(url);
        {
            let mut stats = self.stats.lock().await;
            stats.total_requests += 1;
        }

        let state = self.domain_state(&domain).await;
        self.check_breaker(&state, &domain).await?;

        loop {
            let wait = {
                let mut global = self.global.lock().await;
                match global.try_take() {
                    true => break,
                    false => global.time_to_next_token(),
                }
            };
            sleep(wait.min(Duration::from_secs(1))).await;
        }

        loop {
            let wait = {
                let mut guard = state.lock().await;
                match guard.bucket.try_take() {
                    true => break,
                    false => guard.bucket.time_to_next_token(),
                }
            };
            sleep(wait.min(Duration::from_secs(1))).await;
        }

        debug!(domain = %domain, "rate limiter granted");
        Ok(())
    }

    /// Non-blocking variant. Returns false when either bucket is empty or the
    /// breaker refuses; a global token taken for a refused domain is returned.
    pub async fn try_acquire(&self, url: &str) -> Result<bool, LimiterError> {
        let domain = Self::domain_of(url);
        let state = self.domain_state(&domain).await;
        self.check_breaker(&state, &domain).await?;

        let mut global = self.global.lock().await;
        if !global.try_take() {
            return Ok(false);
        }
        let mut guard = state.lock().await;
        if !guard.bucket.try_take() {
            global.put_back();
            return Ok(false);
        }
        Ok(true)
    }

    /// Reset the domain's consecutive-failure counter. In HalfOpen this is
    /// the probe outcome that closes the breaker.
    pub async fn record_success(&self, url: &str) {
        if !self.config.breaker_enabled {
            return;
        }
        let domain = Self::domain_of(url);
        let state = self.domain_state(&domain).await;
        let mut guard = state.lock().await;
        guard.breaker.record_success();
    }

    /// Advance the failure counter. 403/429 trip the breaker immediately;
    /// other failures trip it after three in a row. In HalfOpen any failure
    /// reopens with a fresh cooldown.
    pub async fn record_failure(&self, url: &str, status_code: Option<u16>) {
        if !self.config.breaker_enabled {
            return;
        }
        let domain = Self::domain_of(url);
        let state = self.domain_state(&domain).await;
        let mut guard = state.lock().await;
        let was_open = guard.breaker.is_open();
        guard.breaker.record_failure(status_code);
        if guard.breaker.is_open() && !was_open {
            warn!(domain = %domain, status = ?status_code, "circuit breaker tripped");
            let mut stats = self.stats.lock().await;
            stats.circuit_trips += 1;
        }
    }

    /// Manually reset one domain's breaker (CLI escape hatch).
    pub async fn reset(&self, domain: &str) {
        let domains = self.domains.lock().await;
        if let Some(state) = domains.get(domain) {
            let mut guard = state.lock().await;
            guard.breaker.reset();
        }
    }

    /// Snapshot of limiter counters.
    pub async fn stats(&self) -> LimiterStats {
        let mut stats = self.stats.lock().await.clone();
        let domains = self.domains.lock().await;
        stats.active_domains = domains.len();
        let mut open = 0usize;
        for state in domains.values() {
            if state.lock().await.breaker.is_open() {
                open += 1;
            }
        }
        stats.open_breakers = open;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, pause};

    fn limiter(qps: f64) -> RateLimiter {
        RateLimiter::new(LimiterConfig {
            global_qps: qps,
            per_domain_qps: qps,
            ..Default::default()
        })
    }

    const PINGAN: &str = "https://life.pingan.com/clauses/123.pdf";
    const CHINALIFE: &str = "https://www.chinalife.com.cn/x.pdf";

    #[test]
    fn test_domain_of() {
        assert_eq!(RateLimiter::domain_of(PINGAN), "life.pingan.com");
        assert_eq!(RateLimiter::domain_of("not a url"), "unknown");
    }

    #[tokio::test]
    async fn test_burst_within_capacity() {
        // capacity = 2·QPS, so a QPS of 2 allows 4 immediate grants
        let limiter = limiter(2.0);
        for _ in 0..4 {
            assert!(limiter.try_acquire(PINGAN).await.unwrap());
        }
        assert!(!limiter.try_acquire(PINGAN).await.unwrap());
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_refill() {
        pause();
        let limiter = limiter(1.0);
        // Drain the burst capacity.
        assert!(limiter.try_acquire(PINGAN).await.unwrap());
        assert!(limiter.try_acquire(PINGAN).await.unwrap());
        assert!(!limiter.try_acquire(PINGAN).await.unwrap());

        // With time paused, acquire completes only after the virtual clock
        // advances past one refill interval.
        let fut = limiter.acquire(PINGAN);
        tokio::pin!(fut);
        assert!(
            tokio::time::timeout(Duration::from_millis(0), &mut fut)
                .await
                .is_err()
        );
        advance(Duration::from_secs(2)).await;
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn test_global_token_returned_when_domain_refuses() {
        let limiter = RateLimiter::new(LimiterConfig {
            global_qps: 10.0,
            per_domain_qps: 0.5,
            ..Default::default()
        });
        // Domain bucket holds 1 token (2·0.5); second try must refuse but
        // give the global token back.
        assert!(limiter.try_acquire(PINGAN).await.unwrap());
        assert!(!limiter.try_acquire(PINGAN).await.unwrap());
        // Another domain still gets through: global tokens were not leaked.
        assert!(limiter.try_acquire(CHINALIFE).await.unwrap());
    }

    #[tokio::test]
    async fn test_429_trips_breaker_without_consuming_tokens() {
        let limiter = limiter(5.0);
        limiter.record_failure(PINGAN, Some(429)).await;

        let err = limiter.acquire(PINGAN).await.unwrap_err();
        match err {
            LimiterError::CircuitOpen { domain, retry_after_secs } => {
                assert_eq!(domain, "life.pingan.com");
                assert!(retry_after_secs <= 300);
            }
            other => panic!("expected CircuitOpen, got {other}"),
        }

        // Tokens were not consumed while open: a different domain has a full
        // global bucket minus nothing.
        for _ in 0..10 {
            assert!(limiter.try_acquire(CHINALIFE).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_403_trips_breaker() {
        let limiter = limiter(5.0);
        limiter.record_failure(PINGAN, Some(403)).await;
        assert!(limiter.acquire(PINGAN).await.is_err());
        assert_eq!(limiter.stats().await.circuit_trips, 1);
    }

    #[tokio::test]
    async fn test_three_consecutive_failures_trip() {
        let limiter = limiter(5.0);
        limiter.record_failure(PINGAN, Some(500)).await;
        limiter.record_failure(PINGAN, Some(500)).await;
        assert!(limiter.acquire(PINGAN).await.is_ok());

        limiter.record_failure(PINGAN, Some(500)).await;
        assert!(limiter.acquire(PINGAN).await.is_err());
    }

    #[tokio::test]
    async fn test_success_resets_failure_counter() {
        let limiter = limiter(5.0);
        limiter.record_failure(PINGAN, Some(500)).await;
        limiter.record_failure(PINGAN, Some(500)).await;
        limiter.record_success(PINGAN).await;
        limiter.record_failure(PINGAN, Some(500)).await;
        limiter.record_failure(PINGAN, Some(500)).await;
        // Still below the threshold of three consecutive failures.
        assert!(limiter.acquire(PINGAN).await.is_ok());
    }

    #[tokio::test]
    async fn test_half_open_probe_success_closes() {
        pause();
        let limiter = limiter(5.0);
        limiter.record_failure(PINGAN, Some(429)).await;
        assert!(limiter.acquire(PINGAN).await.is_err());

        advance(Duration::from_secs(301)).await;
        // Exactly one acquire enters HalfOpen; a concurrent second acquire is
        // refused until the probe resolves.
        assert!(limiter.acquire(PINGAN).await.is_ok());
        assert!(limiter.acquire(PINGAN).await.is_err());

        limiter.record_success(PINGAN).await;
        assert!(limiter.acquire(PINGAN).await.is_ok());
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        pause();
        let limiter = limiter(5.0);
        limiter.record_failure(PINGAN, Some(429)).await;
        advance(Duration::from_secs(301)).await;
        assert!(limiter.acquire(PINGAN).await.is_ok());

        limiter.record_failure(PINGAN, Some(500)).await;
        let err = limiter.acquire(PINGAN).await.unwrap_err();
        assert!(matches!(err, LimiterError::CircuitOpen { .. }));

        // A fresh cooldown must elapse before the next probe.
        advance(Duration::from_secs(150)).await;
        assert!(limiter.acquire(PINGAN).await.is_err());
        advance(Duration::from_secs(151)).await;
        assert!(limiter.acquire(PINGAN).await.is_ok());
    }

    #[tokio::test]
    async fn test_breaker_disabled() {
        let limiter = RateLimiter::new(LimiterConfig {
            global_qps: 5.0,
            per_domain_qps: 5.0,
            breaker_enabled: false,
            ..Default::default()
        });
        limiter.record_failure(PINGAN, Some(429)).await;
        assert!(limiter.acquire(PINGAN).await.is_ok());
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let limiter = limiter(5.0);
        limiter.record_failure(PINGAN, Some(429)).await;
        assert!(limiter.acquire(PINGAN).await.is_err());
        limiter.reset("life.pingan.com").await;
        assert!(limiter.acquire(PINGAN).await.is_ok());
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let limiter = limiter(5.0);
        limiter.acquire(PINGAN).await.unwrap();
        limiter.acquire(CHINALIFE).await.unwrap();
        limiter.record_failure(PINGAN, Some(429)).await;
        let _ = limiter.acquire(PINGAN).await;

        let stats = limiter.stats().await;
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.blocked_requests, 1);
        assert_eq!(stats.circuit_trips, 1);
        assert_eq!(stats.active_domains, 2);
        assert_eq!(stats.open_breakers, 1);
    }
}
