//! Per-key fixed-window request limiting.

use std::time::Duration;

use crate::signing::config::SigningConfig;
use crate::signing::engine::SigningEngine;
use crate::signing::error::SigningError;
use crate::signing::record::{Scope, SigningKey};
use crate::signing::storage::KeyStorage;
use crate::signing::time_utils::window_elapsed;

#[cfg(feature = "metrics")]
use crate::signing::metrics::MetricEvent;

/// Counts requests against a signing key's own window fields.
///
/// The limiter holds no state of its own: the counter and window start live
/// on the [`SigningKey`] record, so limits are shared by every engine
/// instance pointed at the same storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    enabled: bool,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_requests: u32, window: Duration) -> Self {
        Self {
            enabled,
            max_requests,
            window,
        }
    }

    pub fn from_config(config: &SigningConfig) -> Self {
        Self::new(
            config.rate_limiting,
            config.rate_limit_max_requests,
            config.rate_limit_window,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Applies one request at `now` to `key`.
    ///
    /// Resets the counter once `window` has elapsed since
    /// `last_request_time`, refuses with [`SigningError::RateLimitExceeded`]
    /// when the counter has reached the limit, and otherwise counts the
    /// request. The caller persists `key` afterwards; a refusal may still
    /// have reset the window.
    pub fn check(&self, key: &mut SigningKey, now: i64) -> Result<(), SigningError> {
        if !self.enabled {
            return Ok(());
        }

        if window_elapsed(key.last_request_time, now, self.window) {
            key.request_count = 0;
            key.last_request_time = now;
        }

        if key.request_count >= self.max_requests {
            return Err(SigningError::RateLimitExceeded);
        }

        key.request_count += 1;
        key.last_request_time = now;
        Ok(())
    }
}

impl<S: KeyStorage + 'static> SigningEngine<S> {
    /// Validates `token` for `required_scopes`, counting the request against
    /// the key's rate limit first.
    ///
    /// With rate limiting disabled this is exactly
    /// [`validate`](SigningEngine::validate). A request refused by the
    /// limiter is not validated. The count is taken by the storage backend
    /// in one step, so concurrent callers never exceed the limit between
    /// them and never overwrite the key's lifecycle flags.
    pub async fn verify(
        &self,
        token: &str,
        required_scopes: impl Into<Scope>,
    ) -> Result<(), SigningError> {
        if !self.rate_limiter.is_enabled() {
            return self.validate(token, required_scopes).await;
        }

        let required = required_scopes.into();
        let now = self.now()?;

        let counted = self
            .storage_op(
                "record_request",
                self.storage.record_request(token, &self.rate_limiter, now),
            )
            .await;

        match counted {
            Ok(true) => self.validate(token, required).await,
            Ok(false) => {
                tracing::trace!(
                    max_requests = self.rate_limiter.max_requests(),
                    "signing key rate limited"
                );
                #[cfg(feature = "metrics")]
                self.metrics_collector.record_event(MetricEvent::RateLimited).await;
                let error = SigningError::RateLimitExceeded;
                self.record_error(&error).await;
                Err(error)
            }
            Err(SigningError::KeyDoesNotExist) => self.validate(token, required).await,
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::engine::IssueRequest;
    use crate::signing::error::ExpiryReason;

    fn key() -> SigningKey {
        SigningKey {
            signature: "sig".to_string(),
            scope: Scope::from("test"),
            email: None,
            active: true,
            rotated: false,
            timestamp: 0,
            expiration: i64::MAX,
            expiration_interval: 1,
            previous_key: None,
            request_count: 0,
            last_request_time: 0,
        }
    }

    #[test]
    fn test_limiter_counts_and_refuses() {
        let limiter = RateLimiter::new(true, 2, Duration::from_secs(2));
        let mut key = key();

        assert!(limiter.check(&mut key, 100).is_ok());
        assert!(limiter.check(&mut key, 200).is_ok());
        assert_eq!(key.request_count, 2);
        assert_eq!(key.last_request_time, 200);

        assert!(matches!(
            limiter.check(&mut key, 300),
            Err(SigningError::RateLimitExceeded)
        ));
        assert_eq!(key.request_count, 2);
    }

    #[test]
    fn test_limiter_resets_after_window() {
        let limiter = RateLimiter::new(true, 2, Duration::from_secs(2));
        let mut key = key();
        key.request_count = 2;
        key.last_request_time = 1_000;

        assert!(limiter.check(&mut key, 2_999).is_err());
        assert!(limiter.check(&mut key, 3_000).is_ok());
        assert_eq!(key.request_count, 1);
        assert_eq!(key.last_request_time, 3_000);
    }

    #[test]
    fn test_disabled_limiter_leaves_key_untouched() {
        let limiter = RateLimiter::new(false, 0, Duration::ZERO);
        let mut key = key();
        assert!(limiter.check(&mut key, 5_000).is_ok());
        assert_eq!(key, self::key());
    }

    #[test]
    fn test_zero_limit_refuses_everything() {
        let limiter = RateLimiter::new(true, 0, Duration::from_secs(60));
        let mut key = key();
        assert!(limiter.check(&mut key, 1).is_err());
    }

    #[tokio::test]
    async fn test_verify_without_rate_limiting_is_validate() -> Result<(), SigningError> {
        let engine = SigningEngine::builder().build_and_init().await?;
        let token = engine.issue(IssueRequest::new("test")).await?;

        for _ in 0..20 {
            engine.verify(&token, "test").await?;
        }
        assert_eq!(engine.lookup(&token).await?.request_count, 0);
        assert!(matches!(
            engine.verify("missing", "test").await,
            Err(SigningError::KeyDoesNotExist)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_verify_counts_against_stored_record() -> Result<(), SigningError> {
        let now = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(1_700_000_000_000));
        let clock = std::sync::Arc::clone(&now);
        let engine = SigningEngine::builder()
            .with_rate_limit(2, Duration::from_secs(2))
            .with_time_provider(Box::new(move || {
                Ok(clock.load(std::sync::atomic::Ordering::SeqCst))
            }))
            .build_and_init()
            .await?;

        let token = engine.issue(IssueRequest::new("test")).await?;
        engine.verify(&token, "test").await?;
        engine.verify(&token, "test").await?;
        assert!(matches!(
            engine.verify(&token, "test").await,
            Err(SigningError::RateLimitExceeded)
        ));

        now.fetch_add(2_000, std::sync::atomic::Ordering::SeqCst);
        engine.verify(&token, "test").await?;
        assert_eq!(engine.lookup(&token).await?.request_count, 1);

        // Counted requests still run full validation.
        assert!(matches!(
            engine.verify(&token, "other").await,
            Err(SigningError::ScopeMismatch)
        ));
        assert_eq!(engine.lookup(&token).await?.request_count, 2);

        engine.expire(&token).await?;
        now.fetch_add(2_000, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            engine.verify(&token, "test").await,
            Err(SigningError::KeyExpired(ExpiryReason::Inactive))
        ));
        Ok(())
    }
}
