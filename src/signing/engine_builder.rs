use std::sync::Arc;
use std::time::Duration;

use crate::signing::config::SigningConfig;
use crate::signing::engine::SigningEngine;
use crate::signing::error::SigningError;
use crate::signing::generator::{KeyGeneratorFn, default_generator};
use crate::signing::rate_limit::RateLimiter;
use crate::signing::storage::{KeyStorage, MemoryStorage};
use crate::signing::time_utils::{TimeProviderFn, default_time_provider};

#[cfg(feature = "metrics")]
use crate::signing::metrics::{MetricsCollector, NoOpMetricsCollector};

/// A builder for creating a [`SigningEngine`] instance.
///
/// This builder defaults to `MemoryStorage` and [`SigningConfig::default()`]
/// (which honours the `SIGNING_KEYS_*` environment variables).
///
/// # Example
///
/// ```rust
/// use signing_keys::{ConfigPreset, SigningConfig, SigningEngine};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), signing_keys::SigningError> {
/// let engine = SigningEngine::builder()
///     .with_config(SigningConfig::from(ConfigPreset::Production))
///     .with_rate_limit(2, Duration::from_secs(2))
///     .build_and_init()
///     .await?;
/// assert!(engine.config().rate_limiting);
/// # Ok(())
/// # }
/// ```
#[must_use = "The builder does nothing unless `.build_and_init()` is called."]
pub struct SigningEngineBuilder<S: KeyStorage> {
    storage: Arc<S>,
    config: SigningConfig,
    key_generator: Option<KeyGeneratorFn>,
    time_provider: Option<TimeProviderFn>,
    #[cfg(feature = "metrics")]
    metrics_collector: Option<Arc<dyn MetricsCollector>>,
}

impl SigningEngineBuilder<MemoryStorage> {
    pub(crate) fn new() -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
            config: SigningConfig::default(),
            key_generator: None,
            time_provider: None,
            #[cfg(feature = "metrics")]
            metrics_collector: None,
        }
    }
}

impl<S: KeyStorage + 'static> SigningEngineBuilder<S> {
    /// Specifies a custom storage backend to use instead of the default `MemoryStorage`.
    pub fn with_storage<T: KeyStorage + 'static>(self, storage: Arc<T>) -> SigningEngineBuilder<T> {
        SigningEngineBuilder {
            storage,
            config: self.config,
            key_generator: self.key_generator,
            time_provider: self.time_provider,
            #[cfg(feature = "metrics")]
            metrics_collector: self.metrics_collector,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: SigningConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the number of random bytes per generated signature.
    pub fn with_key_strength(mut self, key_strength: usize) -> Self {
        self.config.key_strength = key_strength;
        self
    }

    /// Enables or disables the rotation guards.
    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.config.safe_mode = safe_mode;
        self
    }

    /// Enables rate limiting with `max_requests` per key per `window`.
    pub fn with_rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.config.rate_limiting = true;
        self.config.rate_limit_max_requests = max_requests;
        self.config.rate_limit_window = window;
        self
    }

    /// Sets how many candidate signatures `issue` tries before giving up.
    pub fn with_max_generation_attempts(mut self, attempts: u32) -> Self {
        self.config.max_generation_attempts = attempts;
        self
    }

    /// Replaces the token generator. The function receives the configured
    /// key strength.
    pub fn with_key_generator(mut self, generator: KeyGeneratorFn) -> Self {
        self.key_generator = Some(generator);
        self
    }

    /// Replaces the clock. The function returns Unix milliseconds.
    pub fn with_time_provider(mut self, provider: TimeProviderFn) -> Self {
        self.time_provider = Some(provider);
        self
    }

    /// Records engine events to `collector`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics_collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics_collector = Some(collector);
        self
    }

    /// Builds the engine and initializes its storage backend.
    ///
    /// Configuration warnings from [`SigningConfig::validate`] are logged,
    /// not rejected.
    pub async fn build_and_init(self) -> Result<SigningEngine<S>, SigningError> {
        for warning in self.config.validate() {
            tracing::warn!("{warning}");
        }
        tracing::debug!("{}", self.config.summary());

        let engine = SigningEngine {
            storage: self.storage,
            rate_limiter: RateLimiter::from_config(&self.config),
            config: self.config,
            key_generator: self.key_generator.unwrap_or_else(default_generator),
            time_provider: self.time_provider.unwrap_or_else(default_time_provider),
            #[cfg(feature = "metrics")]
            metrics_collector: self
                .metrics_collector
                .unwrap_or_else(|| Arc::new(NoOpMetricsCollector::new())),
        };
        engine.init().await?;
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::config::ConfigPreset;

    #[tokio::test]
    async fn test_builder_overrides_config() -> Result<(), SigningError> {
        let engine = SigningEngine::builder()
            .with_config(SigningConfig::from(ConfigPreset::HighSecurity))
            .with_safe_mode(false)
            .with_key_strength(32)
            .with_max_generation_attempts(4)
            .build_and_init()
            .await?;

        let config = engine.config();
        assert_eq!(config.key_strength, 32);
        assert!(!config.safe_mode);
        assert!(config.rate_limiting);
        assert_eq!(config.rate_limit_max_requests, 5);
        assert_eq!(config.max_generation_attempts, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_builder_with_custom_storage() -> Result<(), SigningError> {
        let storage = Arc::new(MemoryStorage::new());
        let engine = SigningEngine::builder()
            .with_storage(Arc::clone(&storage))
            .build_and_init()
            .await?;

        engine
            .issue(crate::signing::engine::IssueRequest::new("test"))
            .await?;
        assert_eq!(storage.get_stats().await?.total_records, 1);
        assert!(Arc::ptr_eq(engine.storage(), &storage));
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_attempts_cannot_issue() -> Result<(), SigningError> {
        let engine = SigningEngine::builder()
            .with_max_generation_attempts(0)
            .build_and_init()
            .await?;
        assert!(matches!(
            engine
                .issue(crate::signing::engine::IssueRequest::new("test"))
                .await,
            Err(SigningError::SignatureCollision)
        ));
        Ok(())
    }
}
