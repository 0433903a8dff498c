use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::signing::config::SigningConfig;
use crate::signing::engine_builder::SigningEngineBuilder;
use crate::signing::error::{ExpiryReason, SigningError};
use crate::signing::generator::KeyGeneratorFn;
use crate::signing::rate_limit::RateLimiter;
use crate::signing::record::{Scope, SigningKey};
use crate::signing::storage::{KeyStorage, MemoryStorage};
use crate::signing::time_utils::{TimeProviderFn, expiration_from_hours};

#[cfg(feature = "metrics")]
use crate::signing::metrics::{MetricEvent, MetricsCollector};

/// Parameters for issuing a new signing key.
///
/// Defaults: expires after 1 hour, active, no owner, no predecessor.
///
/// # Example
///
/// ```rust
/// use signing_keys::IssueRequest;
///
/// let request = IssueRequest::new(["test", "task"])
///     .expiration_hours(0) // never expires
///     .email("Owner@Example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct IssueRequest {
    scope: Scope,
    expiration_hours: i64,
    active: bool,
    email: Option<String>,
    previous_key: Option<String>,
}

impl IssueRequest {
    /// Starts a request for a key valid for `scope`. Accepts a single label
    /// or any collection of labels.
    pub fn new(scope: impl Into<Scope>) -> Self {
        Self {
            scope: scope.into(),
            expiration_hours: 1,
            active: true,
            email: None,
            previous_key: None,
        }
    }

    /// Lifetime in hours. `0` never expires; negative values produce a key
    /// that is already expired.
    pub fn expiration_hours(mut self, hours: i64) -> Self {
        self.expiration_hours = hours;
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Associates the key with an owner address (stored lowercased).
    pub fn email(mut self, email: &str) -> Self {
        self.email = SigningKey::normalize_email(email);
        self
    }

    /// Records `previous_key` as the key this one replaces.
    pub fn previous_key(mut self, previous_key: &str) -> Self {
        self.previous_key = Some(previous_key.to_string());
        self
    }
}

/// The signing key lifecycle engine.
///
/// Issues opaque bearer tokens bound to a scope, validates them, expires
/// them and rotates them into successors. All state lives in the storage
/// backend; the engine holds no locks across the steps of an operation and
/// can be shared behind an `Arc`.
///
/// To create an instance, use [`SigningEngine::builder()`].
///
/// # Example
///
/// ```rust
/// use signing_keys::{IssueRequest, SigningEngine, SigningError};
///
/// # async fn example() -> Result<(), SigningError> {
/// let engine = SigningEngine::builder().build_and_init().await?;
///
/// let token = engine
///     .issue(IssueRequest::new(["test", "task"]).expiration_hours(1))
///     .await?;
///
/// engine.validate(&token, "test").await?;
/// assert!(matches!(
///     engine.validate(&token, "other").await,
///     Err(SigningError::ScopeMismatch)
/// ));
///
/// engine.expire(&token).await?;
/// assert!(matches!(
///     engine.validate(&token, "test").await,
///     Err(SigningError::KeyExpired(_))
/// ));
/// # Ok(())
/// # }
/// ```
pub struct SigningEngine<S: KeyStorage> {
    pub(crate) storage: Arc<S>,
    pub(crate) config: SigningConfig,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) key_generator: KeyGeneratorFn,
    pub(crate) time_provider: TimeProviderFn,
    #[cfg(feature = "metrics")]
    pub(crate) metrics_collector: Arc<dyn MetricsCollector>,
}

impl SigningEngine<MemoryStorage> {
    /// Creates a new [`SigningEngineBuilder`].
    ///
    /// The builder defaults to `MemoryStorage`; provide another backend
    /// with `.with_storage()`.
    pub fn builder() -> SigningEngineBuilder<MemoryStorage> {
        SigningEngineBuilder::new()
    }
}

impl<S: KeyStorage + 'static> SigningEngine<S> {
    /// Initializes the storage backend (e.g., creates database tables).
    pub(crate) async fn init(&self) -> Result<(), SigningError> {
        self.storage.init().await
    }

    pub(crate) fn now(&self) -> Result<i64, SigningError> {
        (self.time_provider)()
    }

    /// Awaits one storage call, recording its timing when metrics are on.
    pub(crate) async fn storage_op<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<T, SigningError>
    where
        F: Future<Output = Result<T, SigningError>>,
    {
        #[cfg(feature = "metrics")]
        let started = Instant::now();

        let result = call.await;

        #[cfg(feature = "metrics")]
        self.metrics_collector
            .record_event(MetricEvent::StorageOperation {
                operation,
                duration: started.elapsed(),
                success: result.is_ok(),
            })
            .await;
        #[cfg(not(feature = "metrics"))]
        let _ = operation;

        result
    }

    /// Counts an error returned to the caller when metrics are on.
    pub(crate) async fn record_error(&self, error: &SigningError) {
        #[cfg(feature = "metrics")]
        self.metrics_collector
            .record_event(MetricEvent::from_error(error))
            .await;
        #[cfg(not(feature = "metrics"))]
        let _ = error;
    }

    /// Issues a new signing key and returns its token.
    ///
    /// Candidate signatures are regenerated while one already exists in
    /// storage, up to `max_generation_attempts`. The insert itself is the
    /// authority on uniqueness: a conflicting concurrent insert surfaces as
    /// [`SigningError::SignatureCollision`], which callers may retry.
    pub async fn issue(&self, request: IssueRequest) -> Result<String, SigningError> {
        let started = Instant::now();
        let result = self.issue_record(request).await;

        match &result {
            Ok(_) => {
                tracing::debug!(
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "issued signing key"
                );
                #[cfg(feature = "metrics")]
                self.metrics_collector
                    .record_event(MetricEvent::KeyIssued {
                        duration: started.elapsed(),
                    })
                    .await;
            }
            Err(e) => self.record_error(e).await,
        }

        result
    }

    async fn issue_record(&self, request: IssueRequest) -> Result<String, SigningError> {
        let signature = self.generate_unique_signature().await?;
        let now = self.now()?;

        let key = SigningKey {
            signature,
            scope: request.scope,
            email: request.email,
            active: request.active,
            rotated: false,
            timestamp: now,
            expiration: expiration_from_hours(now, request.expiration_hours),
            expiration_interval: request.expiration_hours,
            previous_key: request.previous_key,
            request_count: 0,
            last_request_time: now,
        };

        self.storage_op("insert", self.storage.insert(&key)).await?;
        tracing::trace!(
            scope = ?key.scope,
            expiration_hours = key.expiration_interval,
            active = key.active,
            "stored signing key"
        );

        Ok(key.signature)
    }

    async fn generate_unique_signature(&self) -> Result<String, SigningError> {
        for attempt in 1..=self.config.max_generation_attempts {
            let candidate = (self.key_generator)(self.config.key_strength);
            if !self.storage_op("exists", self.storage.exists(&candidate)).await? {
                return Ok(candidate);
            }
            tracing::trace!(attempt, "generated signature already in use");
        }
        Err(SigningError::SignatureCollision)
    }

    /// Marks the key inactive. Idempotent.
    ///
    /// Only the `active` flag is written, so a request counted at the same
    /// moment cannot bring the key back.
    pub async fn expire(&self, token: &str) -> Result<(), SigningError> {
        let changed = self
            .storage_op("deactivate", self.storage.deactivate(token))
            .await?;
        tracing::debug!(changed, "expired signing key");
        Ok(())
    }

    /// Returns the stored record for `token`.
    pub async fn lookup(&self, token: &str) -> Result<SigningKey, SigningError> {
        self.storage_op("get", self.storage.get(token))
            .await?
            .ok_or(SigningError::KeyDoesNotExist)
    }

    /// Checks that `token` may be used for at least one of `required_scopes`.
    ///
    /// Checks run in order and stop at the first failure:
    ///
    /// 1. the key exists, else [`SigningError::KeyDoesNotExist`]
    /// 2. the key is active, else `KeyExpired(Inactive)`
    /// 3. the expiration is in the future, else the key is expired as a
    ///    side effect and `KeyExpired(PastExpiration)` is returned
    /// 4. the scopes intersect, else [`SigningError::ScopeMismatch`]
    ///
    /// Does not touch the rate limit counters; see
    /// [`verify`](SigningEngine::verify).
    pub async fn validate(
        &self,
        token: &str,
        required_scopes: impl Into<Scope>,
    ) -> Result<(), SigningError> {
        let required = required_scopes.into();
        let started = Instant::now();

        let result = match self.now() {
            Ok(now) => match self.storage_op("get", self.storage.get(token)).await {
                Ok(Some(key)) => self.check_record(key, &required, now).await,
                Ok(None) => Err(SigningError::KeyDoesNotExist),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        self.observe_validation(started, &result).await;
        result
    }

    async fn check_record(
        &self,
        key: SigningKey,
        required: &Scope,
        now: i64,
    ) -> Result<(), SigningError> {
        if !key.active {
            return Err(SigningError::KeyExpired(ExpiryReason::Inactive));
        }

        if key.is_expired_at(now) {
            self.storage_op("deactivate", self.storage.deactivate(&key.signature))
                .await?;
            return Err(SigningError::KeyExpired(ExpiryReason::PastExpiration));
        }

        if !key.scope.intersects(required) {
            return Err(SigningError::ScopeMismatch);
        }

        Ok(())
    }

    async fn observe_validation(&self, started: Instant, result: &Result<(), SigningError>) {
        let elapsed = started.elapsed();
        match result {
            Ok(()) => {
                tracing::trace!(elapsed_us = elapsed.as_micros() as u64, "signing key accepted")
            }
            Err(e) => tracing::trace!(error = %e, "signing key refused"),
        }

        #[cfg(feature = "metrics")]
        {
            self.metrics_collector
                .record_event(MetricEvent::ValidationAttempt {
                    duration: elapsed,
                    success: result.is_ok(),
                })
                .await;
            if let Err(e) = result {
                self.metrics_collector
                    .record_event(MetricEvent::from_error(e))
                    .await;
            }
        }
    }

    /// Deactivates every active key whose expiration has passed and returns
    /// how many were changed. Records are kept for lineage.
    pub async fn flush_expired(&self) -> Result<usize, SigningError> {
        let now = self.now()?;
        let flushed = self
            .storage_op("deactivate_expired", self.storage.deactivate_expired(now))
            .await?;
        tracing::debug!(flushed, "flushed expired signing keys");
        Ok(flushed)
    }

    /// Returns the configuration the engine was built with.
    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    /// Returns a reference to the storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}
