//! Monitoring and metrics collection for signing key operations.
//!
//! A pluggable collector receives one [`MetricEvent`] per engine operation.
//! Collection is optional and enabled via the `metrics` feature.

use crate::signing::error::SigningError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of the counters tracked by a collector.
#[derive(Debug, Clone, Default)]
pub struct SigningMetrics {
    /// Total number of keys issued, including rotation successors
    pub keys_issued: u64,
    /// Total number of validation attempts
    pub validation_attempts: u64,
    /// Number of successful validations
    pub validation_successes: u64,
    /// Number of refused validations
    pub validation_failures: u64,
    /// Number of keys rotated
    pub keys_rotated: u64,
    /// Number of requests refused by the rate limiter
    pub rate_limited: u64,
    /// Number of successful storage operations
    pub storage_operations: u64,
    /// Error counts by category
    pub error_counts: ErrorMetrics,
    /// Performance metrics
    pub performance: PerformanceMetrics,
}

/// Error counts, one counter per [`SigningError`] kind.
#[derive(Debug, Clone, Default)]
pub struct ErrorMetrics {
    pub key_does_not_exist: u64,
    pub key_expired: u64,
    pub scope_mismatch: u64,
    pub already_rotated: u64,
    pub rate_limit_exceeded: u64,
    pub no_matching_keys: u64,
    pub signature_collision: u64,
    pub storage_errors: u64,
    pub clock_errors: u64,
    pub serialization_errors: u64,
    /// Codes this collector does not know, from custom event sources
    pub other_errors: u64,
}

/// Performance timing metrics.
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    /// Average time to issue a key (microseconds)
    pub avg_issue_time_us: u64,
    /// Average time to validate a key (microseconds)
    pub avg_validation_time_us: u64,
    /// Average time for storage operations (microseconds)
    pub avg_storage_time_us: u64,
    /// Number of samples used for averages
    pub sample_count: u64,
}

/// Events that can be tracked by the metrics system.
#[derive(Debug, Clone)]
pub enum MetricEvent {
    /// A key was issued
    KeyIssued {
        /// Time taken to generate and store
        duration: Duration,
    },
    /// A validation attempt was made
    ValidationAttempt {
        /// Time taken to validate
        duration: Duration,
        /// Whether the key was accepted
        success: bool,
    },
    /// A key was rotated and a successor issued
    KeyRotated {
        /// Time taken for the whole rotation
        duration: Duration,
    },
    /// A request was refused by the rate limiter
    RateLimited,
    /// A storage operation was performed
    StorageOperation {
        /// Name of the [`KeyStorage`](crate::signing::storage::KeyStorage)
        /// method, such as `get`, `claim_rotation` or `record_request`
        operation: &'static str,
        /// Time taken
        duration: Duration,
        /// Whether operation succeeded
        success: bool,
    },
    /// An error was returned to the caller
    Error {
        /// Stable error code, see [`SigningError::code`]
        error_code: &'static str,
        /// Error message
        error_message: String,
    },
}

impl MetricEvent {
    /// Builds an [`MetricEvent::Error`] from a returned error.
    pub fn from_error(error: &SigningError) -> Self {
        MetricEvent::Error {
            error_code: error.code(),
            error_message: error.to_string(),
        }
    }
}

/// Trait for metrics collection backends.
///
/// All methods must be thread-safe as they may be called concurrently.
///
/// # Example Implementation
///
/// ```rust
/// use signing_keys::signing::{MetricEvent, MetricsCollector, SigningMetrics};
/// use signing_keys::SigningError;
/// use async_trait::async_trait;
/// use tokio::sync::RwLock;
///
/// #[derive(Default)]
/// pub struct IssueCounter {
///     metrics: RwLock<SigningMetrics>,
/// }
///
/// #[async_trait]
/// impl MetricsCollector for IssueCounter {
///     async fn record_event(&self, event: MetricEvent) {
///         if let MetricEvent::KeyIssued { .. } = event {
///             self.metrics.write().await.keys_issued += 1;
///         }
///     }
///
///     async fn get_metrics(&self) -> Result<SigningMetrics, SigningError> {
///         Ok(self.metrics.read().await.clone())
///     }
///
///     async fn reset_metrics(&self) -> Result<(), SigningError> {
///         *self.metrics.write().await = SigningMetrics::default();
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Record a metric event.
    ///
    /// Called inline on every engine operation; must not block.
    async fn record_event(&self, event: MetricEvent);

    /// Get current metrics snapshot.
    async fn get_metrics(&self) -> Result<SigningMetrics, SigningError>;

    /// Reset all metrics to zero.
    async fn reset_metrics(&self) -> Result<(), SigningError>;

    /// Flush any buffered metrics.
    async fn flush(&self) -> Result<(), SigningError> {
        Ok(())
    }
}

/// In-memory metrics collector built on atomic counters.
///
/// # Example
///
/// ```rust
/// use signing_keys::signing::{InMemoryMetricsCollector, MetricEvent, MetricsCollector};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), signing_keys::SigningError> {
/// let collector = InMemoryMetricsCollector::new();
///
/// collector.record_event(MetricEvent::KeyIssued {
///     duration: Duration::from_micros(100),
/// }).await;
///
/// let metrics = collector.get_metrics().await?;
/// assert_eq!(metrics.keys_issued, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMetricsCollector {
    keys_issued: AtomicU64,
    validation_attempts: AtomicU64,
    validation_successes: AtomicU64,
    validation_failures: AtomicU64,
    keys_rotated: AtomicU64,
    rate_limited: AtomicU64,
    storage_operations: AtomicU64,

    // Error counts
    key_does_not_exist_errors: AtomicU64,
    key_expired_errors: AtomicU64,
    scope_mismatch_errors: AtomicU64,
    already_rotated_errors: AtomicU64,
    rate_limit_exceeded_errors: AtomicU64,
    no_matching_keys_errors: AtomicU64,
    signature_collision_errors: AtomicU64,
    storage_errors: AtomicU64,
    clock_errors: AtomicU64,
    serialization_errors: AtomicU64,
    other_errors: AtomicU64,

    // Performance tracking
    issue_time_total: AtomicU64,
    validation_time_total: AtomicU64,
    storage_time_total: AtomicU64,
    issue_samples: AtomicU64,
    validation_samples: AtomicU64,
    storage_samples: AtomicU64,
}

impl InMemoryMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self) -> [&AtomicU64; 24] {
        [
            &self.keys_issued,
            &self.validation_attempts,
            &self.validation_successes,
            &self.validation_failures,
            &self.keys_rotated,
            &self.rate_limited,
            &self.storage_operations,
            &self.key_does_not_exist_errors,
            &self.key_expired_errors,
            &self.scope_mismatch_errors,
            &self.already_rotated_errors,
            &self.rate_limit_exceeded_errors,
            &self.no_matching_keys_errors,
            &self.signature_collision_errors,
            &self.storage_errors,
            &self.clock_errors,
            &self.serialization_errors,
            &self.other_errors,
            &self.issue_time_total,
            &self.validation_time_total,
            &self.storage_time_total,
            &self.issue_samples,
            &self.validation_samples,
            &self.storage_samples,
        ]
    }

    fn average(total: &AtomicU64, samples: u64) -> u64 {
        if samples > 0 {
            total.load(Ordering::Relaxed) / samples
        } else {
            0
        }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[async_trait]
impl MetricsCollector for InMemoryMetricsCollector {
    async fn record_event(&self, event: MetricEvent) {
        match event {
            MetricEvent::KeyIssued { duration } => {
                self.keys_issued.fetch_add(1, Ordering::Relaxed);
                self.issue_time_total
                    .fetch_add(micros(duration), Ordering::Relaxed);
                self.issue_samples.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::ValidationAttempt { duration, success } => {
                self.validation_attempts.fetch_add(1, Ordering::Relaxed);
                if success {
                    self.validation_successes.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.validation_failures.fetch_add(1, Ordering::Relaxed);
                }
                self.validation_time_total
                    .fetch_add(micros(duration), Ordering::Relaxed);
                self.validation_samples.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::KeyRotated { .. } => {
                self.keys_rotated.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::RateLimited => {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::StorageOperation {
                duration, success, ..
            } => {
                if success {
                    self.storage_operations.fetch_add(1, Ordering::Relaxed);
                }
                self.storage_time_total
                    .fetch_add(micros(duration), Ordering::Relaxed);
                self.storage_samples.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::Error { error_code, .. } => {
                let counter = match error_code {
                    "key_does_not_exist" => &self.key_does_not_exist_errors,
                    "key_expired" => &self.key_expired_errors,
                    "scope_mismatch" => &self.scope_mismatch_errors,
                    "already_rotated" => &self.already_rotated_errors,
                    "rate_limit_exceeded" => &self.rate_limit_exceeded_errors,
                    "no_matching_keys" => &self.no_matching_keys_errors,
                    "signature_collision" => &self.signature_collision_errors,
                    "storage_error" => &self.storage_errors,
                    "clock_error" => &self.clock_errors,
                    "serialization_error" => &self.serialization_errors,
                    _ => &self.other_errors,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn get_metrics(&self) -> Result<SigningMetrics, SigningError> {
        let issue_samples = self.issue_samples.load(Ordering::Relaxed);
        let validation_samples = self.validation_samples.load(Ordering::Relaxed);
        let storage_samples = self.storage_samples.load(Ordering::Relaxed);

        Ok(SigningMetrics {
            keys_issued: self.keys_issued.load(Ordering::Relaxed),
            validation_attempts: self.validation_attempts.load(Ordering::Relaxed),
            validation_successes: self.validation_successes.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            keys_rotated: self.keys_rotated.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            storage_operations: self.storage_operations.load(Ordering::Relaxed),
            error_counts: ErrorMetrics {
                key_does_not_exist: self.key_does_not_exist_errors.load(Ordering::Relaxed),
                key_expired: self.key_expired_errors.load(Ordering::Relaxed),
                scope_mismatch: self.scope_mismatch_errors.load(Ordering::Relaxed),
                already_rotated: self.already_rotated_errors.load(Ordering::Relaxed),
                rate_limit_exceeded: self.rate_limit_exceeded_errors.load(Ordering::Relaxed),
                no_matching_keys: self.no_matching_keys_errors.load(Ordering::Relaxed),
                signature_collision: self.signature_collision_errors.load(Ordering::Relaxed),
                storage_errors: self.storage_errors.load(Ordering::Relaxed),
                clock_errors: self.clock_errors.load(Ordering::Relaxed),
                serialization_errors: self.serialization_errors.load(Ordering::Relaxed),
                other_errors: self.other_errors.load(Ordering::Relaxed),
            },
            performance: PerformanceMetrics {
                avg_issue_time_us: Self::average(&self.issue_time_total, issue_samples),
                avg_validation_time_us: Self::average(
                    &self.validation_time_total,
                    validation_samples,
                ),
                avg_storage_time_us: Self::average(&self.storage_time_total, storage_samples),
                sample_count: issue_samples + validation_samples + storage_samples,
            },
        })
    }

    async fn reset_metrics(&self) -> Result<(), SigningError> {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Collector that discards every event; the engine's default.
#[derive(Debug, Default)]
pub struct NoOpMetricsCollector;

impl NoOpMetricsCollector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricsCollector for NoOpMetricsCollector {
    async fn record_event(&self, _event: MetricEvent) {}

    async fn get_metrics(&self) -> Result<SigningMetrics, SigningError> {
        Ok(SigningMetrics::default())
    }

    async fn reset_metrics(&self) -> Result<(), SigningError> {
        Ok(())
    }
}
