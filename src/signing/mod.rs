// Core lifecycle components
mod config;
mod engine;
mod engine_builder;
mod error;
mod generator;
mod query;
mod rate_limit;
mod record;
mod rotation;
mod time_utils;

// Storage backends
pub mod storage;

// Metrics (optional feature)
#[cfg(feature = "metrics")]
pub mod metrics;

pub use config::{ConfigPreset, DEFAULT_MAX_GENERATION_ATTEMPTS, SigningConfig};
pub use engine::{IssueRequest, SigningEngine};
pub use engine_builder::SigningEngineBuilder;
pub use error::{ExpiryReason, SigningError};
pub use generator::{DEFAULT_KEY_STRENGTH, KeyGeneratorFn, generate_key};
pub use query::KeyFilter;
pub use rate_limit::RateLimiter;
pub use record::{Scope, SigningKey};
pub use time_utils::{NEVER_EXPIRES, TimeProviderFn};

pub use storage::{KeyStorage, MemoryStorage, StorageStats};

#[cfg(feature = "metrics")]
pub use metrics::{
    ErrorMetrics, InMemoryMetricsCollector, MetricEvent, MetricsCollector, NoOpMetricsCollector,
    PerformanceMetrics, SigningMetrics,
};
