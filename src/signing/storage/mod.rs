//! Pluggable storage backends for signing key persistence.
//!
//! This module provides a trait-based storage system that allows different
//! backends to be used for signing key records. The available backends
//! depend on the enabled features.

use crate::signing::error::SigningError;
use crate::signing::query::KeyFilter;
use crate::signing::rate_limit::RateLimiter;
use crate::signing::record::SigningKey;
use async_trait::async_trait;

// Always available
mod memory;
pub use memory::MemoryStorage;

// Feature-gated storage backends
#[cfg(feature = "sqlite-storage")]
mod sqlite;
#[cfg(feature = "sqlite-storage")]
pub use sqlite::SqliteStorage;

#[cfg(feature = "redis-storage")]
mod redis;
#[cfg(feature = "redis-storage")]
pub use redis::RedisStorage;

/// Statistics about the signing key storage backend.
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Total number of records, including inactive and rotated keys
    pub total_records: usize,
    /// Number of records currently marked active
    pub active_records: usize,
    /// Additional backend-specific information
    pub backend_info: String,
}

/// Abstract storage backend for signing key persistence.
///
/// The lifecycle engine depends only on this trait. Implementations own the
/// record schema and must honour the following contract:
///
/// - [`insert`](KeyStorage::insert) enforces uniqueness of `signature` at
///   the storage layer and returns [`SigningError::SignatureCollision`]
///   instead of overwriting. The engine's existence pre-check is racy and
///   is not a substitute.
/// - Stored records are never replaced wholesale. Each mutation
///   ([`deactivate`](KeyStorage::deactivate),
///   [`claim_rotation`](KeyStorage::claim_rotation),
///   [`record_request`](KeyStorage::record_request),
///   [`deactivate_expired`](KeyStorage::deactivate_expired)) is a single
///   atomic step on one record that writes only the fields it owns, so a
///   counter update can never bring back `active` or clear `rotated`.
/// - Backend failures map to [`SigningError::StorageError`].
///
/// # Available Implementations
///
/// - [`MemoryStorage`] - Always available, in-memory HashMap-based storage
/// - `SqliteStorage` - Available with `sqlite-storage` feature, persistent SQLite storage
/// - `RedisStorage` - Available with `redis-storage` feature, shared Redis storage
///
/// # Thread Safety
///
/// All methods are async and must be thread-safe. The engine may be shared
/// by many request handlers calling into the same backend concurrently.
///
/// # Example Implementation
///
/// ```rust
/// use signing_keys::signing::RateLimiter;
/// use signing_keys::storage::{KeyStorage, StorageStats};
/// use signing_keys::{ExpiryReason, KeyFilter, SigningError, SigningKey};
/// use async_trait::async_trait;
/// use std::collections::HashMap;
/// use tokio::sync::RwLock;
///
/// #[derive(Default)]
/// pub struct CustomStorage {
///     data: RwLock<HashMap<String, SigningKey>>,
/// }
///
/// #[async_trait]
/// impl KeyStorage for CustomStorage {
///     async fn get(&self, signature: &str) -> Result<Option<SigningKey>, SigningError> {
///         Ok(self.data.read().await.get(signature).cloned())
///     }
///
///     async fn insert(&self, key: &SigningKey) -> Result<(), SigningError> {
///         let mut data = self.data.write().await;
///         if data.contains_key(&key.signature) {
///             return Err(SigningError::SignatureCollision);
///         }
///         data.insert(key.signature.clone(), key.clone());
///         Ok(())
///     }
///
///     async fn deactivate(&self, signature: &str) -> Result<bool, SigningError> {
///         let mut data = self.data.write().await;
///         let key = data.get_mut(signature).ok_or(SigningError::KeyDoesNotExist)?;
///         let changed = key.active;
///         key.active = false;
///         Ok(changed)
///     }
///
///     async fn claim_rotation(
///         &self,
///         signature: &str,
///         guarded: bool,
///     ) -> Result<SigningKey, SigningError> {
///         let mut data = self.data.write().await;
///         let key = data.get_mut(signature).ok_or(SigningError::KeyDoesNotExist)?;
///         if guarded && key.rotated {
///             return Err(SigningError::AlreadyRotated);
///         }
///         if guarded && !key.active {
///             return Err(SigningError::KeyExpired(ExpiryReason::Inactive));
///         }
///         key.active = false;
///         key.rotated = true;
///         Ok(key.clone())
///     }
///
///     async fn record_request(
///         &self,
///         signature: &str,
///         limiter: &RateLimiter,
///         now: i64,
///     ) -> Result<bool, SigningError> {
///         let mut data = self.data.write().await;
///         let key = data.get_mut(signature).ok_or(SigningError::KeyDoesNotExist)?;
///         Ok(limiter.check(key, now).is_ok())
///     }
///
///     async fn query(&self, filter: &KeyFilter) -> Result<Vec<SigningKey>, SigningError> {
///         let data = self.data.read().await;
///         Ok(data.values().filter(|key| filter.matches(key)).cloned().collect())
///     }
///
///     async fn deactivate_expired(&self, now: i64) -> Result<usize, SigningError> {
///         let mut data = self.data.write().await;
///         let mut count = 0;
///         for key in data.values_mut().filter(|key| key.active && key.expiration <= now) {
///             key.active = false;
///             count += 1;
///         }
///         Ok(count)
///     }
///
///     async fn get_stats(&self) -> Result<StorageStats, SigningError> {
///         let data = self.data.read().await;
///         Ok(StorageStats {
///             total_records: data.len(),
///             active_records: data.values().filter(|key| key.active).count(),
///             backend_info: "Custom storage implementation".to_string(),
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait KeyStorage: Send + Sync {
    /// Optional method for storage backend initialization.
    ///
    /// Called once by the engine builder. Implementations can use this for
    /// schema creation, connection checks, etc.
    async fn init(&self) -> Result<(), SigningError> {
        Ok(())
    }

    /// Retrieves the record for `signature`, if any.
    async fn get(&self, signature: &str) -> Result<Option<SigningKey>, SigningError>;

    /// Checks whether a record exists for `signature`.
    ///
    /// The default implementation delegates to [`get`](KeyStorage::get);
    /// backends with a cheaper existence check should override it.
    async fn exists(&self, signature: &str) -> Result<bool, SigningError> {
        Ok(self.get(signature).await?.is_some())
    }

    /// Stores a new record.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the record was stored
    /// * `Err(SigningError::SignatureCollision)` - If the signature already exists
    /// * `Err(SigningError)` - If there was an error accessing storage
    async fn insert(&self, key: &SigningKey) -> Result<(), SigningError>;

    /// Clears `active` on one record, touching no other field.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If the record was active and is now inactive
    /// * `Ok(false)` - If the record was already inactive
    /// * `Err(SigningError::KeyDoesNotExist)` - If no record has this signature
    async fn deactivate(&self, signature: &str) -> Result<bool, SigningError>;

    /// Atomically marks a record as rotated (`active = false`,
    /// `rotated = true`) and returns it as stored afterwards.
    ///
    /// With `guarded` set, the flip happens only if the record is active and
    /// not yet rotated, so of several concurrent claims exactly one wins.
    ///
    /// # Returns
    ///
    /// * `Ok(key)` - The claimed record
    /// * `Err(SigningError::AlreadyRotated)` - Guarded claim on a rotated record
    /// * `Err(SigningError::KeyExpired(Inactive))` - Guarded claim on an inactive record
    /// * `Err(SigningError::KeyDoesNotExist)` - If no record has this signature
    async fn claim_rotation(
        &self,
        signature: &str,
        guarded: bool,
    ) -> Result<SigningKey, SigningError>;

    /// Applies one request to the record's rate limit window with
    /// [`RateLimiter::check`] semantics, as a single atomic step that writes
    /// only `request_count` and `last_request_time`.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If the request was counted
    /// * `Ok(false)` - If the limit was reached and the request refused
    /// * `Err(SigningError::KeyDoesNotExist)` - If no record has this signature
    async fn record_request(
        &self,
        signature: &str,
        limiter: &RateLimiter,
        now: i64,
    ) -> Result<bool, SigningError>;

    /// Returns every record matching `filter`, in no particular order.
    ///
    /// Must agree with [`KeyFilter::matches`].
    async fn query(&self, filter: &KeyFilter) -> Result<Vec<SigningKey>, SigningError>;

    /// Marks inactive every active record whose expiration is at or before
    /// `now`, returning how many were changed.
    async fn deactivate_expired(&self, now: i64) -> Result<usize, SigningError>;

    /// Returns statistics about the storage backend.
    async fn get_stats(&self) -> Result<StorageStats, SigningError>;
}
