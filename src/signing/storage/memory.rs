//! In-memory storage backend implementation.
//!
//! Uses a HashMap keyed by signature. Suited to tests, development and
//! single-instance deployments where keys need not survive a restart.

use super::{KeyStorage, StorageStats};
use crate::signing::error::{ExpiryReason, SigningError};
use crate::signing::query::KeyFilter;
use crate::signing::rate_limit::RateLimiter;
use crate::signing::record::SigningKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A simple in-memory storage implementation.
///
/// The map sits behind a tokio `RwLock`; every write operation holds the
/// write lock for its whole check-and-modify sequence and changes only the
/// fields it owns in place.
///
/// # Example
///
/// ```rust
/// use signing_keys::storage::{KeyStorage, MemoryStorage};
///
/// # async fn example() -> Result<(), signing_keys::SigningError> {
/// let storage = MemoryStorage::new();
/// assert!(!storage.exists("unknown").await?);
/// assert_eq!(storage.get_stats().await?.total_records, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, SigningKey>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStorage for MemoryStorage {
    async fn get(&self, signature: &str) -> Result<Option<SigningKey>, SigningError> {
        let data = self.data.read().await;
        Ok(data.get(signature).cloned())
    }

    async fn exists(&self, signature: &str) -> Result<bool, SigningError> {
        let data = self.data.read().await;
        Ok(data.contains_key(signature))
    }

    async fn insert(&self, key: &SigningKey) -> Result<(), SigningError> {
        let mut data = self.data.write().await;
        if data.contains_key(&key.signature) {
            return Err(SigningError::SignatureCollision);
        }
        data.insert(key.signature.clone(), key.clone());
        Ok(())
    }

    async fn deactivate(&self, signature: &str) -> Result<bool, SigningError> {
        let mut data = self.data.write().await;
        let key = data
            .get_mut(signature)
            .ok_or(SigningError::KeyDoesNotExist)?;
        let changed = key.active;
        key.active = false;
        Ok(changed)
    }

    async fn claim_rotation(
        &self,
        signature: &str,
        guarded: bool,
    ) -> Result<SigningKey, SigningError> {
        let mut data = self.data.write().await;
        let key = data
            .get_mut(signature)
            .ok_or(SigningError::KeyDoesNotExist)?;

        if guarded {
            if key.rotated {
                return Err(SigningError::AlreadyRotated);
            }
            if !key.active {
                return Err(SigningError::KeyExpired(ExpiryReason::Inactive));
            }
        }

        key.active = false;
        key.rotated = true;
        Ok(key.clone())
    }

    async fn record_request(
        &self,
        signature: &str,
        limiter: &RateLimiter,
        now: i64,
    ) -> Result<bool, SigningError> {
        let mut data = self.data.write().await;
        let key = data
            .get_mut(signature)
            .ok_or(SigningError::KeyDoesNotExist)?;
        Ok(limiter.check(key, now).is_ok())
    }

    async fn query(&self, filter: &KeyFilter) -> Result<Vec<SigningKey>, SigningError> {
        let data = self.data.read().await;
        Ok(data
            .values()
            .filter(|key| filter.matches(key))
            .cloned()
            .collect())
    }

    async fn deactivate_expired(&self, now: i64) -> Result<usize, SigningError> {
        let mut data = self.data.write().await;
        let mut deactivated = 0;
        for key in data
            .values_mut()
            .filter(|key| key.active && key.is_expired_at(now))
        {
            key.active = false;
            deactivated += 1;
        }
        Ok(deactivated)
    }

    async fn get_stats(&self) -> Result<StorageStats, SigningError> {
        let data = self.data.read().await;
        let memory_usage = data.len() * std::mem::size_of::<SigningKey>();
        Ok(StorageStats {
            total_records: data.len(),
            active_records: data.values().filter(|key| key.active).count(),
            backend_info: format!("In-memory HashMap storage (~{memory_usage} bytes)"),
        })
    }
}
