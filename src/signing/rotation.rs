//! Key rotation and lineage traversal.
//!
//! Rotating a key deactivates it, marks it rotated and issues a successor
//! that points back at it through `previous_key`. The source is claimed in
//! storage before the successor is issued, so a failure in between leaves a
//! deactivated key without a successor rather than two live keys.

use std::collections::HashSet;
use std::time::Instant;

use crate::signing::engine::{IssueRequest, SigningEngine};
use crate::signing::error::SigningError;
use crate::signing::query::KeyFilter;
use crate::signing::record::{Scope, SigningKey};
use crate::signing::storage::KeyStorage;
use crate::signing::time_utils::hours_to_millis;

#[cfg(feature = "metrics")]
use crate::signing::metrics::MetricEvent;

impl<S: KeyStorage + 'static> SigningEngine<S> {
    /// Replaces `token` with a new key and returns the successor's token.
    ///
    /// The successor keeps the scope and owner, and lives for
    /// `expiration_hours` or, when `None`, the source's own
    /// `expiration_interval`.
    ///
    /// In safe mode a key that is already rotated fails with
    /// [`SigningError::AlreadyRotated`] and an inactive one with
    /// `KeyExpired(Inactive)`. Without safe mode both are rotated again.
    ///
    /// The safe mode check and the flip to rotated are one storage step, so
    /// of several concurrent calls on the same key exactly one issues a
    /// successor.
    pub async fn rotate_one(
        &self,
        token: &str,
        expiration_hours: Option<i64>,
    ) -> Result<String, SigningError> {
        let started = Instant::now();
        let claimed = self
            .storage_op(
                "claim_rotation",
                self.storage.claim_rotation(token, self.config.safe_mode),
            )
            .await;
        let source = match claimed {
            Ok(source) => source,
            Err(e) => {
                self.record_error(&e).await;
                return Err(e);
            }
        };

        let mut request = IssueRequest::new(&source.scope)
            .expiration_hours(expiration_hours.unwrap_or(source.expiration_interval))
            .previous_key(&source.signature);
        if let Some(email) = &source.email {
            request = request.email(email);
        }
        let successor = self.issue(request).await?;

        tracing::debug!(
            elapsed_us = started.elapsed().as_micros() as u64,
            "rotated signing key"
        );
        #[cfg(feature = "metrics")]
        self.metrics_collector
            .record_event(MetricEvent::KeyRotated {
                duration: started.elapsed(),
            })
            .await;

        Ok(successor)
    }

    /// Rotates every active key expiring within the next `within_hours`,
    /// optionally narrowed to keys whose scope contains every label of
    /// `scope`.
    ///
    /// Keys already past their expiration but still marked active are
    /// candidates too, so an overdue key is replaced rather than left for
    /// the flush. Each candidate is rotated independently: a failure is
    /// logged and skipped, so callers that need to know about omissions
    /// should compare the returned pairs with their own view of the
    /// candidates.
    ///
    /// Returns `(old, new)` token pairs in candidate order.
    pub async fn rotate_batch(
        &self,
        within_hours: i64,
        scope: Option<Scope>,
    ) -> Result<Vec<(String, String)>, SigningError> {
        let now = self.now()?;
        let mut filter = KeyFilter::new()
            .active(true)
            .expires_before(now.saturating_add(hours_to_millis(within_hours)));
        if let Some(scope) = scope {
            filter = filter.scopes(scope);
        }

        let candidates = self.storage_query(&filter).await?;
        let mut rotated = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match self.rotate_one(&candidate.signature, None).await {
                Ok(successor) => rotated.push((candidate.signature, successor)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        code = e.code(),
                        "skipping signing key in batch rotation"
                    );
                }
            }
        }

        tracing::debug!(rotated = rotated.len(), within_hours, "batch rotation finished");
        Ok(rotated)
    }

    /// Walks `previous_key` pointers from `token` back to the root of its
    /// lineage. The given key comes first.
    ///
    /// Stops early at a predecessor that no longer exists in storage, or if
    /// the chain loops back on itself.
    pub async fn lineage(&self, token: &str) -> Result<Vec<SigningKey>, SigningError> {
        let mut current = self.lookup(token).await?;
        let mut visited = HashSet::new();
        let mut chain = Vec::new();

        loop {
            visited.insert(current.signature.clone());
            let previous = current.previous_key.clone();
            chain.push(current);

            let Some(previous) = previous else { break };
            if visited.contains(&previous) {
                tracing::warn!("signing key lineage contains a cycle");
                break;
            }
            match self.storage_op("get", self.storage.get(&previous)).await? {
                Some(key) => current = key,
                None => break,
            }
        }

        Ok(chain)
    }

    /// Returns the keys issued as direct successors of `token`.
    pub async fn successors(&self, token: &str) -> Result<Vec<SigningKey>, SigningError> {
        self.storage_query(&KeyFilter::new().previous_key(token))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::error::ExpiryReason;
    use crate::signing::rate_limit::RateLimiter;
    use crate::signing::storage::{MemoryStorage, StorageStats};
    use crate::signing::time_utils::NEVER_EXPIRES;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Memory storage that fails to claim one chosen signature.
    #[derive(Default)]
    struct FailingClaimStorage {
        inner: MemoryStorage,
        refused: Mutex<Option<String>>,
    }

    impl FailingClaimStorage {
        fn refuse(&self, signature: &str) {
            *self.refused.lock().unwrap() = Some(signature.to_string());
        }
    }

    #[async_trait]
    impl KeyStorage for FailingClaimStorage {
        async fn get(&self, signature: &str) -> Result<Option<SigningKey>, SigningError> {
            self.inner.get(signature).await
        }

        async fn insert(&self, key: &SigningKey) -> Result<(), SigningError> {
            self.inner.insert(key).await
        }

        async fn deactivate(&self, signature: &str) -> Result<bool, SigningError> {
            self.inner.deactivate(signature).await
        }

        async fn claim_rotation(
            &self,
            signature: &str,
            guarded: bool,
        ) -> Result<SigningKey, SigningError> {
            let refused = self.refused.lock().unwrap().clone();
            if refused.as_deref() == Some(signature) {
                return Err(SigningError::from_storage_message("connection reset"));
            }
            self.inner.claim_rotation(signature, guarded).await
        }

        async fn record_request(
            &self,
            signature: &str,
            limiter: &RateLimiter,
            now: i64,
        ) -> Result<bool, SigningError> {
            self.inner.record_request(signature, limiter, now).await
        }

        async fn query(&self, filter: &KeyFilter) -> Result<Vec<SigningKey>, SigningError> {
            self.inner.query(filter).await
        }

        async fn deactivate_expired(&self, now: i64) -> Result<usize, SigningError> {
            self.inner.deactivate_expired(now).await
        }

        async fn get_stats(&self) -> Result<StorageStats, SigningError> {
            self.inner.get_stats().await
        }
    }

    fn crafted(signature: &str, previous_key: &str) -> SigningKey {
        SigningKey {
            signature: signature.to_string(),
            scope: Scope::from("test"),
            email: None,
            active: true,
            rotated: false,
            timestamp: 1_000,
            expiration: NEVER_EXPIRES,
            expiration_interval: 0,
            previous_key: Some(previous_key.to_string()),
            request_count: 0,
            last_request_time: 1_000,
        }
    }

    #[tokio::test]
    async fn test_rotate_one() -> Result<(), SigningError> {
        let engine = SigningEngine::builder().build_and_init().await?;
        let key1 = engine
            .issue(
                IssueRequest::new(["test", "task"])
                    .expiration_hours(3)
                    .email("owner@example.com"),
            )
            .await?;

        let key2 = engine.rotate_one(&key1, None).await?;
        assert_ne!(key1, key2);

        let source = engine.lookup(&key1).await?;
        assert!(!source.active);
        assert!(source.rotated);

        let successor = engine.lookup(&key2).await?;
        assert!(successor.active);
        assert!(!successor.rotated);
        assert_eq!(successor.scope, source.scope);
        assert_eq!(successor.email, source.email);
        assert_eq!(successor.previous_key.as_deref(), Some(key1.as_str()));
        assert_eq!(successor.expiration_interval, 3);

        assert!(matches!(
            engine.rotate_one(&key1, None).await,
            Err(SigningError::AlreadyRotated)
        ));
        assert!(matches!(
            engine.rotate_one("missing", None).await,
            Err(SigningError::KeyDoesNotExist)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_rotate_override_expiration() -> Result<(), SigningError> {
        let engine = SigningEngine::builder().build_and_init().await?;
        let key1 = engine.issue(IssueRequest::new("test")).await?;

        let key2 = engine.rotate_one(&key1, Some(0)).await?;
        let successor = engine.lookup(&key2).await?;
        assert_eq!(successor.expiration, NEVER_EXPIRES);
        assert_eq!(successor.expiration_interval, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_safe_mode_refuses_inactive() -> Result<(), SigningError> {
        let engine = SigningEngine::builder().build_and_init().await?;
        let key = engine
            .issue(IssueRequest::new("test").active(false))
            .await?;

        assert!(matches!(
            engine.rotate_one(&key, None).await,
            Err(SigningError::KeyExpired(ExpiryReason::Inactive))
        ));
        assert!(!engine.lookup(&key).await?.rotated);
        Ok(())
    }

    #[tokio::test]
    async fn test_unsafe_mode_rotates_again() -> Result<(), SigningError> {
        let engine = SigningEngine::builder()
            .with_safe_mode(false)
            .build_and_init()
            .await?;
        let key1 = engine.issue(IssueRequest::new("test")).await?;

        let key2 = engine.rotate_one(&key1, None).await?;
        let key3 = engine.rotate_one(&key1, None).await?;
        assert_ne!(key2, key3);

        let children = engine.successors(&key1).await?;
        assert_eq!(children.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_lineage() -> Result<(), SigningError> {
        let engine = SigningEngine::builder().build_and_init().await?;
        let root = engine.issue(IssueRequest::new("test")).await?;
        let middle = engine.rotate_one(&root, None).await?;
        let leaf = engine.rotate_one(&middle, None).await?;

        let chain: Vec<String> = engine
            .lineage(&leaf)
            .await?
            .into_iter()
            .map(|key| key.signature)
            .collect();
        assert_eq!(chain, vec![leaf.clone(), middle.clone(), root.clone()]);

        assert_eq!(engine.lineage(&root).await?.len(), 1);
        assert!(engine.successors(&leaf).await?.is_empty());
        assert_eq!(engine.successors(&root).await?[0].signature, middle);
        Ok(())
    }

    #[tokio::test]
    async fn test_lineage_stops_on_cycle() -> Result<(), SigningError> {
        let engine = SigningEngine::builder().build_and_init().await?;
        engine.storage().insert(&crafted("a", "b")).await?;
        engine.storage().insert(&crafted("b", "a")).await?;

        let chain: Vec<String> = engine
            .lineage("b")
            .await?
            .into_iter()
            .map(|key| key.signature)
            .collect();
        assert_eq!(chain, ["b", "a"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_safe_mode_claim_is_single_winner() -> Result<(), SigningError> {
        let engine = Arc::new(SigningEngine::builder().build_and_init().await?);
        let token = engine.issue(IssueRequest::new("test")).await?;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                engine.rotate_one(&token, None).await
            }));
        }

        let mut won = 0;
        for handle in handles {
            match handle.await.map_err(SigningError::from_storage_error)? {
                Ok(_) => won += 1,
                Err(e) => assert!(matches!(e, SigningError::AlreadyRotated)),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(engine.successors(&token).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_rotate_batch_skips_failed_candidate() -> Result<(), SigningError> {
        let storage = Arc::new(FailingClaimStorage::default());
        let engine = SigningEngine::builder()
            .with_storage(Arc::clone(&storage))
            .build_and_init()
            .await?;

        let first = engine.issue(IssueRequest::new("test")).await?;
        let broken = engine.issue(IssueRequest::new("test")).await?;
        let third = engine.issue(IssueRequest::new("test")).await?;
        storage.refuse(&broken);

        let pairs = engine.rotate_batch(1, None).await?;
        let sources: Vec<&str> = pairs.iter().map(|(old, _)| old.as_str()).collect();
        assert_eq!(pairs.len(), 2);
        assert!(sources.contains(&first.as_str()));
        assert!(sources.contains(&third.as_str()));
        assert!(!sources.contains(&broken.as_str()));

        for (old, new) in &pairs {
            assert!(engine.lookup(old).await?.rotated);
            assert_eq!(engine.lookup(new).await?.previous_key.as_deref(), Some(old.as_str()));
        }

        let untouched = engine.lookup(&broken).await?;
        assert!(untouched.active);
        assert!(!untouched.rotated);
        assert!(engine.successors(&broken).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rotate_batch_window_and_scope() -> Result<(), SigningError> {
        let engine = SigningEngine::builder().build_and_init().await?;
        let soon = engine
            .issue(IssueRequest::new("test").expiration_hours(1))
            .await?;
        let later = engine
            .issue(IssueRequest::new(["task", "tusk"]).expiration_hours(2))
            .await?;
        let never = engine
            .issue(IssueRequest::new("test").expiration_hours(0))
            .await?;
        let past = engine
            .issue(IssueRequest::new("test").expiration_hours(-1))
            .await?;

        // The overdue key is still active, so it is replaced as well.
        let first = engine.rotate_batch(1, None).await?;
        let sources: Vec<&str> = first.iter().map(|(old, _)| old.as_str()).collect();
        assert_eq!(first.len(), 2);
        assert!(sources.contains(&soon.as_str()));
        assert!(sources.contains(&past.as_str()));
        assert!(engine.lookup(&past).await?.rotated);
        assert!(engine.lookup(&later).await?.active);
        assert!(!engine.lookup(&later).await?.rotated);

        let second = engine
            .rotate_batch(2, Some(Scope::from(["task", "tusk"])))
            .await?;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].0, later);
        assert!(engine.lookup(&later).await?.rotated);

        assert!(!engine.lookup(&never).await?.rotated);
        Ok(())
    }
}
