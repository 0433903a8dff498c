//! Interleavings of concurrent lifecycle operations on the same key.
//!
//! `GatedStorage` pauses one storage call mid-flight so a second operation
//! can run to completion in between, which pins down the ordering instead
//! of relying on the scheduler.

use async_trait::async_trait;
use signing_keys::signing::RateLimiter;
use signing_keys::storage::{KeyStorage, MemoryStorage, StorageStats};
use signing_keys::{ExpiryReason, IssueRequest, KeyFilter, SigningEngine, SigningError, SigningKey};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Holds the first call that passes through once armed until released.
#[derive(Default)]
struct Gate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl Gate {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    fn open(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct GatedStorage {
    inner: MemoryStorage,
    requests: Gate,
    claims: Gate,
}

#[async_trait]
impl KeyStorage for GatedStorage {
    async fn get(&self, signature: &str) -> Result<Option<SigningKey>, SigningError> {
        self.inner.get(signature).await
    }

    async fn exists(&self, signature: &str) -> Result<bool, SigningError> {
        self.inner.exists(signature).await
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
        self.claims.pass().await;
        self.inner.claim_rotation(signature, guarded).await
    }

    async fn record_request(
        &self,
        signature: &str,
        limiter: &RateLimiter,
        now: i64,
    ) -> Result<bool, SigningError> {
        self.requests.pass().await;
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

async fn gated_engine(
    storage: &Arc<GatedStorage>,
) -> Result<Arc<SigningEngine<GatedStorage>>, SigningError> {
    let engine = SigningEngine::builder()
        .with_storage(Arc::clone(storage))
        .with_safe_mode(true)
        .with_rate_limit(10, Duration::from_secs(60))
        .build_and_init()
        .await?;
    Ok(Arc::new(engine))
}

#[tokio::test]
async fn test_counted_request_does_not_revive_rotated_key() -> Result<(), SigningError> {
    init_tracing();
    let storage = Arc::new(GatedStorage::default());
    let engine = gated_engine(&storage).await?;
    let token = engine.issue(IssueRequest::new("test")).await?;

    storage.requests.arm();
    let verifying = tokio::spawn({
        let engine = Arc::clone(&engine);
        let token = token.clone();
        async move { engine.verify(&token, "test").await }
    });

    storage.requests.wait_entered().await;
    let successor = engine.rotate_one(&token, None).await?;
    storage.requests.open();

    let verified = verifying.await.expect("verify task panicked");
    assert!(matches!(
        verified,
        Err(SigningError::KeyExpired(ExpiryReason::Inactive))
    ));

    let old = engine.lookup(&token).await?;
    assert!(!old.active);
    assert!(old.rotated);
    assert_eq!(old.request_count, 1);
    assert!(matches!(
        engine.validate(&token, "test").await,
        Err(SigningError::KeyExpired(ExpiryReason::Inactive))
    ));
    engine.validate(&successor, "test").await?;
    Ok(())
}

#[tokio::test]
async fn test_counted_request_does_not_revive_expired_key() -> Result<(), SigningError> {
    init_tracing();
    let storage = Arc::new(GatedStorage::default());
    let engine = gated_engine(&storage).await?;
    let token = engine.issue(IssueRequest::new("test")).await?;

    storage.requests.arm();
    let verifying = tokio::spawn({
        let engine = Arc::clone(&engine);
        let token = token.clone();
        async move { engine.verify(&token, "test").await }
    });

    storage.requests.wait_entered().await;
    engine.expire(&token).await?;
    storage.requests.open();

    let verified = verifying.await.expect("verify task panicked");
    assert!(matches!(
        verified,
        Err(SigningError::KeyExpired(ExpiryReason::Inactive))
    ));

    let record = engine.lookup(&token).await?;
    assert!(!record.active);
    assert!(!record.rotated);
    assert_eq!(record.request_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_rotate_during_rotate_issues_one_successor() -> Result<(), SigningError> {
    init_tracing();
    let storage = Arc::new(GatedStorage::default());
    let engine = gated_engine(&storage).await?;
    let token = engine.issue(IssueRequest::new(["test", "task"])).await?;

    storage.claims.arm();
    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        let token = token.clone();
        async move { engine.rotate_one(&token, None).await }
    });

    storage.claims.wait_entered().await;
    let second = engine.rotate_one(&token, None).await?;
    storage.claims.open();

    let first = first.await.expect("rotate task panicked");
    assert!(matches!(first, Err(SigningError::AlreadyRotated)));

    let successors = engine.successors(&token).await?;
    assert_eq!(successors.len(), 1);
    assert_eq!(successors[0].signature, second);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_verify_respects_limit() -> Result<(), SigningError> {
    init_tracing();
    let engine = Arc::new(
        SigningEngine::builder()
            .with_rate_limit(5, Duration::from_secs(60))
            .build_and_init()
            .await?,
    );
    let token = engine.issue(IssueRequest::new("test")).await?;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = Arc::clone(&engine);
        let token = token.clone();
        handles.push(tokio::spawn(async move { engine.verify(&token, "test").await }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.expect("verify task panicked") {
            Ok(()) => accepted += 1,
            Err(e) => assert!(matches!(e, SigningError::RateLimitExceeded)),
        }
    }

    assert_eq!(accepted, 5);
    let record = engine.lookup(&token).await?;
    assert_eq!(record.request_count, 5);
    assert!(record.active);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotate_one_single_winner() -> Result<(), SigningError> {
    init_tracing();
    let engine = Arc::new(
        SigningEngine::builder()
            .with_safe_mode(true)
            .build_and_init()
            .await?,
    );
    let token = engine.issue(IssueRequest::new("test")).await?;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&engine);
        let token = token.clone();
        handles.push(tokio::spawn(async move { engine.rotate_one(&token, None).await }));
    }

    let mut rotated = 0;
    for handle in handles {
        match handle.await.expect("rotate task panicked") {
            Ok(_) => rotated += 1,
            Err(e) => assert!(matches!(e, SigningError::AlreadyRotated)),
        }
    }

    assert_eq!(rotated, 1);
    assert_eq!(engine.successors(&token).await?.len(), 1);
    Ok(())
}

#[cfg(feature = "sqlite-storage")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_verify_respects_limit_on_sqlite() -> Result<(), SigningError> {
    use signing_keys::storage::SqliteStorage;

    let engine = Arc::new(
        SigningEngine::builder()
            .with_storage(Arc::new(SqliteStorage::new(":memory:")?))
            .with_rate_limit(3, Duration::from_secs(60))
            .build_and_init()
            .await?,
    );
    let token = engine.issue(IssueRequest::new("test")).await?;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let engine = Arc::clone(&engine);
        let token = token.clone();
        handles.push(tokio::spawn(async move { engine.verify(&token, "test").await }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.expect("verify task panicked").is_ok() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 3);

    engine.expire(&token).await?;
    let record = engine.lookup(&token).await?;
    assert!(!record.active);
    assert_eq!(record.request_count, 3);
    Ok(())
}
