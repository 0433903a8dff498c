use std::fmt;

use thiserror::Error;

/// Why a key that exists was refused as expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// The key was already marked inactive (expired explicitly or rotated).
    Inactive,
    /// The key was still active but its expiration instant has passed.
    PastExpiration,
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryReason::Inactive => f.write_str("no longer active"),
            ExpiryReason::PastExpiration => f.write_str("expired"),
        }
    }
}

/// Error types that can occur during signing key operations.
///
/// Every variant is recoverable by the caller. The lifecycle errors
/// (`KeyDoesNotExist`, `KeyExpired`, `ScopeMismatch`, `AlreadyRotated`,
/// `RateLimitExceeded`) describe the state of a specific key. The
/// infrastructure errors (`SignatureCollision`, `StorageError`) mean the
/// operation's effect is unknown or unapplied and it should be retried.
///
/// # Error Categories
///
/// - **Lifecycle Errors**: `KeyDoesNotExist`, `KeyExpired`, `ScopeMismatch`, `AlreadyRotated`
/// - **Throttling Errors**: `RateLimitExceeded`
/// - **Query Errors**: `NoMatchingKeys`
/// - **System Errors**: `SignatureCollision`, `StorageError`, `ClockError`, `SerializationError`
///
/// # Example
///
/// ```rust
/// use signing_keys::{IssueRequest, SigningEngine, SigningError};
///
/// # async fn example() -> Result<(), SigningError> {
/// let engine = SigningEngine::builder().build_and_init().await?;
/// let token = engine.issue(IssueRequest::new("forgot_password")).await?;
///
/// match engine.verify(&token, "email_verification").await {
///     Ok(()) => println!("Key accepted"),
///     Err(SigningError::KeyDoesNotExist) => println!("Unknown key"),
///     Err(SigningError::KeyExpired(reason)) => println!("Key refused: {reason}"),
///     Err(SigningError::ScopeMismatch) => println!("Key not valid for this purpose"),
///     Err(e) => println!("Other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum SigningError {
    /// No record exists for the given signature.
    ///
    /// # When This Occurs
    ///
    /// - The caller presents a token that was never issued
    /// - A record disappeared between a read and a conditional update
    #[error("Signing key does not exist")]
    KeyDoesNotExist,

    /// The record exists but is inactive or past its expiration instant.
    ///
    /// When a key past its expiration is still marked active, the engine
    /// deactivates it before returning this error, so the
    /// `PastExpiration` reason is reported at most once per key.
    #[error("Signing key is {0}")]
    KeyExpired(ExpiryReason),

    /// The key is valid but none of its scopes match the requested ones.
    #[error("Signing key is not valid for the requested scope")]
    ScopeMismatch,

    /// Rotation was attempted on a key that already has a successor.
    ///
    /// Only raised when the engine runs in safe mode.
    #[error("Signing key has already been rotated")]
    AlreadyRotated,

    /// The key was presented more often than the rate limit window allows.
    ///
    /// # Resolution
    ///
    /// Wait until the window elapses; the counter resets on the first
    /// request made after the window.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// A query matched no records.
    ///
    /// Distinct from an empty collection: `query_all` on an empty store
    /// returns `Ok(vec![])`, while a filtered `query` that matches nothing
    /// returns this error.
    #[error("No signing keys match the query")]
    NoMatchingKeys,

    /// A generated signature collided with an existing record.
    ///
    /// The storage backend's uniqueness constraint rejected the insert, or
    /// the generator produced only known signatures within the configured
    /// number of attempts. Nothing was written; issuing again is safe.
    #[error("Signature collision, retry the operation")]
    SignatureCollision,

    /// The storage backend failed.
    ///
    /// # When This Occurs
    ///
    /// - The database file is locked, corrupted or unreachable
    /// - The Redis server connection dropped
    ///
    /// # Resolution
    ///
    /// The effect of the operation is unknown; retry it rather than
    /// assuming partial success.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// The system clock reported a time before the Unix epoch.
    #[error("Clock error: {0}")]
    ClockError(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SigningError {
    /// Wraps any backend error as a [`SigningError::StorageError`].
    pub fn from_storage_error<E: fmt::Display>(error: E) -> Self {
        SigningError::StorageError(error.to_string())
    }

    /// Builds a [`SigningError::StorageError`] from a message.
    pub fn from_storage_message(message: impl Into<String>) -> Self {
        SigningError::StorageError(message.into())
    }

    /// Stable snake_case identifier, used for metrics and structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            SigningError::KeyDoesNotExist => "key_does_not_exist",
            SigningError::KeyExpired(_) => "key_expired",
            SigningError::ScopeMismatch => "scope_mismatch",
            SigningError::AlreadyRotated => "already_rotated",
            SigningError::RateLimitExceeded => "rate_limit_exceeded",
            SigningError::NoMatchingKeys => "no_matching_keys",
            SigningError::SignatureCollision => "signature_collision",
            SigningError::StorageError(_) => "storage_error",
            SigningError::ClockError(_) => "clock_error",
            SigningError::SerializationError(_) => "serialization_error",
        }
    }

    /// Whether retrying the same call may succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SigningError::SignatureCollision | SigningError::StorageError(_)
        )
    }
}

impl From<serde_json::Error> for SigningError {
    fn from(error: serde_json::Error) -> Self {
        SigningError::SerializationError(error.to_string())
    }
}
