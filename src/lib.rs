//! # Signing Keys
//!
//! Issue, validate, expire and rotate opaque bearer tokens that authorize a
//! caller for a narrowly scoped privileged action, such as confirming an
//! email address or resetting a password, without a full user account.
//!
//! ## Features
//!
//! - **Opaque tokens**: URL-safe random signatures of configurable strength
//! - **Scoped validation**: A key is only valid for the purposes it was issued for
//! - **Expiration**: Absolute expiry, explicit expiry and bulk flushing
//! - **Rotation**: Keys are replaced by successors that record their lineage
//! - **Rate limiting**: Optional per-key fixed-window request limits
//! - **Pluggable storage**: In-memory, SQLite and Redis backends behind one trait
//! - **Async Support**: Fully asynchronous API design
//!
//! ## Quick Start
//!
//! ```rust
//! use signing_keys::{IssueRequest, SigningEngine, SigningError};
//!
//! # async fn example() -> Result<(), SigningError> {
//! let engine = SigningEngine::builder().build_and_init().await?;
//!
//! // Issue a key valid for one hour
//! let token = engine
//!     .issue(IssueRequest::new("forgot_password").email("user@example.com"))
//!     .await?;
//!
//! // Later, when the token comes back
//! match engine.verify(&token, "email_verification").await {
//!     Ok(()) => println!("Key accepted"),
//!     Err(SigningError::ScopeMismatch) => println!("Key not valid for this purpose"),
//!     Err(e) => println!("Key refused: {e}"),
//! }
//!
//! // Replace it with a fresh key for the same purpose
//! let successor = engine.rotate_one(&token, None).await?;
//! engine.validate(&successor, "forgot_password").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! ```rust,ignore
//! use signing_keys::SigningEngine;
//! use signing_keys::storage::SqliteStorage;
//! use std::sync::Arc;
//!
//! let engine = SigningEngine::builder()
//!     .with_storage(Arc::new(SqliteStorage::new("signing_keys.db")?))
//!     .build_and_init()
//!     .await?;
//! ```
//!
//! ## Configuration
//!
//! [`SigningConfig::default()`] reads the `SIGNING_KEYS_*` environment
//! variables; [`ConfigPreset`] offers named starting points.
//!
//! ## Architecture
//!
//! - **[`SigningEngine`]**: Issue, validate, verify, expire, rotate and query
//! - **[`SigningKey`]**: The persisted record
//! - **[`storage::KeyStorage`]**: The persistence contract
//! - **[`SigningError`]**: Comprehensive error handling for all failure modes

pub mod signing;

pub use signing::storage;

// Re-export commonly used types
pub use signing::{
    ConfigPreset, ExpiryReason, IssueRequest, KeyFilter, NEVER_EXPIRES, Scope, SigningConfig,
    SigningEngine, SigningEngineBuilder, SigningError, SigningKey, generate_key,
};
