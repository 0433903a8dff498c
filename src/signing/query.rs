//! Read-only filtering over stored signing keys.
//!
//! [`KeyFilter`] describes which records a caller is interested in. Storage
//! backends receive the filter and may push parts of it down to their query
//! language, but [`KeyFilter::matches`] is the reference semantics every
//! backend must agree with.

use crate::signing::engine::SigningEngine;
use crate::signing::error::SigningError;
use crate::signing::record::{Scope, SigningKey};
use crate::signing::storage::KeyStorage;

/// Filter over signing key records.
///
/// Each populated field narrows the result; an empty filter matches every
/// record. Requested scopes use AND semantics: a record matches only when
/// its scope contains every requested label.
///
/// # Example
///
/// ```rust
/// use signing_keys::KeyFilter;
///
/// let filter = KeyFilter::new()
///     .active(true)
///     .scope("API")
///     .email("Owner@Example.com");
///
/// assert_eq!(filter.email_value(), Some("owner@example.com"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    active: Option<bool>,
    scope: Vec<String>,
    email: Option<String>,
    previous_key: Option<String>,
    expires_after: Option<i64>,
    expires_before: Option<i64>,
}

impl KeyFilter {
    /// Creates a filter that matches every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only records whose `active` flag equals `active`.
    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    /// Only records whose scope contains `label`. May be called repeatedly;
    /// all labels must be present.
    pub fn scope(mut self, label: &str) -> Self {
        if let Some(label) = Scope::normalize_label(label) {
            if !self.scope.contains(&label) {
                self.scope.push(label);
            }
        }
        self
    }

    /// Only records whose scope contains every label of `scope`.
    pub fn scopes(self, scope: impl Into<Scope>) -> Self {
        let scope: Scope = scope.into();
        scope.iter().fold(self, |filter, label| filter.scope(label))
    }

    /// Only records owned by `email` (case-insensitive).
    pub fn email(mut self, email: &str) -> Self {
        self.email = SigningKey::normalize_email(email);
        self
    }

    /// Only direct successors of the key with signature `previous_key`.
    pub fn previous_key(mut self, previous_key: &str) -> Self {
        self.previous_key = Some(previous_key.to_string());
        self
    }

    /// Only records whose expiration is strictly after `instant` (millis).
    pub fn expires_after(mut self, instant: i64) -> Self {
        self.expires_after = Some(instant);
        self
    }

    /// Only records whose expiration is at or before `instant` (millis).
    pub fn expires_before(mut self, instant: i64) -> Self {
        self.expires_before = Some(instant);
        self
    }

    pub fn active_value(&self) -> Option<bool> {
        self.active
    }

    pub fn scope_values(&self) -> &[String] {
        &self.scope
    }

    pub fn email_value(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn previous_key_value(&self) -> Option<&str> {
        self.previous_key.as_deref()
    }

    pub fn expires_after_value(&self) -> Option<i64> {
        self.expires_after
    }

    pub fn expires_before_value(&self) -> Option<i64> {
        self.expires_before
    }

    /// Whether `key` satisfies every populated field of the filter.
    pub fn matches(&self, key: &SigningKey) -> bool {
        if self.active.is_some_and(|active| key.active != active) {
            return false;
        }
        if !self.scope.iter().all(|label| key.scope.contains(label)) {
            return false;
        }
        if let Some(email) = &self.email {
            if key.email.as_deref() != Some(email.as_str()) {
                return false;
            }
        }
        if let Some(previous_key) = &self.previous_key {
            if key.previous_key.as_deref() != Some(previous_key.as_str()) {
                return false;
            }
        }
        if self.expires_after.is_some_and(|after| key.expiration <= after) {
            return false;
        }
        if self
            .expires_before
            .is_some_and(|before| key.expiration > before)
        {
            return false;
        }
        true
    }
}

/// Orders query results by creation time, then signature.
pub(crate) fn sort_records(records: &mut [SigningKey]) {
    records.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.signature.cmp(&b.signature))
    });
}

impl<S: KeyStorage + 'static> SigningEngine<S> {
    /// Returns the records matching `filter`.
    ///
    /// Signals [`SigningError::NoMatchingKeys`] when nothing matches, so
    /// callers can tell "no keys" apart from a successful, non-empty result
    /// without inspecting the collection.
    pub async fn query(&self, filter: &KeyFilter) -> Result<Vec<SigningKey>, SigningError> {
        let records = self.storage_query(filter).await?;
        if records.is_empty() {
            let error = SigningError::NoMatchingKeys;
            self.record_error(&error).await;
            return Err(error);
        }
        Ok(records)
    }

    /// Returns every stored record; empty when the store is empty.
    pub async fn query_all(&self) -> Result<Vec<SigningKey>, SigningError> {
        self.storage_query(&KeyFilter::new()).await
    }

    pub(crate) async fn storage_query(
        &self,
        filter: &KeyFilter,
    ) -> Result<Vec<SigningKey>, SigningError> {
        let mut records = self.storage_op("query", self.storage.query(filter)).await?;
        sort_records(&mut records);
        Ok(records)
    }
}
