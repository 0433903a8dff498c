use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::signing::time_utils::NEVER_EXPIRES;

/// The set of purposes a signing key is valid for.
///
/// Labels are trimmed and lowercased on construction and empty labels are
/// dropped, so `"Forgot_Password"` and `" forgot_password"` name the same
/// scope. An empty scope is legal but never satisfies validation.
///
/// A scope can be built from a single label or any collection of labels:
///
/// ```rust
/// use signing_keys::Scope;
///
/// let single = Scope::from("API");
/// let many = Scope::from(["test", "Task", "test"]);
///
/// assert!(single.contains("api"));
/// assert_eq!(many.len(), 2);
/// assert!(many.intersects(&Scope::from(vec!["task", "other"])));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Scope(BTreeSet<String>);

impl Scope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes a single label the same way scopes and filters do.
    pub(crate) fn normalize_label(label: &str) -> Option<String> {
        let label = label.trim();
        if label.is_empty() {
            None
        } else {
            Some(label.to_lowercase())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the scope holds `label` (compared after normalization).
    pub fn contains(&self, label: &str) -> bool {
        Self::normalize_label(label).is_some_and(|label| self.0.contains(&label))
    }

    /// Whether the two scopes share at least one label.
    pub fn intersects(&self, other: &Scope) -> bool {
        self.0.intersection(&other.0).next().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for Scope {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Scope(
            iter.into_iter()
                .filter_map(|label| Self::normalize_label(label.as_ref()))
                .collect(),
        )
    }
}

impl From<&str> for Scope {
    fn from(label: &str) -> Self {
        std::iter::once(label).collect()
    }
}

impl From<String> for Scope {
    fn from(label: String) -> Self {
        Scope::from(label.as_str())
    }
}

impl From<&String> for Scope {
    fn from(label: &String) -> Self {
        Scope::from(label.as_str())
    }
}

impl<S: AsRef<str>> From<Vec<S>> for Scope {
    fn from(labels: Vec<S>) -> Self {
        labels.into_iter().collect()
    }
}

impl<S: AsRef<str>> From<&[S]> for Scope {
    fn from(labels: &[S]) -> Self {
        labels.iter().collect()
    }
}

impl<S: AsRef<str>, const N: usize> From<[S; N]> for Scope {
    fn from(labels: [S; N]) -> Self {
        labels.into_iter().collect()
    }
}

impl From<&Scope> for Scope {
    fn from(scope: &Scope) -> Self {
        scope.clone()
    }
}

impl From<Scope> for Vec<String> {
    fn from(scope: Scope) -> Self {
        scope.0.into_iter().collect()
    }
}

/// A signing key as persisted by a storage backend.
///
/// The `signature` is the bearer token itself. Records are never deleted by
/// the engine: expired and rotated keys stay in storage so that lineage can
/// be traversed through `previous_key`.
///
/// All instants are Unix timestamps in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    /// The opaque token; unique across every key ever issued.
    pub signature: String,
    /// Purposes this key may be used for.
    pub scope: Scope,
    /// Lowercased owner address, if the key was issued for one.
    pub email: Option<String>,
    /// Whether the key currently grants access.
    pub active: bool,
    /// Set once a successor has been issued from this key.
    pub rotated: bool,
    /// Creation time.
    pub timestamp: i64,
    /// Absolute expiration; [`NEVER_EXPIRES`] when the key does not expire.
    pub expiration: i64,
    /// Lifetime in hours reused when the key is rotated; 0 means never.
    pub expiration_interval: i64,
    /// Signature of the key this one replaced.
    pub previous_key: Option<String>,
    /// Requests counted in the current rate limit window.
    pub request_count: u32,
    /// Start of the current rate limit window.
    pub last_request_time: i64,
}

impl SigningKey {
    /// Normalizes an email address for storage and filtering.
    pub(crate) fn normalize_email(email: &str) -> Option<String> {
        let email = email.trim();
        if email.is_empty() {
            None
        } else {
            Some(email.to_lowercase())
        }
    }

    /// Whether the key's expiration instant has passed at `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiration <= now
    }

    pub fn never_expires(&self) -> bool {
        self.expiration >= NEVER_EXPIRES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> SigningKey {
        SigningKey {
            signature: "abc".to_string(),
            scope: Scope::from(["test", "task"]),
            email: Some("user@example.com".to_string()),
            active: true,
            rotated: false,
            timestamp: 1_000,
            expiration: 5_000,
            expiration_interval: 1,
            previous_key: None,
            request_count: 0,
            last_request_time: 1_000,
        }
    }

    #[test]
    fn test_scope_normalization() {
        let scope = Scope::from(vec![" Test ", "TASK", "", "task"]);
        let labels: Vec<&str> = scope.iter().collect();
        assert_eq!(labels, vec!["task", "test"]);
    }

    #[test]
    fn test_scope_from_empty_string_is_empty() {
        assert!(Scope::from("").is_empty());
        assert!(Scope::from("   ").is_empty());
        assert!(Scope::new().is_empty());
    }

    #[test]
    fn test_scope_intersection() {
        let key_scope = Scope::from(["a", "b"]);
        assert!(key_scope.intersects(&Scope::from(["b", "c"])));
        assert!(!key_scope.intersects(&Scope::from("c")));
        assert!(!key_scope.intersects(&Scope::new()));
        assert!(!Scope::new().intersects(&Scope::new()));
    }

    #[test]
    fn test_scope_contains_is_case_insensitive() {
        let scope = Scope::from("api");
        assert!(scope.contains("API"));
        assert!(!scope.contains(""));
    }

    #[test]
    fn test_scope_serializes_as_list() {
        let scope = Scope::from(["tusk", "test"]);
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, r#"["test","tusk"]"#);

        let parsed: Scope = serde_json::from_str(r#"["B","a","b"]"#).unwrap();
        assert_eq!(parsed, Scope::from(["a", "b"]));
    }

    #[test]
    fn test_signing_key_serialization() {
        let key = sample_key();
        let json = serde_json::to_string(&key).unwrap();
        let parsed: SigningKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_expiry_helpers() {
        let mut key = sample_key();
        assert!(!key.is_expired_at(4_999));
        assert!(key.is_expired_at(5_000));
        assert!(!key.never_expires());

        key.expiration = NEVER_EXPIRES;
        assert!(key.never_expires());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            SigningKey::normalize_email(" User@Example.COM "),
            Some("user@example.com".to_string())
        );
        assert_eq!(SigningKey::normalize_email(""), None);
    }
}
