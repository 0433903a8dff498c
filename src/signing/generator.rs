//! Opaque token generation.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;

/// A function that produces a candidate signature for a byte strength.
pub type KeyGeneratorFn = Box<dyn Fn(usize) -> String + Send + Sync>;

/// Default key strength in random bytes.
pub const DEFAULT_KEY_STRENGTH: usize = 24;

/// Generates a URL-safe token from `strength` bytes of OS entropy.
///
/// The token is base64url without padding, so its length is
/// `ceil(4 * strength / 3)`: always longer than `strength`, never by more
/// than a factor of 1.6 once `strength >= 4`. Callers should rely on that
/// relationship only, not on an exact length.
///
/// # Example
///
/// ```rust
/// use signing_keys::generate_key;
///
/// let token = generate_key(24);
/// assert_eq!(token.len(), 32);
/// assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
/// ```
pub fn generate_key(strength: usize) -> String {
    let mut random_bytes = vec![0u8; strength];
    OsRng.fill_bytes(&mut random_bytes);
    URL_SAFE_NO_PAD.encode(&random_bytes)
}

/// The generator used when none is supplied to the builder.
pub(crate) fn default_generator() -> KeyGeneratorFn {
    Box::new(generate_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_length_tracks_strength() {
        for strength in 4..512 {
            let token = generate_key(strength);
            let len = token.len() as f64;
            assert!(strength < token.len(), "strength {strength}: {token}");
            assert!(len < 1.6 * strength as f64, "strength {strength}: {token}");
        }
    }

    #[test]
    fn test_generated_tokens_are_url_safe() {
        let token = generate_key(DEFAULT_KEY_STRENGTH);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert!(!token.contains('='));
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let tokens: HashSet<String> = (0..10_000).map(|_| generate_key(16)).collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn test_default_generator_uses_strength() {
        let generator = default_generator();
        assert_eq!(generator(3).len(), 4);
        assert_eq!(generator(32).len(), 43);
    }
}
