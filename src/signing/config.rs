use std::time::Duration;

use crate::signing::generator::DEFAULT_KEY_STRENGTH;

/// Default number of candidate signatures tried before giving up on issue.
pub const DEFAULT_MAX_GENERATION_ATTEMPTS: u32 = 16;

/// Predefined configuration presets for common use cases.
///
/// These presets provide sensible defaults for different deployment scenarios,
/// balancing token strength, rotation strictness and request throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPreset {
    /// Production-ready configuration.
    ///
    /// - Key strength: 24 bytes
    /// - Safe mode on
    /// - Rate limiting on: 10 requests per minute per key
    Production,

    /// Development-friendly configuration.
    ///
    /// Relaxed settings for easier testing and debugging:
    /// - Key strength: 24 bytes
    /// - Safe mode off (keys may be rotated more than once)
    /// - Rate limiting off
    Development,

    /// High-security configuration.
    ///
    /// - Key strength: 48 bytes
    /// - Safe mode on
    /// - Rate limiting on: 5 requests per minute per key
    HighSecurity,

    /// Load configuration from environment variables.
    ///
    /// Reads configuration from:
    /// - `SIGNING_KEYS_KEY_STRENGTH`: Token strength in bytes (default: 24)
    /// - `SIGNING_KEYS_SAFE_MODE`: Rotation guards (default: true)
    /// - `SIGNING_KEYS_RATE_LIMITING`: Per-key throttling (default: false)
    /// - `SIGNING_KEYS_RATE_LIMIT_MAX_REQUESTS`: Requests per window (default: 10)
    /// - `SIGNING_KEYS_RATE_LIMIT_WINDOW`: Window length in seconds (default: 60)
    FromEnv,
}

/// Construction-time configuration for the signing key engine.
///
/// # Environment Variables
///
/// `SigningConfig::default()` honours the variables listed on
/// [`ConfigPreset::FromEnv`]. Unparseable values fall back to the defaults.
///
/// # Example
///
/// ```rust
/// use signing_keys::SigningConfig;
/// use std::time::Duration;
///
/// let config = SigningConfig {
///     rate_limiting: true,
///     rate_limit_max_requests: 2,
///     rate_limit_window: Duration::from_secs(2),
///     ..SigningConfig::default()
/// };
/// assert!(config.rate_limiting);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningConfig {
    /// Random bytes per generated signature
    pub key_strength: usize,
    /// Refuse to rotate keys that are inactive or already rotated
    pub safe_mode: bool,
    /// Whether `verify` enforces per-key request limits
    pub rate_limiting: bool,
    /// Requests allowed per key within one window
    pub rate_limit_max_requests: u32,
    /// Length of the fixed rate limit window
    pub rate_limit_window: Duration,
    /// Candidate signatures tried before issue reports a collision
    pub max_generation_attempts: u32,
}

fn parse_value<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.trim().parse().ok())
}

fn parse_flag(value: Option<String>) -> Option<bool> {
    value.and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

impl SigningConfig {
    /// Builds a configuration from `SIGNING_KEYS_*` values resolved through
    /// `lookup`, falling back to the defaults for missing or unparseable
    /// entries.
    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            key_strength: parse_value(lookup("SIGNING_KEYS_KEY_STRENGTH"))
                .unwrap_or(DEFAULT_KEY_STRENGTH),
            safe_mode: parse_flag(lookup("SIGNING_KEYS_SAFE_MODE")).unwrap_or(true),
            rate_limiting: parse_flag(lookup("SIGNING_KEYS_RATE_LIMITING")).unwrap_or(false),
            rate_limit_max_requests: parse_value(lookup("SIGNING_KEYS_RATE_LIMIT_MAX_REQUESTS"))
                .unwrap_or(10),
            rate_limit_window: Duration::from_secs(
                parse_value(lookup("SIGNING_KEYS_RATE_LIMIT_WINDOW")).unwrap_or(60),
            ),
            max_generation_attempts: DEFAULT_MAX_GENERATION_ATTEMPTS,
        }
    }

    /// Validates the configuration and returns any warnings.
    ///
    /// # Returns
    ///
    /// A vector of warning messages for potentially problematic settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.key_strength < 16 {
            warnings.push(
                "Key strength below 16 bytes makes signatures guessable".to_string(),
            );
        }
        if self.key_strength > 256 {
            warnings.push("Key strength above 256 bytes produces very long tokens".to_string());
        }

        if self.max_generation_attempts == 0 {
            warnings.push("Zero generation attempts means no key can ever be issued".to_string());
        }

        if self.rate_limiting {
            if self.rate_limit_max_requests == 0 {
                warnings.push(
                    "Rate limiting with zero max requests rejects every verification".to_string(),
                );
            }
            if self.rate_limit_window.is_zero() {
                warnings.push(
                    "Zero rate limit window resets the counter on every request".to_string(),
                );
            }
        }

        if !self.safe_mode {
            warnings.push(
                "Safe mode disabled: inactive or already rotated keys can be rotated".to_string(),
            );
        }

        warnings
    }

    /// Returns a summary of the current configuration.
    pub fn summary(&self) -> String {
        format!(
            "SigningConfig {{ Key Strength: {} bytes, Safe Mode: {}, \
             Rate Limiting: {} ({} req / {}s), Max Generation Attempts: {} }}",
            self.key_strength,
            self.safe_mode,
            self.rate_limiting,
            self.rate_limit_max_requests,
            self.rate_limit_window.as_secs(),
            self.max_generation_attempts,
        )
    }
}

impl From<ConfigPreset> for SigningConfig {
    fn from(preset: ConfigPreset) -> Self {
        match preset {
            ConfigPreset::Production => Self {
                key_strength: DEFAULT_KEY_STRENGTH,
                safe_mode: true,
                rate_limiting: true,
                rate_limit_max_requests: 10,
                rate_limit_window: Duration::from_secs(60),
                max_generation_attempts: DEFAULT_MAX_GENERATION_ATTEMPTS,
            },
            ConfigPreset::Development => Self {
                key_strength: DEFAULT_KEY_STRENGTH,
                safe_mode: false,
                rate_limiting: false,
                rate_limit_max_requests: 10,
                rate_limit_window: Duration::from_secs(60),
                max_generation_attempts: DEFAULT_MAX_GENERATION_ATTEMPTS,
            },
            ConfigPreset::HighSecurity => Self {
                key_strength: 48,
                safe_mode: true,
                rate_limiting: true,
                rate_limit_max_requests: 5,
                rate_limit_window: Duration::from_secs(60),
                max_generation_attempts: DEFAULT_MAX_GENERATION_ATTEMPTS,
            },
            ConfigPreset::FromEnv => Self::default(),
        }
    }
}
