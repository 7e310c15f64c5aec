//! Deployment-tunable timing and capacity settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default trailing debounce for prose updates.
pub const DEFAULT_TEXT_DEBOUNCE_MS: u64 = 500;
/// Default trailing debounce for scene updates.
pub const DEFAULT_SCENE_DEBOUNCE_MS: u64 = 100;
/// Default undo/redo stack capacity.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;
/// Default line-count delta above which a remote text change is structural.
pub const DEFAULT_STRUCTURAL_LINE_THRESHOLD: usize = 2;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Configuration for reconnect behavior with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in milliseconds (cap for backoff).
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt (2.0 doubles the delay).
    pub multiplier: f64,
    /// Consecutive failed attempts before the session gives up.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Create a new backoff configuration with custom values.
    #[must_use]
    pub const fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            multiplier: 2.0,
            max_attempts,
        }
    }

    /// Create a configuration from environment variables or defaults.
    ///
    /// Environment variables:
    /// - `NOTESYNC_BACKOFF_BASE_MS` (default: 1000)
    /// - `NOTESYNC_BACKOFF_CAP_MS` (default: 30000)
    /// - `NOTESYNC_BACKOFF_MAX_ATTEMPTS` (default: 5)
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_delay_ms: env_or("NOTESYNC_BACKOFF_BASE_MS", defaults.base_delay_ms),
            max_delay_ms: env_or("NOTESYNC_BACKOFF_CAP_MS", defaults.max_delay_ms),
            max_attempts: env_or("NOTESYNC_BACKOFF_MAX_ATTEMPTS", defaults.max_attempts),
            ..defaults
        }
    }

    /// Calculate the delay before reconnect attempt `attempt` (0-indexed).
    ///
    /// Uses `delay = min(base * multiplier^attempt, cap)`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0) as u64;
        Duration::from_millis(capped)
    }
}

/// Synchronization engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Text debounce window in milliseconds.
    pub text_debounce_ms: u64,
    /// Scene debounce window in milliseconds.
    pub scene_debounce_ms: u64,
    /// Maximum undo/redo entries.
    pub history_capacity: usize,
    /// Line-count delta above which a focused editor accepts a remote text change.
    pub structural_line_threshold: usize,
    /// Transport reconnect policy.
    pub backoff: BackoffConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            text_debounce_ms: DEFAULT_TEXT_DEBOUNCE_MS,
            scene_debounce_ms: DEFAULT_SCENE_DEBOUNCE_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            structural_line_threshold: DEFAULT_STRUCTURAL_LINE_THRESHOLD,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Create a configuration from environment variables or defaults.
    ///
    /// Environment variables:
    /// - `NOTESYNC_TEXT_DEBOUNCE_MS` (default: 500)
    /// - `NOTESYNC_SCENE_DEBOUNCE_MS` (default: 100)
    /// - `NOTESYNC_HISTORY_CAPACITY` (default: 50)
    /// - `NOTESYNC_STRUCTURAL_LINE_THRESHOLD` (default: 2)
    /// - plus the [`BackoffConfig::from_env`] variables
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            text_debounce_ms: env_or("NOTESYNC_TEXT_DEBOUNCE_MS", DEFAULT_TEXT_DEBOUNCE_MS),
            scene_debounce_ms: env_or("NOTESYNC_SCENE_DEBOUNCE_MS", DEFAULT_SCENE_DEBOUNCE_MS),
            history_capacity: env_or("NOTESYNC_HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY).max(1),
            structural_line_threshold: env_or(
                "NOTESYNC_STRUCTURAL_LINE_THRESHOLD",
                DEFAULT_STRUCTURAL_LINE_THRESHOLD,
            ),
            backoff: BackoffConfig::from_env(),
        }
    }

    /// Text debounce window.
    #[must_use]
    pub const fn text_debounce(&self) -> Duration {
        Duration::from_millis(self.text_debounce_ms)
    }

    /// Scene debounce window.
    #[must_use]
    pub const fn scene_debounce(&self) -> Duration {
        Duration::from_millis(self.scene_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let config = BackoffConfig::default();
        let delays: Vec<u64> = (0..5)
            .map(|attempt| config.delay_for_attempt(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(30_000));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(30_000));
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.text_debounce(), Duration::from_millis(500));
        assert_eq!(config.scene_debounce(), Duration::from_millis(100));
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.structural_line_threshold, 2);
        assert_eq!(config.backoff.max_attempts, 5);
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"scene_debounce_ms":250,"backoff":{"max_attempts":9}}"#)
                .expect("should parse");
        assert_eq!(config.scene_debounce_ms, 250);
        assert_eq!(config.text_debounce_ms, 500);
        assert_eq!(config.backoff.max_attempts, 9);
        assert_eq!(config.backoff.base_delay_ms, 1000);
    }
}
