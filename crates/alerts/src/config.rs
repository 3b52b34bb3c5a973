//! Deployment configuration.
//!
//! Defaults come from `VECISAFE_*` environment variables; a JSON file may
//! override any subset of fields.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{AlertError, AlertResult};
use crate::fanout::RetryPolicy;

/// Longest verification code lifetime accepted (one day)
pub const MAX_CODE_TTL_SECS: i64 = 86_400;

/// Alerting engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reject reports from sessions that have not verified a phone number.
    pub require_verified: bool,
    /// Fanout radius around each incident, in meters.
    pub notification_radius_m: f64,
    /// Upper bound on concurrent push sends across all alerts.
    pub max_concurrent_deliveries: usize,
    /// Per-intent retry schedule.
    pub retry: RetryPolicy,
    /// Lifetime of an issued verification code.
    pub verification_code_ttl_secs: i64,
    /// Wrong codes allowed before the session falls back to anonymous.
    pub max_verification_attempts: u32,
    /// Geo index bucket size in degrees.
    pub geo_cell_degrees: f64,
    /// Directory for the file-backed ledger and session blobs.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            require_verified: env::var("VECISAFE_REQUIRE_VERIFIED")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            notification_radius_m: env::var("VECISAFE_NOTIFICATION_RADIUS_M")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500.0),
            max_concurrent_deliveries: env::var("VECISAFE_MAX_CONCURRENT_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(32),
            retry: RetryPolicy {
                base_delay_ms: env::var("VECISAFE_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1_000),
                factor: 2,
                max_attempts: env::var("VECISAFE_RETRY_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            },
            verification_code_ttl_secs: env::var("VECISAFE_CODE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_verification_attempts: env::var("VECISAFE_MAX_VERIFICATION_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            geo_cell_degrees: env::var("VECISAFE_GEO_CELL_DEGREES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.01),
            data_dir: env::var("VECISAFE_DATA_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map_or_else(|| PathBuf::from(".vecisafe"), PathBuf::from),
        }
    }
}

impl Config {
    /// Configuration from environment variables only.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Load a JSON config file; absent fields fall back to the environment.
    pub fn load(path: &Path) -> AlertResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AlertError::InvalidArgument {
            field: "config",
            reason: format!("cannot read '{}': {e}", path.display()),
        })?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| AlertError::InvalidArgument {
                field: "config",
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> AlertResult<()> {
        if !(self.notification_radius_m.is_finite() && self.notification_radius_m >= 0.0) {
            return Err(AlertError::InvalidArgument {
                field: "notification_radius_m",
                reason: "must be a non-negative number of meters".to_string(),
            });
        }
        if self.max_concurrent_deliveries == 0 {
            return Err(AlertError::InvalidArgument {
                field: "max_concurrent_deliveries",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(AlertError::InvalidArgument {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(1..=MAX_CODE_TTL_SECS).contains(&self.verification_code_ttl_secs) {
            return Err(AlertError::InvalidArgument {
                field: "verification_code_ttl_secs",
                reason: format!("must be between 1 and {MAX_CODE_TTL_SECS} seconds"),
            });
        }
        if self.max_verification_attempts == 0 {
            return Err(AlertError::InvalidArgument {
                field: "max_verification_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.geo_cell_degrees > 0.0 && self.geo_cell_degrees <= 90.0) {
            return Err(AlertError::InvalidArgument {
                field: "geo_cell_degrees",
                reason: "must be in (0, 90]".to_string(),
            });
        }
        Ok(())
    }

    /// Verification code lifetime as a chrono duration, clamped to
    /// `1..=MAX_CODE_TTL_SECS` for configs that skipped [`validate`](Self::validate).
    #[must_use]
    pub fn code_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.verification_code_ttl_secs.clamp(1, MAX_CODE_TTL_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        for key in [
            "VECISAFE_REQUIRE_VERIFIED",
            "VECISAFE_NOTIFICATION_RADIUS_M",
            "VECISAFE_MAX_CONCURRENT_DELIVERIES",
            "VECISAFE_RETRY_BASE_MS",
            "VECISAFE_RETRY_MAX_ATTEMPTS",
            "VECISAFE_CODE_TTL_SECS",
            "VECISAFE_MAX_VERIFICATION_ATTEMPTS",
            "VECISAFE_GEO_CELL_DEGREES",
            "VECISAFE_DATA_DIR",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::from_env();
        assert!(!config.require_verified);
        assert!((config.notification_radius_m - 500.0).abs() < f64::EPSILON);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.verification_code_ttl_secs, 300);
        assert_eq!(config.max_verification_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("VECISAFE_REQUIRE_VERIFIED", "true");
        env::set_var("VECISAFE_NOTIFICATION_RADIUS_M", "250");
        let config = Config::from_env();
        clear_env();

        assert!(config.require_verified);
        assert!((config.notification_radius_m - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    #[serial]
    fn test_load_partial_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{ "notification_radius_m": 100.0, "require_verified": true }"#)
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.require_verified);
        assert!((config.notification_radius_m - 100.0).abs() < f64::EPSILON);
        assert_eq!(config.max_verification_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_validate_rejects_zero_attempts() {
        clear_env();
        let mut config = Config::from_env();
        config.retry.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field(), Some("retry.max_attempts"));
    }

    #[test]
    #[serial]
    fn test_code_ttl_is_bounded() {
        clear_env();
        let mut config = Config::from_env();
        config.verification_code_ttl_secs = i64::MAX;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field(), Some("verification_code_ttl_secs"));
        assert_eq!(config.code_ttl(), chrono::Duration::seconds(MAX_CODE_TTL_SECS));

        config.verification_code_ttl_secs = MAX_CODE_TTL_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_rejects_huge_code_ttl() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{ "verification_code_ttl_secs": 9223372036854775807 }"#).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert_eq!(err.field(), Some("verification_code_ttl_secs"));
    }
}
