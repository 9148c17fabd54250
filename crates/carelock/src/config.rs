//! Guard configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! snapshot_timeout_ms = 250
//!
//! [audit]
//! retention_days = 3650
//! max_attempts = 5
//! initial_backoff_ms = 50
//! max_backoff_ms = 5000
//! queue_capacity = 1024
//!
//! [sweeper]
//! interval_secs = 3600
//! grant_grace_days = 30
//! ```

use std::path::Path;
use std::time::Duration;

use carelock_core::{DAY_MS, DEFAULT_RETENTION_DAYS};
use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// Configuration for the Guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    /// Budget for loading the principal snapshot and ACL of one request.
    pub snapshot_timeout_ms: u64,
    pub audit: AuditConfig,
    pub sweeper: SweeperConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            snapshot_timeout_ms: 250,
            audit: AuditConfig::default(),
            sweeper: SweeperConfig::default(),
        }
    }
}

/// Audit recorder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub retention_days: u32,
    /// Write attempts per record before it is escalated.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Records that may wait for the writer before `record` applies backpressure.
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 5_000,
            queue_capacity: 1_024,
        }
    }
}

impl AuditConfig {
    pub fn retention_ms(&self) -> i64 {
        i64::from(self.retention_days) * DAY_MS
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Expiry sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    /// How long past expiry a grant stays untouched before being marked superseded.
    pub grant_grace_days: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,
            grant_grace_days: 30,
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn grace_ms(&self) -> i64 {
        i64::from(self.grant_grace_days) * DAY_MS
    }
}

impl GuardConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| GuardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| GuardError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(GuardError::Config(msg.to_string()));
        if self.snapshot_timeout_ms == 0 {
            return fail("snapshot_timeout_ms must be positive");
        }
        if self.audit.max_attempts == 0 {
            return fail("audit.max_attempts must be at least 1");
        }
        if self.audit.queue_capacity == 0 {
            return fail("audit.queue_capacity must be at least 1");
        }
        if self.audit.initial_backoff_ms > self.audit.max_backoff_ms {
            return fail("audit.initial_backoff_ms exceeds audit.max_backoff_ms");
        }
        if self.sweeper.interval_secs == 0 {
            return fail("sweeper.interval_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(GuardConfig::from_toml_str("").unwrap(), GuardConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = GuardConfig::from_toml_str(
            r#"
            [audit]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.audit.max_attempts, 3);
        assert_eq!(config.audit.retention_days, 3_650);
        assert_eq!(config.sweeper, SweeperConfig::default());
    }

    #[test]
    fn test_rejects_unknown_and_invalid_fields() {
        assert!(GuardConfig::from_toml_str("snapshot_timeout = 5").is_err());
        assert!(GuardConfig::from_toml_str("[audit]\nmax_attempts = 0").is_err());
        assert!(GuardConfig::from_toml_str("[audit]\ninitial_backoff_ms = 10\nmax_backoff_ms = 5").is_err());
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let audit = AuditConfig {
            initial_backoff_ms: 50,
            max_backoff_ms: 300,
            ..AuditConfig::default()
        };
        let delays: Vec<u64> = (1..=5).map(|n| audit.backoff(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![50, 100, 200, 300, 300]);
        assert_eq!(audit.backoff(200), Duration::from_millis(300));
    }

    #[test]
    fn test_retention_is_ten_years_by_default() {
        assert_eq!(AuditConfig::default().retention_ms(), 3_650 * DAY_MS);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "snapshot_timeout_ms = 100\n[sweeper]\ngrant_grace_days = 7\n").unwrap();

        let config = GuardConfig::load(&path).unwrap();
        assert_eq!(config.snapshot_timeout_ms, 100);
        assert_eq!(config.sweeper.grant_grace_days, 7);
    }
}
