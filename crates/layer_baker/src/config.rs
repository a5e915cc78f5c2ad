//! Tunables for the baking engine.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Soft cap on entities per division when a layer does not set its own
pub const DEFAULT_DIVISION_SIZE: u32 = 100;
/// How far past the soft cap a leaf division may grow
pub const DIVISION_SIZE_GROWTH_LIMIT: f64 = 0.5;
/// Seconds between checks for a finished bake
pub const BAKER_MONITOR_DELAY_SECS: u64 = 5;
/// Records deleted or reset per setup page
pub const SETUP_PAGE_SIZE: usize = 1000;
/// Wall-clock budget for a single stage task
pub const TASK_BUDGET_MS: u64 = 30_000;

fn default_division_size() -> u32 {
    DEFAULT_DIVISION_SIZE
}

fn default_growth_limit() -> f64 {
    DIVISION_SIZE_GROWTH_LIMIT
}

fn default_monitor_delay() -> u64 {
    BAKER_MONITOR_DELAY_SECS
}

fn default_page_size() -> usize {
    SETUP_PAGE_SIZE
}

fn default_task_budget() -> u64 {
    TASK_BUDGET_MS
}

/// Baking engine settings, usually the `[baker]` table of a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakerSettings {
    /// Soft cap on entities per division for layers without their own
    #[serde(default = "default_division_size")]
    pub default_division_size: u32,
    /// Fraction a leaf division may exceed the soft cap by
    #[serde(default = "default_growth_limit")]
    pub division_growth_limit: f64,
    /// Seconds between monitor polls
    #[serde(default = "default_monitor_delay")]
    pub monitor_delay_secs: u64,
    /// Records processed per setup page
    #[serde(default = "default_page_size")]
    pub setup_page_size: usize,
    /// Milliseconds a single stage task may run before it checkpoints
    #[serde(default = "default_task_budget")]
    pub task_budget_ms: u64,
}

impl Default for BakerSettings {
    fn default() -> Self {
        Self {
            default_division_size: DEFAULT_DIVISION_SIZE,
            division_growth_limit: DIVISION_SIZE_GROWTH_LIMIT,
            monitor_delay_secs: BAKER_MONITOR_DELAY_SECS,
            setup_page_size: SETUP_PAGE_SIZE,
            task_budget_ms: TASK_BUDGET_MS,
        }
    }
}

impl BakerSettings {
    pub fn monitor_delay(&self) -> Duration {
        Duration::from_secs(self.monitor_delay_secs)
    }

    pub fn task_budget(&self) -> Duration {
        Duration::from_millis(self.task_budget_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_division_size == 0 {
            return Err(ConfigError::ZeroDivisionSize);
        }
        if !self.division_growth_limit.is_finite() || self.division_growth_limit < 0.0 {
            return Err(ConfigError::InvalidGrowthLimit(self.division_growth_limit));
        }
        if self.setup_page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.task_budget_ms == 0 {
            return Err(ConfigError::ZeroTaskBudget);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = BakerSettings::default();
        assert_eq!(settings.default_division_size, 100);
        assert_eq!(settings.division_growth_limit, 0.5);
        assert_eq!(settings.monitor_delay(), Duration::from_secs(5));
        assert_eq!(settings.setup_page_size, 1000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let settings: BakerSettings = serde_json::from_str(r#"{"default_division_size": 41}"#).unwrap();
        assert_eq!(settings.default_division_size, 41);
        assert_eq!(settings.division_growth_limit, 0.5);
        assert_eq!(settings.task_budget_ms, TASK_BUDGET_MS);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = BakerSettings::default();
        settings.default_division_size = 0;
        assert_eq!(settings.validate(), Err(ConfigError::ZeroDivisionSize));

        let mut settings = BakerSettings::default();
        settings.division_growth_limit = -0.1;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidGrowthLimit(_))
        ));

        let mut settings = BakerSettings::default();
        settings.division_growth_limit = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = BakerSettings::default();
        settings.setup_page_size = 0;
        assert_eq!(settings.validate(), Err(ConfigError::ZeroPageSize));

        let mut settings = BakerSettings::default();
        settings.task_budget_ms = 0;
        assert_eq!(settings.validate(), Err(ConfigError::ZeroTaskBudget));
    }
}
