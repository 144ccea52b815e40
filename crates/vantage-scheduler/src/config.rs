//! Caller-supplied schedule configuration.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use vantage_store::Frequency;

use crate::SchedulerError;
use crate::cron::{CronError, CronExpression, frequency_to_cron};

/// Configuration for a new schedule. Missing JSON fields take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleConfig {
    pub frequency: Frequency,
    /// Only used with `Frequency::Custom`.
    pub custom_cron: Option<String>,
    /// Register a timer immediately.
    pub enabled: bool,
    pub max_concurrent_jobs: u32,
    pub notify_on_completion: bool,
    pub notify_on_errors: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frequency: Frequency::Weekly,
            custom_cron: None,
            enabled: true,
            max_concurrent_jobs: 1,
            notify_on_completion: true,
            notify_on_errors: true,
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        validate_max_concurrent(self.max_concurrent_jobs)?;
        validate_custom_cron(self.frequency, self.custom_cron.as_deref())
    }

    /// Custom expression to keep, dropped for fixed frequencies.
    pub fn effective_custom_cron(&self) -> Option<String> {
        effective_custom(self.frequency, self.custom_cron.clone())
    }

    pub fn cron_expression(&self) -> String {
        frequency_to_cron(self.frequency, self.custom_cron.as_deref())
    }
}

/// Partial change to an existing schedule's configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleUpdate {
    pub frequency: Option<Frequency>,
    pub custom_cron: Option<String>,
    pub max_concurrent_jobs: Option<u32>,
    pub notify_on_completion: Option<bool>,
    pub notify_on_errors: Option<bool>,
}

impl ScheduleUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether applying this changes which cron expression is used.
    pub fn touches_cron(&self) -> bool {
        self.frequency.is_some() || self.custom_cron.is_some()
    }
}

pub(crate) fn validate_max_concurrent(max: u32) -> Result<(), SchedulerError> {
    if max < 1 {
        return Err(SchedulerError::InvalidConfig(
            "maxConcurrentJobs must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// A custom expression must parse and match at least once in the future.
pub(crate) fn validate_custom_cron(
    frequency: Frequency,
    custom: Option<&str>,
) -> Result<(), SchedulerError> {
    if frequency != Frequency::Custom {
        return Ok(());
    }
    let Some(custom) = custom.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(());
    };

    let expr: CronExpression = custom.parse()?;
    if expr.next_after_in(&Utc::now(), &Utc).is_none() {
        return Err(CronError::NoMatch(expr.to_string()).into());
    }
    Ok(())
}

pub(crate) fn effective_custom(frequency: Frequency, custom: Option<String>) -> Option<String> {
    match frequency {
        Frequency::Custom => custom
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}
