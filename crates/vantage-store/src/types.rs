//! Record types persisted by the store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project whose competitors are analysed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// How often a report should be regenerated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Daily,
    #[default]
    Weekly,
    Biweekly,
    Monthly,
    /// User-supplied cron expression (see `ScheduleRecord::custom_cron`).
    Custom,
}

impl Frequency {
    /// All frequencies, in display order.
    pub const ALL: [Frequency; 5] = [
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Biweekly,
        Frequency::Monthly,
        Frequency::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Biweekly => "BIWEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    /// Parse a frequency name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "BIWEEKLY" => Ok(Frequency::Biweekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "CUSTOM" => Ok(Frequency::Custom),
            _ => Err(format!(
                "unknown frequency '{}', expected one of daily/weekly/biweekly/monthly/custom",
                s
            )),
        }
    }
}

/// Lifecycle status of a schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    /// A timer is (or should be) registered for this schedule.
    Active,
    /// Temporarily suspended by the user.
    Paused,
    /// Stopped.
    #[default]
    Inactive,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScheduleStatus::Active => "ACTIVE",
            ScheduleStatus::Paused => "PAUSED",
            ScheduleStatus::Inactive => "INACTIVE",
        })
    }
}

/// A persisted report schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    /// Unique identifier, assigned at creation.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    pub frequency: Frequency,
    /// Cron expression supplied for `Frequency::Custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_cron: Option<String>,
    /// Canonical cron expression derived from `frequency`.
    pub cron_expression: String,
    #[serde(default)]
    pub status: ScheduleStatus,
    /// When the registered timer fires next. `None` while no timer is registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    /// When a report run last finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    pub max_concurrent_jobs: u32,
    pub notify_on_completion: bool,
    pub notify_on_errors: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleRecord {
    /// Apply a partial update. `updated_at` moves only when the patch is stamped.
    pub fn apply(&mut self, patch: SchedulePatch) {
        if let Some(frequency) = patch.frequency {
            self.frequency = frequency;
        }
        if let Some(custom_cron) = patch.custom_cron {
            self.custom_cron = custom_cron;
        }
        if let Some(cron_expression) = patch.cron_expression {
            self.cron_expression = cron_expression;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(next_run_at) = patch.next_run_at {
            self.next_run_at = next_run_at;
        }
        if let Some(last_run_at) = patch.last_run_at {
            self.last_run_at = Some(last_run_at);
        }
        if let Some(max) = patch.max_concurrent_jobs {
            self.max_concurrent_jobs = max;
        }
        if let Some(notify) = patch.notify_on_completion {
            self.notify_on_completion = notify;
        }
        if let Some(notify) = patch.notify_on_errors {
            self.notify_on_errors = notify;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }
}

/// Partial update of a [`ScheduleRecord`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePatch {
    pub frequency: Option<Frequency>,
    pub custom_cron: Option<Option<String>>,
    pub cron_expression: Option<String>,
    pub status: Option<ScheduleStatus>,
    pub next_run_at: Option<Option<DateTime<Utc>>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub max_concurrent_jobs: Option<u32>,
    pub notify_on_completion: Option<bool>,
    pub notify_on_errors: Option<bool>,
    /// Modification time, supplied by the caller's clock.
    pub updated_at: Option<DateTime<Utc>>,
}

impl SchedulePatch {
    /// Patch that only changes status and the next fire time.
    pub fn status(status: ScheduleStatus, next_run_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status: Some(status),
            next_run_at: Some(next_run_at),
            ..Self::default()
        }
    }

    /// Stamp the patch with its modification time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.updated_at = Some(now);
        self
    }
}

/// A generated report, as referenced from persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// Identifier assigned by the report generator.
    pub report_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub generated_at: DateTime<Utc>,
}
