//! Frequency-to-cron translation and next-run calculation.
//!
//! Frequencies map onto a fixed table of 5-field cron expressions, all
//! anchored at 09:00 server-local time. Expressions use the classic Unix
//! layout: `minute hour day-of-month month day-of-week`, and are evaluated
//! with `croner`.
//!
//! Field syntax is croner's: `*`, values, ranges, lists, steps and month or
//! weekday names in any case. Day-of-week takes 0-7 with both 0 and 7 meaning
//! Sunday. When day-of-month and day-of-week are both restricted a day
//! matching either one fires. An open day-of-week step such as `1/2` runs to
//! Saturday, so the biweekly expression `0 9 * * 1/2` fires Monday, Wednesday
//! and Friday. That is a known approximation of "every other week" and is
//! kept as-is.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Timelike, Utc};
use croner::Cron;
use thiserror::Error;
use tracing::warn;

use vantage_store::Frequency;

/// Once a day at 09:00.
pub const DAILY_CRON: &str = "0 9 * * *";
/// Monday mornings.
pub const WEEKLY_CRON: &str = "0 9 * * 1";
/// Every-other-day-of-week approximation of "every other Monday".
pub const BIWEEKLY_CRON: &str = "0 9 * * 1/2";
/// First of the month.
pub const MONTHLY_CRON: &str = "0 9 1 * *";
/// Used for custom schedules without a usable expression.
pub const DEFAULT_CRON: &str = WEEKLY_CRON;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Errors from parsing or evaluating a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("cron expression must have 5 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid cron expression '{expression}': {reason}")]
    Invalid { expression: String, reason: String },

    #[error("cron expression '{0}' never matches")]
    NoMatch(String),
}

/// Map a frequency to its canonical cron expression.
///
/// `custom` is only consulted for [`Frequency::Custom`]. A missing or
/// unparsable custom expression falls back to [`DEFAULT_CRON`] so that a
/// schedule always stays representable.
pub fn frequency_to_cron(frequency: Frequency, custom: Option<&str>) -> String {
    match frequency {
        Frequency::Daily => DAILY_CRON.to_string(),
        Frequency::Weekly => WEEKLY_CRON.to_string(),
        Frequency::Biweekly => BIWEEKLY_CRON.to_string(),
        Frequency::Monthly => MONTHLY_CRON.to_string(),
        Frequency::Custom => match custom.map(str::trim).filter(|s| !s.is_empty()) {
            Some(custom) => match custom.parse::<CronExpression>() {
                Ok(expr) => expr.to_string(),
                Err(e) => {
                    warn!(custom, error = %e, "invalid custom cron, using default");
                    DEFAULT_CRON.to_string()
                }
            },
            None => DEFAULT_CRON.to_string(),
        },
    }
}

/// Map a free-form frequency label to a cron expression.
///
/// Unrecognized labels fall back to [`DEFAULT_CRON`].
pub fn cron_for_label(label: &str, custom: Option<&str>) -> String {
    match label.parse::<Frequency>() {
        Ok(frequency) => frequency_to_cron(frequency, custom),
        Err(_) => DEFAULT_CRON.to_string(),
    }
}

/// Soonest instant strictly after `from` matching `expression`, evaluated in
/// server-local time.
pub fn calculate_next_run(expression: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
    calculate_next_run_in(expression, from, &Local)
}

/// Soonest instant strictly after `from` matching `expression`, evaluated in `tz`.
pub fn calculate_next_run_in<Tz: TimeZone>(
    expression: &str,
    from: DateTime<Utc>,
    tz: &Tz,
) -> Result<DateTime<Utc>, CronError> {
    let expr: CronExpression = expression.parse()?;
    expr.next_after_in(&from, tz)
        .ok_or_else(|| CronError::NoMatch(expr.to_string()))
}

/// A parsed 5-field cron expression.
#[derive(Clone)]
pub struct CronExpression {
    /// Fields as written, joined by single spaces.
    source: String,
    cron: Arc<Cron>,
}

impl CronExpression {
    /// Soonest matching instant strictly after `after`, evaluated in `tz`.
    pub fn next_after_in<Tz: TimeZone>(
        &self,
        after: &DateTime<Utc>,
        tz: &Tz,
    ) -> Option<DateTime<Utc>> {
        let start = after.with_nanosecond(0)?.with_timezone(tz);
        let next = self
            .cron
            .find_next_occurrence(&start, false)
            .ok()?
            .with_timezone(&Utc);
        Some(next).filter(|next| next > after)
    }

    /// Soonest matching instant strictly after `after`, in server-local time.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_after_in(after, &Local)
    }

    /// Whether the minute containing `time` matches, read in `tz`.
    pub fn matches_in<Tz: TimeZone>(&self, time: &DateTime<Utc>, tz: &Tz) -> bool {
        let Some(minute) = time.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
            return false;
        };
        let local = minute.with_timezone(tz);
        self.cron
            .find_next_occurrence(&local, true)
            .is_ok_and(|next| next == local)
    }

    /// Iterate over upcoming fire times after `from`.
    pub fn upcoming_in<'a, Tz: TimeZone>(
        &'a self,
        from: DateTime<Utc>,
        tz: &'a Tz,
    ) -> impl Iterator<Item = DateTime<Utc>> + 'a {
        std::iter::successors(self.next_after_in(&from, tz), move |prev| {
            self.next_after_in(prev, tz)
        })
    }
}

/// Rewrite open day-of-week steps (`a/n`, `*/n`) to end at Saturday.
fn close_weekday_steps(field: &str, expression: &str) -> Result<String, CronError> {
    let parts = field
        .split(',')
        .map(|part| {
            let Some((start, step)) = part.split_once('/') else {
                return Ok(part.to_string());
            };
            if start.contains('-') {
                return Ok(part.to_string());
            }
            let first = if start == "*" {
                0
            } else {
                match weekday_number(start) {
                    Some(day) => day,
                    None => return Ok(part.to_string()),
                }
            };
            if first > 6 {
                return Err(CronError::Invalid {
                    expression: expression.to_string(),
                    reason: format!("day-of-week step starts past Saturday at '{}'", start),
                });
            }
            Ok(format!("{}-6/{}", first, step))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

fn weekday_number(token: &str) -> Option<u32> {
    token.parse().ok().or_else(|| {
        WEEKDAYS
            .iter()
            .position(|day| *day == token)
            .map(|idx| idx as u32)
    })
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }
        let source = fields.join(" ");

        let mut upper: Vec<String> = fields.iter().map(|f| f.to_ascii_uppercase()).collect();
        upper[4] = close_weekday_steps(&upper[4], &source)?;
        let cron = Cron::from_str(&upper.join(" ")).map_err(|e| CronError::Invalid {
            expression: source.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source,
            cron: Arc::new(cron),
        })
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronExpression {}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
