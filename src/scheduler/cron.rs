// src/scheduler/cron.rs
//! Five-field cron expressions (`minute hour day month weekday`), evaluated in UTC.
//!
//! Parsing and the next-occurrence search are delegated to `croner`. Weekday
//! 0 and 7 are both Sunday. Day-of-month and weekday must both match.

use chrono::{DateTime, Utc};
use croner::Cron;
use std::fmt;

use crate::error::SchedulerError;

#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    cron: Cron,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, SchedulerError> {
        let expr = expr.split_whitespace().collect::<Vec<_>>().join(" ");
        let invalid = |reason: String| SchedulerError::InvalidCron {
            expr: expr.clone(),
            reason,
        };
        // croner also takes a leading seconds field; only the classic form is accepted here
        let fields = expr.split(' ').count();
        if fields != 5 {
            return Err(invalid(format!("expected 5 fields, got {fields}")));
        }
        let cron = Cron::new(&expr)
            .with_dom_and_dow()
            .parse()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Self { expr, cron })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First matching minute strictly after `after`; `None` if the expression never fires.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.cron.find_next_occurrence(&after, false) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(target: "scheduler", cron = %self.expr, error = %e, "no next occurrence");
                None
            }
        }
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl Eq for CronSchedule {}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}
