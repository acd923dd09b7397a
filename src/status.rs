// src/status.rs
//! Run-status records kept in the cache: one `status`, `last_run` and `error`
//! key per routine. These keys are the only audit trail of scheduled runs.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::domain::Domain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    #[default]
    Idle,
    Running,
    Completed,
    NoData,
    Error,
}

impl StatusKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Idle => "idle",
            StatusKind::Running => "running",
            StatusKind::Completed => "completed",
            StatusKind::NoData => "no_data",
            StatusKind::Error => "error",
        }
    }

    /// Unrecognised values read as `Idle`.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "running" => StatusKind::Running,
            "completed" => StatusKind::Completed,
            "no_data" => StatusKind::NoData,
            "error" => StatusKind::Error,
            _ => StatusKind::Idle,
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key triple for one routine, e.g. `polling:fields:*` or `report:daily:*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusKeys {
    prefix: String,
}

impl StatusKeys {
    pub fn for_domain(domain: Domain) -> Self {
        Self {
            prefix: format!("polling:{}", domain.collection()),
        }
    }

    pub fn daily_report() -> Self {
        Self {
            prefix: "report:daily".to_string(),
        }
    }

    pub fn status(&self) -> String {
        format!("{}:status", self.prefix)
    }

    pub fn last_run(&self) -> String {
        format!("{}:last_run", self.prefix)
    }

    pub fn error(&self) -> String {
        format!("{}:error", self.prefix)
    }

    /// `status=running` and `last_run=now`. Two independent writes.
    pub async fn begin(&self, cache: &Cache, now: DateTime<Utc>) {
        cache.set(&self.status(), StatusKind::Running.as_str(), None).await;
        cache.set(&self.last_run(), &now.to_rfc3339(), None).await;
    }

    pub async fn set_status(&self, cache: &Cache, kind: StatusKind) {
        cache.set(&self.status(), kind.as_str(), None).await;
    }

    /// `status=completed` and the previous error cleared.
    pub async fn complete(&self, cache: &Cache) {
        self.set_status(cache, StatusKind::Completed).await;
        cache.delete(&self.error()).await;
    }

    pub async fn fail(&self, cache: &Cache, message: &str) {
        self.set_status(cache, StatusKind::Error).await;
        cache.set(&self.error(), message, None).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunStatus {
    pub status: StatusKind,
    pub last_run: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunStatus {
    /// Missing keys read as idle / never run. An unparsable `last_run` reads as absent.
    pub async fn read(cache: &Cache, keys: &StatusKeys) -> Self {
        let status = cache
            .get_raw(&keys.status())
            .await
            .map(|s| StatusKind::parse(&s))
            .unwrap_or_default();
        let last_run = cache
            .get_raw(&keys.last_run())
            .await
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|t| t.with_timezone(&Utc));
        let error = cache.get_raw(&keys.error()).await;
        Self {
            status,
            last_run,
            error,
        }
    }

    /// A `running` status whose `last_run` is older than the job interval:
    /// the run most likely died without recording an outcome.
    pub fn is_stale(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        if self.status != StatusKind::Running {
            return false;
        }
        match self.last_run {
            Some(t) => now
                .signed_duration_since(t)
                .to_std()
                .is_ok_and(|age| age > interval),
            // running with no start time recorded
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn keys_use_collection_names() {
        let k = StatusKeys::for_domain(Domain::Activity);
        assert_eq!(k.status(), "polling:activities:status");
        assert_eq!(k.last_run(), "polling:activities:last_run");
        assert_eq!(StatusKeys::daily_report().error(), "report:daily:error");
    }

    #[tokio::test]
    async fn status_round_trips_through_plain_strings() {
        let cache = Cache::in_memory();
        let keys = StatusKeys::for_domain(Domain::Field);
        assert_eq!(RunStatus::read(&cache, &keys).await, RunStatus::default());

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        keys.begin(&cache, now).await;
        keys.fail(&cache, "Field polling failed: boom").await;
        assert_eq!(cache.get_raw(&keys.status()).await.as_deref(), Some("error"));

        let st = RunStatus::read(&cache, &keys).await;
        assert_eq!(st.status, StatusKind::Error);
        assert_eq!(st.last_run, Some(now));
        assert_eq!(st.error.as_deref(), Some("Field polling failed: boom"));

        keys.complete(&cache).await;
        let st = RunStatus::read(&cache, &keys).await;
        assert_eq!(st.status, StatusKind::Completed);
        assert_eq!(st.error, None);
    }

    #[test]
    fn stale_running_is_detected_against_interval() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let hour = Duration::from_secs(3600);
        let mut st = RunStatus {
            status: StatusKind::Running,
            last_run: Some(now - chrono::Duration::minutes(90)),
            error: None,
        };
        assert!(st.is_stale(hour, now));
        st.last_run = Some(now - chrono::Duration::minutes(30));
        assert!(!st.is_stale(hour, now));
        st.status = StatusKind::Completed;
        st.last_run = Some(now - chrono::Duration::days(3));
        assert!(!st.is_stale(hour, now));
    }
}
