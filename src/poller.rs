// src/poller.rs
//! Scheduled routines: one poll per domain (fetch, process, cache), the daily
//! report aggregation, and the raw-fetch cache cleanup.
//!
//! Each routine publishes its progress through the status keys in
//! [`crate::status`]. A failure is written to the `error` key before it is
//! returned, so a run never stays at `running` because of an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::Cache;
use crate::config::AppConfig;
use crate::domain::{Domain, Filters};
use crate::error::{PollError, SchedulerError};
use crate::processor::{ProcessedRecord, RecordProcessor};
use crate::report::{create_summary, ReportManager, ReportMode, ReportOutcome};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::scheduler::{JobSpec, Scheduler, Trigger};
use crate::source::RecordSource;
use crate::status::{RunStatus, StatusKeys, StatusKind};

/// Raw fetch caches swept by the cleanup job.
pub const FETCH_CACHE_PATTERN: &str = "agworld:*:fetch:*";
pub const REPORT_META_KEY: &str = "report:daily:latest";
pub const DAILY_REPORT_JOB: &str = "daily_report";
pub const CLEANUP_JOB: &str = "cleanup_cache";

/// Cached processed batch of one domain.
pub fn batch_key(domain: Domain) -> String {
    format!("agworld:{}:latest", domain.collection())
}

pub fn record_key(domain: Domain, content_hash: &str) -> String {
    format!("processed:{}:{content_hash}", domain.collection())
}

pub fn poll_job_id(domain: Domain) -> String {
    format!("poll_{}", domain.collection())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    NoData,
    /// Number of distinct processed records written.
    Completed(usize),
}

/// Stored under [`REPORT_META_KEY`] after a successful report run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub file_path: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub record_count: usize,
}

/// One row of the status overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedStatus {
    pub name: String,
    #[serde(flatten)]
    pub status: RunStatus,
    /// `running` for longer than the routine's interval.
    pub stale: bool,
}

pub struct Poller {
    cache: Cache,
    source: Arc<dyn RecordSource>,
    processor: RecordProcessor,
    reports: Arc<ReportManager>,
    cfg: AppConfig,
}

impl Poller {
    pub fn new(cache: Cache, source: Arc<dyn RecordSource>, reports: Arc<ReportManager>, cfg: AppConfig) -> Self {
        Self {
            cache,
            source,
            processor: RecordProcessor::new(),
            reports,
            cfg,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    /// Fetch, process and cache one domain.
    pub async fn poll_domain(&self, domain: Domain) -> Result<PollOutcome, PollError> {
        let keys = StatusKeys::for_domain(domain);
        keys.begin(&self.cache, Utc::now()).await;
        tracing::info!(target: "poller", %domain, source = self.source.name(), "polling");

        match self.poll_once(domain).await {
            Ok(PollOutcome::NoData) => {
                keys.set_status(&self.cache, StatusKind::NoData).await;
                counter!("poll_runs_total", "domain" => domain.as_str(), "outcome" => "no_data").increment(1);
                tracing::info!(target: "poller", %domain, "no records returned");
                Ok(PollOutcome::NoData)
            }
            Ok(done @ PollOutcome::Completed(n)) => {
                keys.complete(&self.cache).await;
                counter!("poll_runs_total", "domain" => domain.as_str(), "outcome" => "completed").increment(1);
                tracing::info!(target: "poller", %domain, records = n, "poll completed");
                Ok(done)
            }
            Err(e) => {
                let message = format!("{} polling failed: {e}", domain.label());
                keys.fail(&self.cache, &message).await;
                counter!("poll_runs_total", "domain" => domain.as_str(), "outcome" => "error").increment(1);
                tracing::error!(target: "poller", %domain, error = %e, "poll failed");
                Err(e)
            }
        }
    }

    async fn poll_once(&self, domain: Domain) -> Result<PollOutcome, PollError> {
        let raw = self.source.fetch(domain, &Filters::new()).await?;
        if raw.is_empty() {
            return Ok(PollOutcome::NoData);
        }

        let now = Utc::now();
        let record_ttl = Some(Duration::from_secs(self.cfg.cache.record_ttl_secs));
        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(raw.len());
        for r in &raw {
            let processed = match self.processor.process_at(r, domain, now) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(target: "poller", %domain, error = %e, "skipping record");
                    continue;
                }
            };
            if !seen.insert(processed.content_hash.clone()) {
                continue;
            }
            self.cache
                .set(&record_key(domain, &processed.content_hash), &processed, record_ttl)
                .await;
            batch.push(processed);
        }

        let batch_ttl = Some(Duration::from_secs(self.cfg.cache.batch_ttl_secs));
        self.cache.set(&batch_key(domain), &batch, batch_ttl).await;
        Ok(PollOutcome::Completed(batch.len()))
    }

    /// Every cached processed record across the synced domains. Keys or
    /// entries that do not decode are logged and skipped one by one.
    pub async fn merge_latest(&self) -> Vec<ProcessedRecord> {
        let mut merged = Vec::new();
        for domain in Domain::SYNCED {
            let key = batch_key(domain);
            let Some(raw) = self.cache.get_raw(&key).await else {
                continue;
            };
            let items = match serde_json::from_str::<Vec<Value>>(&raw) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(target: "poller", %key, error = %e, "cached batch is not a JSON array");
                    continue;
                }
            };
            for (i, item) in items.into_iter().enumerate() {
                match serde_json::from_value::<ProcessedRecord>(item) {
                    Ok(r) => merged.push(r),
                    Err(e) => tracing::warn!(target: "poller", %key, index = i, error = %e, "dropping undecodable record"),
                }
            }
        }
        merged
    }

    /// Aggregate cached batches into a report. `Ok(None)` when there was nothing to report.
    pub async fn run_daily_report(&self) -> Result<Option<ReportOutcome>, PollError> {
        let keys = StatusKeys::daily_report();
        keys.begin(&self.cache, Utc::now()).await;

        let records = self.merge_latest().await;
        if records.is_empty() {
            keys.set_status(&self.cache, StatusKind::NoData).await;
            counter!("report_runs_total", "outcome" => "no_data").increment(1);
            tracing::info!(target: "report", "no cached records, skipping daily report");
            return Ok(None);
        }

        let payload = create_summary(&self.processor, &records);
        let recipients = self.cfg.report.recipients.clone();
        let mode = if recipients.is_empty() {
            ReportMode::RenderOnly
        } else {
            ReportMode::Both
        };
        let reports = self.reports.clone();
        let task = tokio::spawn(async move { reports.generate(&payload, mode, &recipients).await });

        match task.await {
            Ok(outcome) if outcome.success => {
                let meta = ReportMeta {
                    file_path: outcome.artifact.as_ref().map(|a| a.path.display().to_string()),
                    generated_at: Utc::now(),
                    record_count: records.len(),
                };
                let ttl = Some(Duration::from_secs(self.cfg.cache.report_meta_ttl_secs));
                self.cache.set(REPORT_META_KEY, &meta, ttl).await;
                keys.complete(&self.cache).await;
                counter!("report_runs_total", "outcome" => "completed").increment(1);
                tracing::info!(target: "report", records = records.len(), file = ?meta.file_path, "daily report generated");
                Ok(Some(outcome))
            }
            Ok(outcome) => {
                let message = format!("Report generation failed: {}", outcome.errors.join("; "));
                keys.fail(&self.cache, &message).await;
                counter!("report_runs_total", "outcome" => "error").increment(1);
                Err(PollError::Report(message))
            }
            Err(e) => {
                let message = format!("Daily report generation failed: {e}");
                keys.fail(&self.cache, &message).await;
                counter!("report_runs_total", "outcome" => "error").increment(1);
                tracing::error!(target: "report", error = %e, "report task aborted");
                Err(PollError::Report(message))
            }
        }
    }

    /// Drop raw fetch caches so the next poll goes upstream.
    pub async fn cleanup_cache(&self) -> usize {
        let removed = self.cache.sweep(FETCH_CACHE_PATTERN).await;
        tracing::info!(target: "poller", removed, "cache cleanup completed");
        removed
    }

    /// Status of every domain routine followed by the daily report.
    pub async fn all_statuses(&self) -> Vec<NamedStatus> {
        let now = Utc::now();
        let mut out = Vec::with_capacity(Domain::SYNCED.len() + 1);
        for domain in Domain::SYNCED {
            let status = RunStatus::read(&self.cache, &StatusKeys::for_domain(domain)).await;
            let stale = self
                .cfg
                .schedule
                .interval_for(domain)
                .is_some_and(|iv| status.is_stale(iv, now));
            out.push(NamedStatus {
                name: domain.collection().to_string(),
                status,
                stale,
            });
        }
        let status = RunStatus::read(&self.cache, &StatusKeys::daily_report()).await;
        let stale = status.is_stale(Duration::from_secs(24 * 3600), now);
        out.push(NamedStatus {
            name: DAILY_REPORT_JOB.to_string(),
            status,
            stale,
        });
        out
    }

    /// Register the poll, report and cleanup jobs. Domains without a
    /// configured interval are not scheduled.
    pub fn install_jobs(self: &Arc<Self>, scheduler: &Scheduler) -> Result<(), SchedulerError> {
        let sched = &self.cfg.schedule;
        let grace = Duration::from_secs(sched.misfire_grace_secs);
        let polls = RetryPolicy::for_polls(&self.cfg.retry);
        let reports = RetryPolicy::for_reports(&self.cfg.retry);

        for domain in Domain::SYNCED {
            let Some(interval) = sched.interval_for(domain) else {
                tracing::info!(target: "poller", %domain, "no interval configured, not scheduled");
                continue;
            };
            let id = poll_job_id(domain);
            let poller = self.clone();
            let job = id.clone();
            scheduler.register(
                JobSpec::new(id, Trigger::every(interval)?, move || {
                    let (poller, job) = (poller.clone(), job.clone());
                    async move {
                        let _ = run_with_retry(polls, &job, || poller.poll_domain(domain)).await;
                    }
                })
                .with_coalesce(sched.coalesce)
                .with_misfire_grace(grace),
            );
        }

        let poller = self.clone();
        scheduler.register(
            JobSpec::new(DAILY_REPORT_JOB, Trigger::cron(&sched.daily_report_cron)?, move || {
                let poller = poller.clone();
                async move {
                    let _ = run_with_retry(reports, DAILY_REPORT_JOB, || poller.run_daily_report()).await;
                }
            })
            .with_coalesce(sched.coalesce)
            .with_misfire_grace(grace),
        );

        let poller = self.clone();
        scheduler.register(
            JobSpec::new(CLEANUP_JOB, Trigger::cron(&sched.cleanup_cron)?, move || {
                let poller = poller.clone();
                async move {
                    poller.cleanup_cache().await;
                }
            })
            .with_coalesce(sched.coalesce)
            .with_misfire_grace(grace),
        );
        Ok(())
    }
}
