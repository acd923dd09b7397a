// src/scheduler/mod.rs
//! Single-instance job scheduler.
//!
//! One background task owns trigger evaluation; each firing runs as its own
//! tokio task. At most one invocation per job id is in flight: a firing that
//! arrives while the previous run is still going is dropped (coalesced), and
//! a firing evaluated later than the job's misfire grace is skipped.

pub mod cron;
mod table;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::SchedulerError;
pub use cron::CronSchedule;
pub use table::Due;
use table::{DueJob, JobTable};

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

pub const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Interval(Duration),
    Cron(CronSchedule),
}

impl Trigger {
    pub fn every(interval: Duration) -> Result<Self, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }
        Ok(Trigger::Interval(interval))
    }

    pub fn every_minutes(minutes: u64) -> Result<Self, SchedulerError> {
        Self::every(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn cron(expr: &str) -> Result<Self, SchedulerError> {
        CronSchedule::parse(expr).map(Trigger::Cron)
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(d) => chrono::Duration::from_std(*d)
                .ok()
                .and_then(|d| after.checked_add_signed(d)),
            Trigger::Cron(c) => c.next_after(after),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::Interval(d) if d.as_secs() % 60 == 0 && !d.is_zero() => {
                format!("interval[{}m]", d.as_secs() / 60)
            }
            Trigger::Interval(d) => format!("interval[{}ms]", d.as_millis()),
            Trigger::Cron(c) => format!("cron[{c}]"),
        }
    }
}

#[derive(Clone)]
pub struct JobSpec {
    pub id: String,
    pub trigger: Trigger,
    pub callback: JobFn,
    pub coalesce: bool,
    pub misfire_grace: Duration,
}

impl JobSpec {
    pub fn new<F, Fut>(id: impl Into<String>, trigger: Trigger, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: id.into(),
            trigger,
            callback: Arc::new(move || Box::pin(f()) as JobFuture),
            coalesce: true,
            misfire_grace: DEFAULT_MISFIRE_GRACE,
        }
    }

    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = grace;
        self
    }
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .field("coalesce", &self.coalesce)
            .field("misfire_grace", &self.misfire_grace)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub trigger: String,
    pub paused: bool,
}

struct LoopHandle {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

struct Inner {
    table: Mutex<JobTable>,
    wake: Notify,
    running: AtomicBool,
    handle: tokio::sync::Mutex<Option<LoopHandle>>,
}

/// Cheap to clone; clones drive the same job table.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(JobTable::default()),
                wake: Notify::new(),
                running: AtomicBool::new(false),
                handle: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Add a job, replacing any job with the same id.
    pub fn register(&self, spec: JobSpec) {
        let id = spec.id.clone();
        let trigger = spec.trigger.describe();
        let replaced = self.inner.table.lock().upsert(spec, Utc::now());
        tracing::info!(target: "scheduler", job = %id, %trigger, replaced, "job registered");
        self.inner.wake.notify_one();
    }

    pub fn remove(&self, id: &str) -> Result<(), SchedulerError> {
        if !self.inner.table.lock().remove(id) {
            return Err(SchedulerError::UnknownJob(id.to_string()));
        }
        tracing::info!(target: "scheduler", job = %id, "job removed");
        self.inner.wake.notify_one();
        Ok(())
    }

    pub fn pause(&self, id: &str) -> Result<(), SchedulerError> {
        let mut table = self.inner.table.lock();
        let entry = table
            .get_mut(id)
            .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))?;
        entry.paused = true;
        Ok(())
    }

    /// Resume a paused job; its next fire time is recomputed from now.
    pub fn resume(&self, id: &str) -> Result<(), SchedulerError> {
        {
            let mut table = self.inner.table.lock();
            let entry = table
                .get_mut(id)
                .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))?;
            entry.paused = false;
            entry.next_fire = entry.spec.trigger.next_after(Utc::now());
        }
        self.inner.wake.notify_one();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Ordered by id.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.inner
            .table
            .lock()
            .iter()
            .map(|e| JobInfo {
                id: e.spec.id.clone(),
                next_fire_time: if e.paused { None } else { e.next_fire },
                trigger: e.spec.trigger.describe(),
                paused: e.paused,
            })
            .collect()
    }

    /// Spawn the trigger loop. A no-op if it is already running.
    pub async fn start(&self) {
        let mut handle = self.inner.handle.lock().await;
        if handle.is_some() {
            tracing::debug!(target: "scheduler", "already running");
            return;
        }
        self.inner.table.lock().reschedule_all(Utc::now());

        let stop = Arc::new(Notify::new());
        let task = tokio::spawn(run_loop(self.inner.clone(), stop.clone()));
        *handle = Some(LoopHandle { stop, task });
        self.inner.running.store(true, Ordering::Release);
        tracing::info!(target: "scheduler", jobs = self.list_jobs().len(), "scheduler started");
    }

    /// Stop firing, wait for in-flight invocations to finish, then drop all jobs.
    /// Job failures during teardown are logged only.
    pub async fn shutdown(&self) {
        let Some(LoopHandle { stop, task }) = self.inner.handle.lock().await.take() else {
            return;
        };
        stop.notify_one();
        if let Err(e) = task.await {
            tracing::error!(target: "scheduler", error = %e, "scheduler loop ended abnormally");
        }
        self.inner.running.store(false, Ordering::Release);
        self.inner.table.lock().clear();
        tracing::info!(target: "scheduler", "scheduler shut down");
    }
}

/// Clears the job's in-flight flag when the invocation ends, including on panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run_loop(inner: Arc<Inner>, stop: Arc<Notify>) {
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        let next = inner.table.lock().earliest();
        let sleep_for = match next {
            Some(at) => at
                .signed_duration_since(Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
            // nothing scheduled; wait for a table change
            None => Duration::from_secs(3600),
        };

        tokio::select! {
            _ = stop.notified() => break,
            _ = inner.wake.notified() => continue,
            Some(res) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = res {
                    tracing::error!(target: "scheduler", error = %e, "job task panicked");
                }
            }
            _ = tokio::time::sleep(sleep_for) => {
                let due = inner.table.lock().collect_due(Utc::now());
                for job in due {
                    dispatch(job, &mut in_flight);
                }
            }
        }
    }

    while let Some(res) = in_flight.join_next().await {
        if let Err(e) = res {
            tracing::error!(target: "scheduler", error = %e, "job failed during shutdown");
        }
    }
}

fn dispatch(job: DueJob, in_flight: &mut JoinSet<()>) {
    match job.due {
        Due::Missed => {
            tracing::warn!(target: "scheduler", job = %job.id, scheduled_for = %job.scheduled_for, "run time missed, skipping");
            counter!("scheduler_missed_total", "job" => job.id).increment(1);
        }
        Due::Coalesced => {
            tracing::debug!(target: "scheduler", job = %job.id, "previous run still in flight, dropping firing");
            counter!("scheduler_coalesced_total", "job" => job.id).increment(1);
        }
        Due::Run => {
            job.running.store(true, Ordering::Release);
            let guard = InFlight(job.running);
            let fut = (job.callback)();
            let id = job.id;
            in_flight.spawn(async move {
                let _guard = guard;
                tracing::debug!(target: "scheduler", job = %id, "job started");
                fut.await;
                tracing::debug!(target: "scheduler", job = %id, "job finished");
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn trigger_descriptions() {
        assert_eq!(Trigger::every_minutes(60).unwrap().describe(), "interval[60m]");
        assert_eq!(
            Trigger::every(Duration::from_millis(50)).unwrap().describe(),
            "interval[50ms]"
        );
        assert_eq!(Trigger::cron("0 8 * * *").unwrap().describe(), "cron[0 8 * * *]");
        assert_eq!(Trigger::every_minutes(0), Err(SchedulerError::ZeroInterval));
    }

    #[tokio::test]
    async fn list_jobs_reports_each_id_once() {
        let s = Scheduler::new();
        s.register(JobSpec::new("poll_fields", Trigger::every_minutes(60).unwrap(), || async {}));
        s.register(JobSpec::new("poll_fields", Trigger::every_minutes(15).unwrap(), || async {}));
        s.register(JobSpec::new("daily_report", Trigger::cron("0 8 * * *").unwrap(), || async {}));

        let jobs = s.list_jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].id, "poll_fields");
        assert_eq!(jobs[1].trigger, "interval[15m]");
        assert!(jobs[1].next_fire_time.is_some());

        s.pause("poll_fields").unwrap();
        assert_eq!(s.list_jobs()[1].next_fire_time, None);
        s.resume("poll_fields").unwrap();
        s.remove("daily_report").unwrap();
        assert_eq!(s.list_jobs().len(), 1);
        assert_eq!(s.remove("nope"), Err(SchedulerError::UnknownJob("nope".into())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_job_completes_once_despite_repeated_firings() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let s = Scheduler::new();
        let (st, fi) = (started.clone(), finished.clone());
        s.register(JobSpec::new(
            "slow",
            Trigger::every(Duration::from_millis(50)).unwrap(),
            move || {
                let (st, fi) = (st.clone(), fi.clone());
                async move {
                    // only the first invocation counts; later ones would prove overlap
                    if st.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        fi.fetch_add(1, Ordering::SeqCst);
                    }
                }
            },
        ));
        s.start().await;
        // first firing at ~50ms; the job holds until ~350ms
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1, "overlapping run started");
        s.pause("slow").unwrap();
        s.shutdown().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(!s.is_running());
        assert!(s.list_jobs().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn re_registering_a_running_job_does_not_overlap_it() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let job = {
            let (active, peak) = (active.clone(), peak.clone());
            move || {
                let (active, peak) = (active.clone(), peak.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            }
        };
        let trigger = Trigger::every(Duration::from_millis(40)).unwrap();

        let s = Scheduler::new();
        s.register(JobSpec::new("poll_fields", trigger.clone(), job.clone()));
        s.start().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(active.load(Ordering::SeqCst), 1);

        s.remove("poll_fields").unwrap();
        s.register(JobSpec::new("poll_fields", trigger, job));
        tokio::time::sleep(Duration::from_millis(150)).await;
        s.pause("poll_fields").unwrap();
        s.shutdown().await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_job() {
        let done = Arc::new(AtomicBool::new(false));
        let s = Scheduler::new();
        let d = done.clone();
        s.register(JobSpec::new(
            "once",
            Trigger::every(Duration::from_millis(20)).unwrap(),
            move || {
                let d = d.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    d.store(true, Ordering::SeqCst);
                }
            },
        ));
        s.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        s.shutdown().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn independent_jobs_do_not_block_each_other() {
        let fast_runs = Arc::new(AtomicUsize::new(0));
        let s = Scheduler::new();
        s.register(JobSpec::new(
            "blocker",
            Trigger::every(Duration::from_millis(20)).unwrap(),
            || async { tokio::time::sleep(Duration::from_millis(400)).await },
        ));
        let f = fast_runs.clone();
        s.register(JobSpec::new(
            "fast",
            Trigger::every(Duration::from_millis(30)).unwrap(),
            move || {
                let f = f.clone();
                async move {
                    f.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));
        s.start().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        s.pause("fast").unwrap();
        s.pause("blocker").unwrap();
        s.shutdown().await;
        assert!(fast_runs.load(Ordering::SeqCst) >= 2);
    }
}
