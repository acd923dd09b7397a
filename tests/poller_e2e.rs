// tests/poller_e2e.rs
//
// End-to-end runs of the poller and report manager with fake collaborators.
//
// Covered:
// - a source that fails on its first call: status goes running -> error,
//   error text is populated, no processed batch is written; the retry
//   wrapper then recovers on the second attempt
// - mode=both with a working renderer and a failing deliverer: one delivery
//   error, artifact still present, success=false

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use agworld_reporter::cache::Cache;
use agworld_reporter::config::AppConfig;
use agworld_reporter::domain::{Domain, Filters, RawRecord};
use agworld_reporter::error::SourceError;
use agworld_reporter::notify::Deliverer;
use agworld_reporter::poller::{batch_key, PollOutcome, Poller};
use agworld_reporter::processor::RecordProcessor;
use agworld_reporter::report::{
    create_summary, Artifact, HtmlRenderer, ReportManager, ReportMode, ReportPayload,
};
use agworld_reporter::retry::{run_with_retry, RetryPolicy};
use agworld_reporter::source::{samples, RecordSource};
use agworld_reporter::status::{RunStatus, StatusKeys, StatusKind};

/// Fails the first call, then serves samples. Records the status it sees
/// while fetching so the `running` phase is observable.
struct FlakySource {
    cache: Cache,
    calls: AtomicUsize,
    seen: Mutex<Vec<StatusKind>>,
}

#[async_trait]
impl RecordSource for FlakySource {
    async fn fetch(&self, domain: Domain, _filters: &Filters) -> Result<Vec<RawRecord>, SourceError> {
        let st = RunStatus::read(&self.cache, &StatusKeys::for_domain(domain)).await;
        self.seen.lock().push(st.status);
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(SourceError::Transient("upstream timed out".into()));
        }
        Ok(samples::for_domain(domain))
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

struct FailingDeliverer;

#[async_trait]
impl Deliverer for FailingDeliverer {
    async fn deliver(&self, _p: &ReportPayload, _a: Option<&Artifact>, _r: &[String]) -> anyhow::Result<bool> {
        anyhow::bail!("SMTP 554 relay denied")
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

fn poller(cache: &Cache, source: Arc<FlakySource>, out: &Path) -> Poller {
    let reports = ReportManager::new(out).with_renderer(Arc::new(HtmlRenderer));
    Poller::new(cache.clone(), source, Arc::new(reports), AppConfig::default())
}

#[tokio::test]
async fn failing_source_leaves_error_then_retry_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::in_memory();
    let source = Arc::new(FlakySource {
        cache: cache.clone(),
        calls: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
    });
    let p = poller(&cache, source.clone(), dir.path());
    let keys = StatusKeys::for_domain(Domain::Field);

    p.poll_domain(Domain::Field).await.unwrap_err();
    assert_eq!(source.seen.lock().as_slice(), &[StatusKind::Running]);
    let st = RunStatus::read(&cache, &keys).await;
    assert_eq!(st.status, StatusKind::Error);
    assert!(st.error.as_deref().unwrap().starts_with("Field polling failed: "));
    assert!(st.error.as_deref().unwrap().contains("upstream timed out"));
    assert!(!cache.exists(&batch_key(Domain::Field)).await);

    let policy = RetryPolicy::fixed(Duration::from_millis(5), 3);
    let out = run_with_retry(policy, "poll_fields", || p.poll_domain(Domain::Field)).await;
    assert_eq!(out, Ok(PollOutcome::Completed(2)));
    let st = RunStatus::read(&cache, &keys).await;
    assert_eq!(st.status, StatusKind::Completed);
    assert_eq!(st.error, None);
    assert!(cache.exists(&batch_key(Domain::Field)).await);
}

#[tokio::test]
async fn working_renderer_with_failing_deliverer() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = ReportManager::new(dir.path())
        .with_renderer(Arc::new(HtmlRenderer))
        .with_deliverer(Arc::new(FailingDeliverer));
    let p = RecordProcessor::new();
    let records: Vec<_> = samples::for_domain(Domain::Field)
        .iter()
        .map(|r| p.process(r, Domain::Field).unwrap())
        .collect();
    let payload = create_summary(&p, &records);

    let out = mgr
        .generate(&payload, ReportMode::Both, &["ops@example.com".to_string()])
        .await;

    assert!(!out.success);
    assert!(!out.delivered);
    assert_eq!(out.errors.len(), 1);
    assert!(out.errors[0].starts_with("Email sending failed: "));
    let artifact = out.artifact.expect("rendered artifact kept");
    let html = tokio::fs::read_to_string(&artifact.path).await.unwrap();
    assert!(html.contains("Total Records Processed: 2"));
}
