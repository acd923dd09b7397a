// src/queue.rs
//! Fire-and-forget command queue for manual triggers.
//!
//! Submitting only confirms the command was accepted. Its outcome is visible
//! through the routine's status keys, the same as for scheduled runs.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::RetryConfig;
use crate::domain::Domain;
use crate::poller::{poll_job_id, Poller, CLEANUP_JOB, DAILY_REPORT_JOB};
use crate::retry::{run_with_retry, RetryPolicy};

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", content = "domain", rename_all = "snake_case")]
pub enum Command {
    PollDomain(Domain),
    DailyReport,
    CleanupCache,
}

impl Command {
    pub fn job_id(&self) -> String {
        match self {
            Command::PollDomain(d) => poll_job_id(*d),
            Command::DailyReport => DAILY_REPORT_JOB.to_string(),
            Command::CleanupCache => CLEANUP_JOB.to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("command queue is full")]
    Full,
    #[error("command worker has stopped")]
    Closed,
}

#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::Sender<Command>,
}

impl CommandQueue {
    /// Spawn the worker. Each command runs as its own task with the retry
    /// policy of its routine; the worker stops once every sender is dropped.
    pub fn spawn(poller: Arc<Poller>, retry: RetryConfig, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Command>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                tracing::info!(target: "poller", job = %cmd.job_id(), "running queued command");
                tokio::spawn(execute(poller.clone(), retry.clone(), cmd));
            }
            tracing::debug!(target: "poller", "command queue closed");
        });
        (Self { tx }, worker)
    }

    pub fn submit(&self, cmd: Command) -> Result<(), QueueError> {
        self.tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

async fn execute(poller: Arc<Poller>, retry: RetryConfig, cmd: Command) {
    let job = cmd.job_id();
    match cmd {
        Command::PollDomain(domain) => {
            let _ = run_with_retry(RetryPolicy::for_polls(&retry), &job, || poller.poll_domain(domain)).await;
        }
        Command::DailyReport => {
            let _ = run_with_retry(RetryPolicy::for_reports(&retry), &job, || poller.run_daily_report()).await;
        }
        Command::CleanupCache => {
            poller.cleanup_cache().await;
        }
    }
}
