// src/error.rs
//! Error taxonomy shared by the sync and reporting pipeline.

use std::time::Duration;
use thiserror::Error;

use crate::domain::Domain;

/// Failures talking to the external Agworld API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Network failure, timeout or non-429 error status.
    #[error("transient source error: {0}")]
    Transient(String),

    /// HTTP 429. `next_delay` is the widened courtesy delay now in effect.
    #[error("rate limited by source, courtesy delay widened to {next_delay:?}")]
    RateLimited { next_delay: Duration },

    /// Response body was not a usable JSON:API document.
    #[error("malformed source response: {0}")]
    MalformedResponse(String),

    #[error("domain '{0}' has no source endpoint")]
    UnsupportedDomain(Domain),
}

impl SourceError {
    /// Whether the job-retry wrapper should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }
}

/// A single raw record could not be mapped to a processed record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("malformed {domain} record: {reason}")]
    MalformedRecord { domain: Domain, reason: String },
}

/// Transport failure of the networked cache tier. Never leaves `cache`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Render and delivery failures, accumulated into a report outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("Render failed: {0}")]
    Render(String),
    #[error("Email sending failed: {0}")]
    Delivery(String),
}

/// Failure of a whole poll or report routine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("{0}")]
    Report(String),
}

impl PollError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(e) => e.is_retryable(),
            // report runs are retried on any failure, with the longer policy
            Self::Report(_) => true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no job with id '{0}'")]
    UnknownJob(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("interval must be greater than zero")]
    ZeroInterval,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AGWORLD_CONFIG_PATH points to non-existent path {0}")]
    MissingPath(String),

    #[error("reading config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}
