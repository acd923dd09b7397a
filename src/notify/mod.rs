// src/notify/mod.rs
//! Delivery boundary for rendered reports.

pub mod email;

use async_trait::async_trait;

use crate::report::{Artifact, ReportPayload};
pub use email::EmailDeliverer;

/// Sends a report to recipients.
///
/// `Ok(false)` means the transport is not configured and nothing was sent;
/// `Err` is a real send failure.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(
        &self,
        payload: &ReportPayload,
        artifact: Option<&Artifact>,
        recipients: &[String],
    ) -> anyhow::Result<bool>;

    fn name(&self) -> &'static str;
}
