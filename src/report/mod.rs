// src/report/mod.rs
//! Report manager: builds the summary payload, renders it and hands it to
//! delivery. Render and delivery failures are collected, not raised.

pub mod render;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::notify::Deliverer;
use crate::processor::{AggregateSummary, ProcessedRecord, RecordProcessor};
pub use render::{Artifact, ArtifactFormat, HtmlRenderer, PlainTextRenderer, Renderer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub report_type: String,
    pub content: String,
    pub aggregate: AggregateSummary,
}

impl ReportPayload {
    pub fn created_at_text(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    RenderOnly,
    DeliverOnly,
    Both,
}

impl ReportMode {
    fn renders(self) -> bool {
        matches!(self, ReportMode::RenderOnly | ReportMode::Both)
    }

    fn delivers(self) -> bool {
        matches!(self, ReportMode::DeliverOnly | ReportMode::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOutcome {
    /// True only when `errors` is empty.
    pub success: bool,
    pub artifact: Option<Artifact>,
    pub delivered: bool,
    pub errors: Vec<String>,
}

pub fn create_summary(processor: &RecordProcessor, records: &[ProcessedRecord]) -> ReportPayload {
    create_summary_at(processor, records, Utc::now())
}

pub fn create_summary_at(
    processor: &RecordProcessor,
    records: &[ProcessedRecord],
    now: DateTime<Utc>,
) -> ReportPayload {
    let aggregate = processor.aggregate(records);
    let mut payload = ReportPayload {
        title: format!("Agworld Data Summary - {}", now.format("%Y-%m-%d %H:%M")),
        created_at: now,
        status: "completed".to_string(),
        report_type: "summary".to_string(),
        content: String::new(),
        aggregate,
    };
    payload.content = summary_content(&payload.aggregate, &payload.created_at_text());
    payload
}

/// Text body of a summary report. Line layout is stable; tests snapshot it.
pub fn summary_content(agg: &AggregateSummary, generated: &str) -> String {
    let mut lines = vec![
        "Data Summary Report".to_string(),
        format!("Generated: {generated}"),
        String::new(),
        format!("Total Records Processed: {}", agg.total_records),
        String::new(),
    ];

    if agg.total_records > 0 && !agg.counts_by_domain.is_empty() {
        lines.push("Data Types:".to_string());
        // tag order, not arrival order
        for (domain, count) in &agg.counts_by_domain {
            lines.push(format!("  - {domain}: {count} records"));
        }
        lines.push(String::new());
    }

    if !agg.summaries.is_empty() {
        lines.push("Record Summaries:".to_string());
        for (i, s) in agg.summaries.iter().enumerate() {
            lines.push(format!("  {}. {s}", i + 1));
        }
        if let Some(more) = &agg.overflow_marker {
            lines.push(format!("  {more}"));
        }
    }

    lines.join("\n")
}

pub struct ReportManager {
    renderer: Option<Arc<dyn Renderer>>,
    deliverer: Option<Arc<dyn Deliverer>>,
    output_dir: PathBuf,
}

impl ReportManager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            renderer: None,
            deliverer: None,
            output_dir: output_dir.into(),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_deliverer(mut self, deliverer: Arc<dyn Deliverer>) -> Self {
        self.deliverer = Some(deliverer);
        self
    }

    /// Render and/or deliver. With `Both`, a render failure does not stop the
    /// delivery attempt and vice versa. No recipients means nothing to deliver.
    pub async fn generate(&self, payload: &ReportPayload, mode: ReportMode, recipients: &[String]) -> ReportOutcome {
        tracing::info!(target: "report", ?mode, recipients = recipients.len(), "generating report");
        let mut errors = Vec::new();
        let mut artifact = None;
        let mut delivered = false;

        if mode.renders() {
            match self.render(payload).await {
                Ok(a) => artifact = Some(a),
                Err(e) => errors.push(ReportError::Render(format!("{e:#}")).to_string()),
            }
        }

        if mode.delivers() && !recipients.is_empty() {
            let attempt = match &self.deliverer {
                Some(d) => d.deliver(payload, artifact.as_ref(), recipients).await,
                None => Ok(false),
            };
            match attempt {
                Ok(true) => {
                    tracing::info!(target: "report", "report email sent");
                    delivered = true;
                }
                Ok(false) => errors.push("Email sending failed".to_string()),
                Err(e) => errors.push(ReportError::Delivery(format!("{e:#}")).to_string()),
            }
        }

        for e in &errors {
            tracing::warn!(target: "report", error = %e, "report stage failed");
        }
        ReportOutcome {
            success: errors.is_empty(),
            artifact,
            delivered,
            errors,
        }
    }

    async fn render(&self, payload: &ReportPayload) -> anyhow::Result<Artifact> {
        match &self.renderer {
            Some(r) => r.render(payload, &self.output_dir).await,
            None => {
                tracing::warn!(target: "report", "no document renderer installed, writing plain text");
                PlainTextRenderer.render(payload, &self.output_dir).await
            }
        }
    }
}
