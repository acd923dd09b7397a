// src/report/render.rs
//! Document backends. HTML is the normal output; plain text is what the
//! manager falls back to when no renderer is installed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use html_escape::encode_text;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ReportPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Html,
    Text,
}

impl ArtifactFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::Html => "html",
            ArtifactFormat::Text => "txt",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ArtifactFormat::Html => "text/html; charset=utf-8",
            ArtifactFormat::Text => "text/plain; charset=utf-8",
        }
    }
}

/// Reference to a rendered document on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub format: ArtifactFormat,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("report.{}", self.format.extension()))
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, payload: &ReportPayload, out_dir: &Path) -> Result<Artifact>;
    fn name(&self) -> &'static str;
}

/// Standalone HTML page: metadata table, content block, aggregate table.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

#[async_trait]
impl Renderer for HtmlRenderer {
    async fn render(&self, payload: &ReportPayload, out_dir: &Path) -> Result<Artifact> {
        write_artifact(out_dir, payload, ArtifactFormat::Html, render_html(payload)).await
    }

    fn name(&self) -> &'static str {
        "html"
    }
}

#[async_trait]
impl Renderer for PlainTextRenderer {
    async fn render(&self, payload: &ReportPayload, out_dir: &Path) -> Result<Artifact> {
        write_artifact(out_dir, payload, ArtifactFormat::Text, render_text(payload)).await
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

async fn write_artifact(
    out_dir: &Path,
    payload: &ReportPayload,
    format: ArtifactFormat,
    body: String,
) -> Result<Artifact> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating report dir {}", out_dir.display()))?;
    let path = out_dir.join(file_name(payload, format));
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("writing report {}", path.display()))?;
    tracing::info!(target: "report", path = %path.display(), "report rendered");
    Ok(Artifact { path, format })
}

/// `agworld_report_<timestamp>_<hash8>.<ext>`
fn file_name(payload: &ReportPayload, format: ArtifactFormat) -> String {
    let digest = Sha256::digest(payload.content.as_bytes());
    let short: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!(
        "agworld_report_{}_{}.{}",
        payload.created_at.format("%Y%m%d_%H%M%S"),
        short,
        format.extension()
    )
}

/// Plain-text document; also used as the email body.
pub fn render_text(payload: &ReportPayload) -> String {
    format!(
        "Agworld Report\n{rule}\n\nTitle: {title}\nGenerated: {generated}\nStatus: {status}\n\nContent:\n{content}\n\n---\nThis is an automated report from Agworld Reporter.",
        rule = "-".repeat(50),
        title = payload.title,
        generated = payload.created_at_text(),
        status = payload.status,
        content = payload.content,
    )
}

pub fn render_html(payload: &ReportPayload) -> String {
    let mut rows = String::new();
    rows.push_str(&table_row("Total records", &payload.aggregate.total_records.to_string()));
    for (domain, count) in &payload.aggregate.counts_by_domain {
        rows.push_str(&table_row(domain.as_str(), &count.to_string()));
    }
    if let Some(more) = &payload.aggregate.overflow_marker {
        rows.push_str(&table_row("Not listed", more));
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
<h1>{title}</h1>
<table class="meta">
{generated}{status}{kind}</table>
<h2>Report Content</h2>
<pre>{content}</pre>
<h2>Data Summary</h2>
<table class="summary">
<tr><th>Field</th><th>Value</th></tr>
{rows}</table>
</body>
</html>
"#,
        title = encode_text(&payload.title),
        generated = table_row("Generated:", &payload.created_at_text()),
        status = table_row("Status:", &payload.status),
        kind = table_row("Type:", &payload.report_type),
        content = encode_text(&payload.content),
        rows = rows,
    )
}

fn table_row(key: &str, value: &str) -> String {
    format!("<tr><td>{}</td><td>{}</td></tr>\n", encode_text(key), encode_text(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::AggregateSummary;
    use chrono::{TimeZone, Utc};

    fn payload() -> ReportPayload {
        ReportPayload {
            title: "Agworld <Daily>".into(),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            status: "completed".into(),
            report_type: "summary".into(),
            content: "Record Summaries:\n  1. Field: A & B".into(),
            aggregate: AggregateSummary::default(),
        }
    }

    #[test]
    fn html_escapes_user_text() {
        let html = render_html(&payload());
        assert!(html.contains("<h1>Agworld &lt;Daily&gt;</h1>"));
        assert!(html.contains("Field: A &amp; B"));
        assert!(html.contains("<tr><td>Generated:</td><td>2024-06-01T08:00:00Z</td></tr>"));
    }

    #[test]
    fn text_document_layout() {
        let text = render_text(&payload());
        assert!(text.starts_with("Agworld Report\n-----"));
        assert!(text.contains("\nGenerated: 2024-06-01T08:00:00Z\n"));
        assert!(text.ends_with("This is an automated report from Agworld Reporter."));
    }

    #[tokio::test]
    async fn renderers_write_into_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let a = HtmlRenderer.render(&payload(), &out).await.unwrap();
        assert_eq!(a.format, ArtifactFormat::Html);
        assert!(a.file_name().starts_with("agworld_report_20240601_080000_"));
        assert!(a.file_name().ends_with(".html"));
        assert!(tokio::fs::read_to_string(&a.path).await.unwrap().contains("<pre>"));

        let t = PlainTextRenderer.render(&payload(), &out).await.unwrap();
        assert_eq!(t.path.extension().unwrap(), "txt");
    }
}
