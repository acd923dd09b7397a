// src/processor/mod.rs
//! Record processor: raw source records -> canonical [`ProcessedRecord`]s,
//! plus the aggregation used by reports.

pub mod records;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::domain::{Domain, RawRecord};
use crate::error::ProcessError;
pub use records::{
    ActivityRecord, CompanyRecord, CropRecord, FarmRecord, FieldRecord, GenericRecord,
    RecordFields, SeasonRecord,
};

/// Max summaries carried by an [`AggregateSummary`].
pub const SUMMARY_LIMIT: usize = 10;
pub const RECORD_SOURCE: &str = "external";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub domain: Domain,
    pub processed_at: DateTime<Utc>,
    pub source: String,
    /// Hex SHA-256 of the canonical serialisation of the raw record.
    pub content_hash: String,
    pub fields: RecordFields,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub total_records: usize,
    pub counts_by_domain: BTreeMap<Domain, usize>,
    /// First [`SUMMARY_LIMIT`] summaries in input order.
    pub summaries: Vec<String>,
    /// `"+K more"` when summaries were truncated.
    pub overflow_marker: Option<String>,
}

/// Stateless; cheap to copy into every job.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordProcessor;

impl RecordProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn process(&self, raw: &RawRecord, domain: Domain) -> Result<ProcessedRecord, ProcessError> {
        self.process_at(raw, domain, Utc::now())
    }

    /// Deterministic given `(raw, domain, now)`.
    pub fn process_at(
        &self,
        raw: &RawRecord,
        domain: Domain,
        now: DateTime<Utc>,
    ) -> Result<ProcessedRecord, ProcessError> {
        let fields = match (domain, raw) {
            (Domain::Unknown, _) => RecordFields::Unknown(GenericRecord::wrap(raw)),
            (_, Value::Object(m)) => match domain {
                Domain::Field => RecordFields::Field(FieldRecord::extract(m)),
                Domain::Crop => RecordFields::Crop(CropRecord::extract(m)),
                Domain::Activity => RecordFields::Activity(ActivityRecord::extract(m)),
                Domain::Company => RecordFields::Company(CompanyRecord::extract(m)),
                Domain::Farm => RecordFields::Farm(FarmRecord::extract(m)),
                Domain::Season => RecordFields::Season(SeasonRecord::extract(m)),
                Domain::Unknown => RecordFields::Unknown(GenericRecord::wrap(raw)),
            },
            (_, other) => {
                return Err(ProcessError::MalformedRecord {
                    domain,
                    reason: format!("expected a JSON object, got {}", kind_of(other)),
                })
            }
        };

        let summary = fields.summary();
        Ok(ProcessedRecord {
            domain,
            processed_at: now,
            source: RECORD_SOURCE.to_string(),
            content_hash: content_hash(raw),
            fields,
            summary,
        })
    }

    /// Counts per domain and the first [`SUMMARY_LIMIT`] summaries. Empty input is fine.
    pub fn aggregate(&self, records: &[ProcessedRecord]) -> AggregateSummary {
        let mut counts_by_domain = BTreeMap::new();
        for r in records {
            *counts_by_domain.entry(r.domain).or_insert(0) += 1;
        }
        let summaries = records
            .iter()
            .take(SUMMARY_LIMIT)
            .map(|r| r.summary.clone())
            .collect();
        let more = records.len().saturating_sub(SUMMARY_LIMIT);
        AggregateSummary {
            total_records: records.len(),
            counts_by_domain,
            summaries,
            overflow_marker: (more > 0).then(|| format!("+{more} more")),
        }
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(v: &Value) -> String {
    let mut out = String::new();
    write_canonical(v, &mut out);
    out
}

fn write_canonical(v: &Value, out: &mut String) {
    match v {
        Value::Object(m) => {
            let mut keys: Vec<&String> = m.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(&m[k], out);
            }
            out.push('}');
        }
        Value::Array(a) => {
            out.push('[');
            for (i, item) in a.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn content_hash(raw: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(raw).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
