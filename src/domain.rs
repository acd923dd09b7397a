// src/domain.rs
//! Domain tags and the loosely-typed record shapes that flow in from the source.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One record as delivered by the source. Usually a JSON object, but the
/// processor must tolerate any shape for the generic path.
pub type RawRecord = serde_json::Value;

/// Category of synchronised record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Field,
    Crop,
    Activity,
    Company,
    Farm,
    Season,
    #[serde(other)]
    Unknown,
}

impl Domain {
    /// Every domain that has a poll routine, in scheduling order.
    pub const SYNCED: [Domain; 6] = [
        Domain::Field,
        Domain::Crop,
        Domain::Activity,
        Domain::Company,
        Domain::Farm,
        Domain::Season,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Field => "field",
            Domain::Crop => "crop",
            Domain::Activity => "activity",
            Domain::Company => "company",
            Domain::Farm => "farm",
            Domain::Season => "season",
            Domain::Unknown => "unknown",
        }
    }

    /// Plural collection name: JSON:API `type`, endpoint path and cache key segment.
    pub fn collection(self) -> &'static str {
        match self {
            Domain::Field => "fields",
            Domain::Crop => "crops",
            Domain::Activity => "activities",
            Domain::Company => "companies",
            Domain::Farm => "farms",
            Domain::Season => "seasons",
            Domain::Unknown => "unknown",
        }
    }

    /// Accepts singular or plural spelling, case-insensitive. Anything else is `Unknown`.
    pub fn parse(s: &str) -> Domain {
        let s = s.trim().to_ascii_lowercase();
        Domain::SYNCED
            .into_iter()
            .find(|d| d.as_str() == s || d.collection() == s)
            .unwrap_or(Domain::Unknown)
    }

    /// Capitalised name used in status error messages ("Field", "Activity").
    pub fn label(self) -> String {
        let c = self.as_str();
        let mut out = String::with_capacity(c.len());
        let mut chars = c.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
        }
        out.push_str(chars.as_str());
        out
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source query filters, normalised: trimmed keys/values, empties dropped, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters(BTreeMap<String, String>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        let (k, v) = (key.trim(), value.trim());
        if k.is_empty() || v.is_empty() {
            return;
        }
        self.0.insert(k.to_string(), v.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Stable cache-key fragment: `all` or `k=v,k=v` in key order.
    pub fn cache_fragment(&self) -> String {
        if self.0.is_empty() {
            return "all".to_string();
        }
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut f = Filters::new();
        for (k, v) in iter {
            f.insert(k.as_ref(), v.as_ref());
        }
        f
    }
}
