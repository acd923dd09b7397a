// src/processor/records.rs
//! Per-domain field sets. Extraction never fails: a missing or oddly typed
//! attribute becomes `None`/empty.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::Domain;

/// Domain-specific projection of a raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecordFields {
    Field(FieldRecord),
    Crop(CropRecord),
    Activity(ActivityRecord),
    Company(CompanyRecord),
    Farm(FarmRecord),
    Season(SeasonRecord),
    Unknown(GenericRecord),
}

impl RecordFields {
    pub fn domain(&self) -> Domain {
        match self {
            RecordFields::Field(_) => Domain::Field,
            RecordFields::Crop(_) => Domain::Crop,
            RecordFields::Activity(_) => Domain::Activity,
            RecordFields::Company(_) => Domain::Company,
            RecordFields::Farm(_) => Domain::Farm,
            RecordFields::Season(_) => Domain::Season,
            RecordFields::Unknown(_) => Domain::Unknown,
        }
    }

    /// Name/title/type plus one distinguishing attribute.
    pub fn summary(&self) -> String {
        match self {
            RecordFields::Field(f) => format!(
                "Field: {} - Area: {} - Farm: {}",
                or(&f.field_name, "Unknown"),
                or(&f.area, "N/A"),
                or(&f.farm_id, "N/A")
            ),
            RecordFields::Crop(c) => format!(
                "Crop: {} - Variety: {} - Field: {}",
                or(&c.crop_type, "Unknown"),
                or(&c.variety, "N/A"),
                or(&c.field_id, "N/A")
            ),
            RecordFields::Activity(a) => format!(
                "Activity: {} - Type: {} - Status: {}",
                or(&a.title, "Unknown"),
                or(&a.activity_type, "N/A"),
                if a.completed == Some(true) { "Completed" } else { "Pending" }
            ),
            RecordFields::Company(c) => format!(
                "Company: {} - Type: {}",
                or(&c.company_name, "Unknown"),
                or(&c.company_type, "N/A")
            ),
            RecordFields::Farm(f) => format!(
                "Farm: {} - Region: {}",
                or(&f.farm_name, "Unknown"),
                or(&f.reporting_region, "N/A")
            ),
            RecordFields::Season(s) => format!(
                "Season: {} - Status: {}",
                or(&s.season_name, "Unknown"),
                if s.approved == Some(true) { "Approved" } else { "Draft" }
            ),
            RecordFields::Unknown(g) => format!("Generic data with {} fields", g.field_count),
        }
    }
}

fn or<'a>(v: &'a Option<String>, default: &'a str) -> &'a str {
    v.as_deref().unwrap_or(default)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub field_id: Option<String>,
    pub field_name: Option<String>,
    pub area: Option<String>,
    pub farm_id: Option<String>,
    pub description: Option<String>,
    pub cropping_method: Option<String>,
    pub crops: Vec<Value>,
    pub chemical_cost: Option<String>,
    pub fertilizer_cost: Option<String>,
    pub seed_cost: Option<String>,
}

impl FieldRecord {
    pub fn extract(raw: &Map<String, Value>) -> Self {
        Self {
            field_id: text(raw, "id"),
            field_name: text(raw, "name"),
            area: text(raw, "area"),
            farm_id: text(raw, "farm_id"),
            description: text(raw, "description"),
            cropping_method: text(raw, "cropping_method"),
            crops: list(raw, "crops"),
            chemical_cost: text(raw, "chemical_cost"),
            fertilizer_cost: text(raw, "fertilizer_cost"),
            seed_cost: text(raw, "seed_cost"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CropRecord {
    pub crop_id: Option<String>,
    pub crop_type: Option<String>,
    pub variety: Option<String>,
    pub field_id: Option<String>,
    pub crop_grade: Option<String>,
    pub crop_use: Option<String>,
    pub crop_blend: Option<String>,
    pub planting_date: Option<String>,
    pub harvest_date: Option<String>,
}

impl CropRecord {
    pub fn extract(raw: &Map<String, Value>) -> Self {
        Self {
            crop_id: text(raw, "id"),
            crop_type: text(raw, "type"),
            variety: text(raw, "variety"),
            field_id: text(raw, "field_id"),
            crop_grade: text(raw, "crop_grade"),
            crop_use: text(raw, "crop_use"),
            crop_blend: text(raw, "crop_blend"),
            planting_date: text(raw, "planting_date"),
            harvest_date: text(raw, "harvest_date"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub activity_id: Option<String>,
    pub title: Option<String>,
    pub activity_type: Option<String>,
    pub activity_category: Option<String>,
    pub approved: Option<bool>,
    pub completed: Option<bool>,
    pub area: Option<String>,
    pub total_cost: Option<String>,
    pub chemical_cost: Option<String>,
    pub fertilizer_cost: Option<String>,
    pub seed_cost: Option<String>,
    pub due_at: Option<String>,
    pub completed_at: Option<String>,
    pub company_name: Option<String>,
    pub author_user_name: Option<String>,
    pub activity_fields: Vec<Value>,
    pub activity_inputs: Vec<Value>,
}

impl ActivityRecord {
    pub fn extract(raw: &Map<String, Value>) -> Self {
        Self {
            activity_id: text(raw, "id"),
            title: text(raw, "title"),
            activity_type: text(raw, "activity_type"),
            activity_category: text(raw, "activity_category"),
            approved: flag(raw, "approved"),
            completed: flag(raw, "completed"),
            area: text(raw, "area"),
            total_cost: text(raw, "total_cost"),
            chemical_cost: text(raw, "chemical_cost"),
            fertilizer_cost: text(raw, "fertilizer_cost"),
            seed_cost: text(raw, "seed_cost"),
            due_at: text(raw, "due_at"),
            completed_at: text(raw, "completed_at"),
            company_name: text(raw, "company_name"),
            author_user_name: text(raw, "author_user_name"),
            activity_fields: list(raw, "activity_fields"),
            activity_inputs: list(raw, "activity_inputs"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub company_id: Option<String>,
    pub company_name: Option<String>,
    pub company_type: Option<String>,
    pub business_identifier: Option<String>,
    pub contact_email: Option<String>,
    pub contact_name: Option<String>,
    pub description: Option<String>,
    pub physical_location: Option<Value>,
}

impl CompanyRecord {
    pub fn extract(raw: &Map<String, Value>) -> Self {
        Self {
            company_id: text(raw, "id"),
            company_name: text(raw, "name"),
            company_type: text(raw, "company_type"),
            business_identifier: text(raw, "business_identifier"),
            contact_email: text(raw, "contact_email"),
            contact_name: text(raw, "contact_name"),
            description: text(raw, "description"),
            physical_location: nested(raw, "physical_location"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FarmRecord {
    pub farm_id: Option<String>,
    pub farm_name: Option<String>,
    pub company_id: Option<String>,
    pub description: Option<String>,
    pub location: Option<Value>,
    pub reporting_region: Option<String>,
}

impl FarmRecord {
    pub fn extract(raw: &Map<String, Value>) -> Self {
        Self {
            farm_id: text(raw, "id"),
            farm_name: text(raw, "name"),
            company_id: text(raw, "company_id"),
            description: text(raw, "description"),
            location: nested(raw, "location"),
            reporting_region: text(raw, "reporting_region"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonRecord {
    pub season_id: Option<String>,
    pub season_name: Option<String>,
    pub company_id: Option<String>,
    pub approved: Option<bool>,
    pub season_start_date: Option<String>,
    pub season_end_date: Option<String>,
}

impl SeasonRecord {
    pub fn extract(raw: &Map<String, Value>) -> Self {
        Self {
            season_id: text(raw, "id"),
            season_name: text(raw, "name"),
            company_id: text(raw, "company_id"),
            approved: flag(raw, "approved"),
            season_start_date: text(raw, "season_start_date"),
            season_end_date: text(raw, "season_end_date"),
        }
    }
}

/// Anything without a dedicated mapping: the raw value kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericRecord {
    pub id: Option<String>,
    pub raw_data: Value,
    pub field_count: usize,
}

impl GenericRecord {
    pub fn wrap(raw: &Value) -> Self {
        let (id, field_count) = match raw {
            Value::Object(m) => (text(m, "id"), m.len()),
            Value::Array(a) => (None, a.len()),
            Value::Null => (None, 0),
            _ => (None, 1),
        };
        Self {
            id,
            raw_data: raw.clone(),
            field_count,
        }
    }
}

/// Scalar attribute as text; ids arrive as strings or numbers depending on endpoint.
pub(crate) fn text(raw: &Map<String, Value>, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn flag(raw: &Map<String, Value>, key: &str) -> Option<bool> {
    match raw.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn list(raw: &Map<String, Value>, key: &str) -> Vec<Value> {
    match raw.get(key) {
        Some(Value::Array(a)) => a.clone(),
        _ => Vec::new(),
    }
}

fn nested(raw: &Map<String, Value>, key: &str) -> Option<Value> {
    raw.get(key).filter(|v| !v.is_null()).cloned()
}
