// src/source/envelope.rs
//! JSON:API document handling: query construction, flattening `data[]`
//! resources into plain records, and deriving crops from field records.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::{Domain, Filters, RawRecord};
use crate::error::SourceError;

#[derive(Debug, Deserialize)]
pub(crate) struct Document {
    data: Option<Vec<Resource>>,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    next: Option<String>,
}

/// One decoded page: flattened records plus the link to the next page, if any.
#[derive(Debug, Default)]
pub(crate) struct Page {
    pub records: Vec<RawRecord>,
    pub next: Option<String>,
}

const FIELD_ATTRS: &[&str] = &[
    "name",
    "area",
    "farm_id",
    "description",
    "cropping_method",
    "boundary",
    "created_at",
    "updated_at",
];

// present on field resources only when a season is selected
const FIELD_SEASON_ATTRS: &[&str] = &[
    "crops",
    "chemical_cost",
    "fertilizer_cost",
    "seed_cost",
    "harvested_area",
    "harvested_weight",
    "planting_date",
    "harvest_date",
];

const ACTIVITY_ATTRS: &[&str] = &[
    "title",
    "activity_type",
    "activity_category",
    "approved",
    "completed",
    "area",
    "total_cost",
    "chemical_cost",
    "fertilizer_cost",
    "seed_cost",
    "due_at",
    "completed_at",
    "created_at",
    "updated_at",
    "company_id",
    "company_name",
    "author_user_name",
];

const COMPANY_ATTRS: &[&str] = &[
    "name",
    "company_type",
    "business_identifier",
    "contact_email",
    "contact_name",
    "description",
    "physical_location",
    "created_at",
    "updated_at",
];

const FARM_ATTRS: &[&str] = &[
    "name",
    "company_id",
    "description",
    "location",
    "reporting_region",
    "created_at",
    "updated_at",
];

const SEASON_ATTRS: &[&str] = &[
    "name",
    "company_id",
    "approved",
    "season_start_date",
    "season_end_date",
    "created_at",
    "updated_at",
];

fn attrs_for(domain: Domain) -> &'static [&'static str] {
    match domain {
        Domain::Field => FIELD_ATTRS,
        Domain::Activity => ACTIVITY_ATTRS,
        Domain::Company => COMPANY_ATTRS,
        Domain::Farm => FARM_ATTRS,
        Domain::Season => SEASON_ATTRS,
        Domain::Crop | Domain::Unknown => &[],
    }
}

/// Filters that are applied to the response instead of being sent upstream.
pub(crate) const CLIENT_SIDE: &[&str] = &["field_id"];

/// Map normalised filters to upstream query parameters.
pub(crate) fn query_params(filters: &Filters) -> Vec<(String, String)> {
    filters
        .iter()
        .filter(|(k, _)| !CLIENT_SIDE.contains(k))
        .map(|(k, v)| {
            let key = match k {
                "season_id" => "season_id".to_string(),
                "start_date" => "filter[updated_at]".to_string(),
                other => format!("filter[{other}]"),
            };
            (key, v.to_string())
        })
        .collect()
}

/// Decode one response body for `domain`. Resources of other types are ignored.
pub(crate) fn decode_page(domain: Domain, body: &str, seasonal: bool) -> Result<Page, SourceError> {
    let doc: Document = serde_json::from_str(body)
        .map_err(|e| SourceError::MalformedResponse(format!("invalid JSON:API body: {e}")))?;
    let data = doc
        .data
        .ok_or_else(|| SourceError::MalformedResponse("document has no `data` array".into()))?;

    let records = data
        .into_iter()
        .filter(|r| r.kind.as_deref() == Some(domain.collection()))
        .map(|r| flatten(domain, r, seasonal))
        .collect();

    Ok(Page {
        records,
        next: doc.links.and_then(|l| l.next).filter(|n| !n.is_empty()),
    })
}

fn flatten(domain: Domain, r: Resource, seasonal: bool) -> RawRecord {
    let mut out = Map::new();
    out.insert("id".into(), r.id.map(id_text).unwrap_or(Value::Null));
    let extra: &[&str] = if domain == Domain::Field && seasonal {
        FIELD_SEASON_ATTRS
    } else {
        &[]
    };
    for key in attrs_for(domain).iter().chain(extra) {
        out.insert((*key).into(), r.attributes.get(*key).cloned().unwrap_or(Value::Null));
    }
    if domain == Domain::Activity {
        for key in ["activity_fields", "activity_inputs"] {
            let v = match r.attributes.get(key) {
                Some(Value::Array(a)) => Value::Array(a.clone()),
                _ => Value::Array(Vec::new()),
            };
            out.insert(key.into(), v);
        }
    }
    Value::Object(out)
}

fn id_text(v: Value) -> Value {
    match v {
        Value::Number(n) => Value::String(n.to_string()),
        other => other,
    }
}

/// Keep only activities touching `field_id`.
pub(crate) fn filter_activities_by_field(records: Vec<RawRecord>, field_id: &str) -> Vec<RawRecord> {
    records
        .into_iter()
        .filter(|a| {
            a.get("activity_fields")
                .and_then(Value::as_array)
                .is_some_and(|fields| {
                    fields
                        .iter()
                        .any(|f| f.get("field_id").and_then(Value::as_str) == Some(field_id))
                })
        })
        .collect()
}

/// Explode each field's `crops` array into crop records. A field without crops
/// yields one placeholder crop of type `Unknown`.
pub(crate) fn derive_crops(fields: &[RawRecord], field_id: Option<&str>) -> Vec<RawRecord> {
    let mut out = Vec::new();
    for field in fields {
        let id = field.get("id").and_then(Value::as_str).unwrap_or_default();
        if field_id.is_some_and(|want| want != id) {
            continue;
        }
        let planting = field.get("planting_date").cloned().unwrap_or(Value::Null);
        let harvest = field.get("harvest_date").cloned().unwrap_or(Value::Null);

        match field.get("crops").and_then(Value::as_array) {
            Some(crops) if !crops.is_empty() => {
                for (i, crop) in crops.iter().enumerate() {
                    let pick = |k: &str| crop.get(k).cloned().unwrap_or(Value::Null);
                    out.push(serde_json::json!({
                        "id": format!("{id}_crop_{i}"),
                        "type": pick("crop_name"),
                        "variety": pick("variety_name"),
                        "field_id": id,
                        "crop_grade": pick("crop_grade"),
                        "crop_use": pick("crop_use"),
                        "crop_blend": pick("crop_blend"),
                        "planting_date": planting,
                        "harvest_date": harvest,
                    }));
                }
            }
            _ => out.push(serde_json::json!({
                "id": format!("{id}_crop_unknown"),
                "type": "Unknown",
                "variety": "Unknown",
                "field_id": id,
                "planting_date": planting,
                "harvest_date": harvest,
            })),
        }
    }
    out
}
