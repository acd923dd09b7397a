// src/source/samples.rs
//! Built-in datasets served when the upstream API cannot be reached, so that
//! a poll always has something to process.

use serde_json::json;

use crate::domain::{Domain, RawRecord};

pub fn for_domain(domain: Domain) -> Vec<RawRecord> {
    match domain {
        Domain::Field => fields(),
        Domain::Crop => crops(),
        Domain::Activity => activities(),
        Domain::Company => companies(),
        Domain::Farm => farms(),
        Domain::Season => seasons(),
        Domain::Unknown => Vec::new(),
    }
}

fn fields() -> Vec<RawRecord> {
    vec![
        json!({
            "id": "987654",
            "name": "North Field",
            "area": "25.5 ha",
            "farm_id": "987613",
            "description": "Main production field",
            "cropping_method": "dryland",
            "boundary": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "crops": [{
                "crop_name": "Wheat",
                "variety_name": "Winter Wheat",
                "crop_grade": "A",
                "crop_use": "Grain",
                "crop_blend": "primary"
            }],
            "chemical_cost": "1000 dollar",
            "fertilizer_cost": "2000 dollar",
            "seed_cost": "500 dollar",
            "planting_date": "2024-04-15T00:00:00Z",
            "harvest_date": "2024-10-30T00:00:00Z"
        }),
        json!({
            "id": "987655",
            "name": "South Field",
            "area": "18.3 ha",
            "farm_id": "987613",
            "description": "Secondary field",
            "cropping_method": "irrigated",
            "boundary": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "crops": [{
                "crop_name": "Corn",
                "variety_name": "Sweet Corn",
                "crop_grade": "B+",
                "crop_use": "Feed",
                "crop_blend": "primary"
            }],
            "chemical_cost": "800 dollar",
            "fertilizer_cost": "1500 dollar",
            "seed_cost": "400 dollar",
            "planting_date": "2024-05-01T00:00:00Z",
            "harvest_date": "2024-11-15T00:00:00Z"
        }),
    ]
}

fn crops() -> Vec<RawRecord> {
    vec![
        json!({
            "id": "987654_crop_0",
            "type": "Wheat",
            "variety": "Winter Wheat",
            "field_id": "987654",
            "crop_grade": "A",
            "crop_use": "Grain",
            "crop_blend": "primary",
            "planting_date": "2024-04-15T00:00:00Z",
            "harvest_date": "2024-10-30T00:00:00Z"
        }),
        json!({
            "id": "987655_crop_0",
            "type": "Corn",
            "variety": "Sweet Corn",
            "field_id": "987655",
            "crop_grade": "B+",
            "crop_use": "Feed",
            "crop_blend": "primary",
            "planting_date": "2024-05-01T00:00:00Z",
            "harvest_date": "2024-11-15T00:00:00Z"
        }),
    ]
}

fn activities() -> Vec<RawRecord> {
    vec![
        json!({
            "id": "987625",
            "title": "Spring Planting",
            "activity_type": "ActualActivity",
            "activity_category": "planting",
            "approved": true,
            "completed": true,
            "area": "25.5 ha",
            "total_cost": "2000 dollar",
            "chemical_cost": "0 dollar",
            "fertilizer_cost": "500 dollar",
            "seed_cost": "1500 dollar",
            "due_at": "2024-04-15T00:00:00Z",
            "completed_at": "2024-04-15T10:30:00Z",
            "created_at": "2024-04-10T08:00:00Z",
            "updated_at": "2024-04-15T10:30:00Z",
            "company_id": "987124",
            "company_name": "Farming Productions",
            "author_user_name": "Farmer Joe",
            "activity_fields": [{
                "field_id": "987654",
                "field_name": "North Field",
                "area": "25.5 ha",
                "total_cost": "2000 dollar"
            }],
            "activity_inputs": [{
                "input_name": "Winter Wheat Seed",
                "input_type": "Seed",
                "rate": "120 kg/ha",
                "total_cost": "1500 dollar"
            }]
        }),
        json!({
            "id": "987626",
            "title": "Fertilizer Application",
            "activity_type": "ActualActivity",
            "activity_category": "fertilizing",
            "approved": true,
            "completed": true,
            "area": "25.5 ha",
            "total_cost": "1000 dollar",
            "chemical_cost": "0 dollar",
            "fertilizer_cost": "1000 dollar",
            "seed_cost": "0 dollar",
            "due_at": "2024-05-20T00:00:00Z",
            "completed_at": "2024-05-20T14:00:00Z",
            "created_at": "2024-05-15T09:00:00Z",
            "updated_at": "2024-05-20T14:00:00Z",
            "company_id": "987124",
            "company_name": "Farming Productions",
            "author_user_name": "Farmer Joe",
            "activity_fields": [{
                "field_id": "987654",
                "field_name": "North Field",
                "area": "25.5 ha",
                "total_cost": "1000 dollar"
            }],
            "activity_inputs": [{
                "input_name": "Nitrogen Fertilizer",
                "input_type": "Product",
                "rate": "150 kg/ha",
                "total_cost": "1000 dollar"
            }]
        }),
    ]
}

fn companies() -> Vec<RawRecord> {
    vec![json!({
        "id": "987124",
        "name": "Farming Productions",
        "company_type": "Farmer",
        "business_identifier": "123456789",
        "contact_email": "contact@farmingproductions.com",
        "contact_name": "John Farmer",
        "description": "Family farming operation",
        "physical_location": {
            "country": "Australia",
            "state": "Queensland",
            "latitude": -27.4698,
            "longitude": 153.0251
        },
        "created_at": "2020-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })]
}

fn farms() -> Vec<RawRecord> {
    vec![json!({
        "id": "987613",
        "name": "Sunny Valley Farm",
        "company_id": "987124",
        "description": "Main production farm",
        "location": {
            "country": "Australia",
            "state": "Queensland",
            "latitude": -27.4698,
            "longitude": 153.0251
        },
        "reporting_region": "South East Queensland",
        "created_at": "2020-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })]
}

fn seasons() -> Vec<RawRecord> {
    vec![
        json!({
            "id": "987656",
            "name": "2024",
            "company_id": "987124",
            "approved": true,
            "season_start_date": "2024-01-01",
            "season_end_date": "2024-12-31",
            "created_at": "2023-12-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }),
        json!({
            "id": "987657",
            "name": "2025",
            "company_id": "987124",
            "approved": false,
            "season_start_date": "2025-01-01",
            "season_end_date": "2025-12-31",
            "created_at": "2024-11-01T00:00:00Z",
            "updated_at": "2024-11-01T00:00:00Z"
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::RecordProcessor;

    #[test]
    fn every_synced_domain_has_processable_samples() {
        for d in Domain::SYNCED {
            let rows = for_domain(d);
            assert!(!rows.is_empty(), "{d} has no samples");
            for r in &rows {
                assert!(RecordProcessor.process(r, d).is_ok());
            }
        }
        assert!(for_domain(Domain::Unknown).is_empty());
    }
}
