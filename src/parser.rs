//! JSON parser for the `allroutes` vehicle feed.
//!
//! The provider payload is loosely typed, so every field is mapped by hand.
//! Records without a vehicle id or a usable position, or whose position lies
//! outside WGS84 bounds, are dropped here and never reach the store.

use serde::Deserialize;
use serde_json::Value;

use crate::model::VehicleReport;
use crate::stats::{Rejection, SnapshotStats};

#[derive(Debug, Deserialize)]
struct FeedPayload {
    #[serde(default)]
    allroutes: Option<Vec<Value>>,
}

/// Validated vehicle reports from one feed body.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub vehicles: Vec<VehicleReport>,
    pub stats: SnapshotStats,
}

/// Decodes a feed body and keeps only the valid vehicle records.
///
/// # Errors
///
/// Returns an error if the body is not a JSON object. A missing or null
/// `allroutes` list is an empty snapshot, not an error.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, serde_json::Error> {
    let payload: FeedPayload = serde_json::from_slice(bytes)?;

    let mut parsed = ParsedFeed::default();
    for raw in payload.allroutes.unwrap_or_default() {
        match parse_vehicle(&raw) {
            Ok(report) => {
                parsed.stats.record_valid(&report);
                parsed.vehicles.push(report);
            }
            Err(reason) => parsed.stats.record_rejected(reason),
        }
    }

    Ok(parsed)
}

/// Maps one raw record onto a [`VehicleReport`], failing closed on the
/// required fields.
pub fn parse_vehicle(raw: &Value) -> Result<VehicleReport, Rejection> {
    let vehicle_id = raw
        .get("vehicle_id")
        .and_then(identifier)
        .ok_or(Rejection::MissingVehicleId)?;

    let latitude = raw
        .get("latitude")
        .and_then(number)
        .ok_or(Rejection::MissingPosition)?;
    let longitude = raw
        .get("longitude")
        .and_then(number)
        .ok_or(Rejection::MissingPosition)?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(Rejection::OutOfRange);
    }

    Ok(VehicleReport {
        vehicle_id,
        reported_at: raw.get("msg_time").and_then(opaque),
        longitude,
        latitude,
        heading: raw.get("heading").and_then(number),
        speed_mph: raw.get("speed_mph").and_then(number),
        route_short_name: raw.get("route_short_name").and_then(opaque),
        trip_id: raw.get("trip_id").and_then(opaque),
        next_stop_id: raw.get("next_stop_id").and_then(opaque),
        next_stop_name: raw.get("next_stop_name").and_then(opaque),
        next_stop_sched_time: raw.get("next_stop_sched_time").and_then(opaque),
    })
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

// Stored verbatim: no trimming, no reformatting.
fn opaque(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_missing_allroutes_is_empty() {
        let parsed = parse_feed(b"{}").unwrap();
        assert!(parsed.vehicles.is_empty());
        assert_eq!(parsed.stats.raw_records, 0);

        let parsed = parse_feed(br#"{"allroutes": null}"#).unwrap();
        assert!(parsed.vehicles.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        assert!(parse_feed(b"<html>502 Bad Gateway</html>").is_err());
        assert!(parse_feed(br#"{"allroutes": [{"vehicle_id": "1""#).is_err());
    }

    #[test]
    fn test_drops_records_missing_required_fields() {
        let body = json!({
            "allroutes": [
                {"vehicle_id": "101", "latitude": 35.08, "longitude": -106.65},
                {"latitude": 35.08, "longitude": -106.65},
                {"vehicle_id": "102", "longitude": -106.65},
                {"vehicle_id": "103", "latitude": 35.08},
                {"vehicle_id": null, "latitude": 35.08, "longitude": -106.65},
                {"vehicle_id": "104", "latitude": null, "longitude": -106.65},
                {"vehicle_id": "105", "latitude": "35.1", "longitude": "-106.6"}
            ]
        });
        let parsed = parse_feed(body.to_string().as_bytes()).unwrap();

        let ids: Vec<_> = parsed.vehicles.iter().map(|v| v.vehicle_id.as_str()).collect();
        assert_eq!(ids, vec!["101", "105"]);
        assert_eq!(parsed.stats.raw_records, 7);
        assert_eq!(parsed.stats.dropped(), 5);
        assert_eq!(parsed.stats.missing_vehicle_id, 2);
        assert_eq!(parsed.stats.missing_position, 3);
    }

    #[test]
    fn test_numeric_vehicle_id_becomes_text() {
        let v = parse_vehicle(&json!({"vehicle_id": 6502, "latitude": 35.0, "longitude": -106.0}))
            .unwrap();
        assert_eq!(v.vehicle_id, "6502");
    }

    #[test]
    fn test_blank_vehicle_id_rejected() {
        let raw = json!({"vehicle_id": "  ", "latitude": 35.0, "longitude": -106.0});
        assert_eq!(parse_vehicle(&raw), Err(Rejection::MissingVehicleId));
    }

    #[test]
    fn test_out_of_range_position_rejected() {
        let swapped = json!({"vehicle_id": "7", "latitude": -106.6, "longitude": 35.1});
        assert_eq!(parse_vehicle(&swapped), Err(Rejection::OutOfRange));

        let body = json!({
            "allroutes": [
                {"vehicle_id": "7", "latitude": -106.6, "longitude": 35.1},
                {"vehicle_id": "8", "latitude": 35.1, "longitude": 181.0},
                {"vehicle_id": "9", "longitude": -106.6}
            ]
        });
        let parsed = parse_feed(body.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.stats.out_of_range, 2);
        assert_eq!(parsed.stats.missing_position, 1);
        assert_eq!(parsed.stats.dropped(), 3);
    }

    #[test]
    fn test_opaque_times_kept_verbatim() {
        let raw = json!({
            "vehicle_id": "101",
            "latitude": 35.08,
            "longitude": -106.65,
            "msg_time": " 10/15/2026 2:31:07 PM",
            "next_stop_sched_time": "14:35:00 ",
            "heading": "not a number",
            "speed_mph": 23.5
        });
        let v = parse_vehicle(&raw).unwrap();
        assert_eq!(v.reported_at.as_deref(), Some(" 10/15/2026 2:31:07 PM"));
        assert_eq!(v.next_stop_sched_time.as_deref(), Some("14:35:00 "));
        assert_eq!(v.heading, None);
        assert_eq!(v.speed_mph, Some(23.5));
    }
}
