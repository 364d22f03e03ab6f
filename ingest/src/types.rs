use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::IngestError;
use crate::metrics_consts::TIMESTAMP_FALLBACKS;

// Gateway/Tag status values, mirrored by the CRUD surface.
pub const STATUS_ACTIVE: i16 = 1;
pub const STATUS_INACTIVE: i16 = 2;

/// One message as produced by the gateways. The short field names are the
/// wire contract and must not change.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMessage {
    #[serde(rename = "gw")]
    pub gateway: String,
    #[serde(rename = "tm", default)]
    pub timestamp: Option<String>,
    #[serde(rename = "adv", default)]
    pub advertisements: Vec<RawAdvertisement>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawAdvertisement {
    #[serde(rename = "type", default)]
    pub advertisement_type: String,
    #[serde(default)]
    pub mac: String,
    #[serde(rename = "tm", default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub battery: Option<i32>,
    #[serde(default)]
    pub major: Option<i32>,
    #[serde(default)]
    pub minor: Option<i32>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(rename = "rssi_at_xm", default)]
    pub rssi_at_xm: Option<i32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

/// The normalized form of a message: timestamps parsed (or substituted with
/// the ingestion instant) and converted to UTC.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub gateway_external_id: String,
    pub timestamp: DateTime<Utc>,
    pub sightings: Vec<Sighting>,
}

#[derive(Debug, Clone)]
pub struct Sighting {
    pub advertisement_type: String,
    pub mac: String,
    pub timestamp: DateTime<Utc>,
    pub rssi: Option<i32>,
    pub battery: Option<i32>,
    pub major: Option<i32>,
    pub minor: Option<i32>,
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub rssi_at_xm: Option<i32>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// Decode one raw payload into a normalized envelope. Only a payload that
/// cannot be deserialized at all fails (with the permanent `Decode` error);
/// bad timestamps fall back to `now`.
pub fn decode_message(payload: &[u8], now: DateTime<Utc>) -> Result<Envelope, IngestError> {
    let raw: RawMessage = serde_json::from_slice(payload)?;
    Ok(raw.normalize(now))
}

impl RawMessage {
    pub fn normalize(self, now: DateTime<Utc>) -> Envelope {
        Envelope {
            gateway_external_id: self.gateway,
            timestamp: parse_utc_or(self.timestamp.as_deref(), now),
            sightings: self
                .advertisements
                .into_iter()
                .map(|adv| adv.normalize(now))
                .collect(),
        }
    }
}

impl RawAdvertisement {
    fn normalize(self, now: DateTime<Utc>) -> Sighting {
        Sighting {
            advertisement_type: self.advertisement_type,
            mac: self.mac,
            timestamp: parse_utc_or(self.timestamp.as_deref(), now),
            rssi: self.rssi,
            battery: self.battery,
            major: self.major,
            minor: self.minor,
            name: self.name,
            uuid: self.uuid,
            rssi_at_xm: self.rssi_at_xm,
            temperature: self.temperature,
            humidity: self.humidity,
        }
    }
}

/// Parse a producer timestamp as a timezone-aware instant in UTC, falling
/// back to `fallback` (the ingestion instant) when the field is absent or
/// unparsable. Naive timestamps are assumed to already be UTC.
fn parse_utc_or(raw: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return fallback;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return fallback;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return parsed.and_utc();
    }
    metrics::counter!(TIMESTAMP_FALLBACKS).increment(1);
    fallback
}

/// A fixed BLE receiver. `gateway_id` is the immutable natural key; the
/// pipeline only ever touches `timestamp` and the audit columns, everything
/// descriptive is owner-managed through the CRUD surface.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Gateway {
    pub id: Uuid,
    pub gateway_id: String,
    pub uuid: Option<String>,
    pub mac_address: Option<String>,
    pub gateway_name: Option<String>,
    pub location: Option<String>,
    pub floor_map_id: Option<Uuid>,
    pub coordinates_x: Option<f64>,
    pub coordinates_y: Option<f64>,
    pub status: i16,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tracked mobile beacon, keyed on MAC address. The current-location
/// triple (`current_gateway_id`, `last_rssi`, `last_seen_at`) is owned by
/// the arbitration engine.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Tag {
    pub id: Uuid,
    pub uuid: Option<String>,
    pub mac_address: String,
    pub tag_type: Option<String>,
    pub assigned_to: Option<String>,
    pub status: i16,
    // Sightings with an RSSI numerically above this are ignored for location
    // purposes. Thresholds are expected to be negative dB values, e.g. -70.
    pub rssi_threshold: Option<i32>,
    pub current_gateway_id: Option<Uuid>,
    pub last_rssi: Option<i32>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One immutable sighting event; append-only, never updated by the pipeline.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SensorAdvertisement {
    pub id: Uuid,
    pub gateway_id: Uuid,
    pub tag_id: Option<Uuid>,
    pub advertisement_type: String,
    pub mac_address: String,
    pub timestamp: DateTime<Utc>,
    pub rssi: Option<i32>,
    pub battery: Option<i32>,
    pub major: Option<i32>,
    pub minor: Option<i32>,
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub rssi_at_xm: Option<i32>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// What one message produced, returned to the replay endpoint.
#[derive(Debug, Serialize)]
pub struct ProcessedEnvelope {
    pub gateway: Gateway,
    pub advertisements: Vec<SensorAdvertisement>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn decodes_wire_field_names() {
        let payload = br#"{
            "gw": "GW-AC233FC04CE9",
            "tm": "2025-09-03T10:15:00Z",
            "adv": [{
                "type": "ib",
                "mac": "20:18:ab:cd:20:21",
                "tm": "2025-09-03T10:14:59Z",
                "rssi": -67,
                "battery": 88,
                "major": 10,
                "minor": 4,
                "uuid": "e2c56db5-dffb-48d2-b060-d0f5a71096e0",
                "rssi_at_xm": -59,
                "temperature": 21.5,
                "humidity": 40.0
            }]
        }"#;

        let envelope = decode_message(payload, now()).unwrap();
        assert_eq!(envelope.gateway_external_id, "GW-AC233FC04CE9");
        assert_eq!(
            envelope.timestamp,
            Utc.with_ymd_and_hms(2025, 9, 3, 10, 15, 0).unwrap()
        );
        assert_eq!(envelope.sightings.len(), 1);

        let sighting = &envelope.sightings[0];
        assert_eq!(sighting.advertisement_type, "ib");
        assert_eq!(sighting.mac, "20:18:ab:cd:20:21");
        assert_eq!(sighting.rssi, Some(-67));
        assert_eq!(sighting.rssi_at_xm, Some(-59));
        assert_eq!(sighting.temperature, Some(21.5));
    }

    #[test]
    fn missing_gateway_id_fails_decoding() {
        let payload = br#"{"tm": "2025-09-03T10:15:00Z", "adv": []}"#;
        assert!(decode_message(payload, now()).is_err());
    }

    #[test]
    fn non_json_payload_fails_decoding() {
        assert!(decode_message(b"not json at all", now()).is_err());
    }

    #[test]
    fn offset_timestamps_convert_to_utc() {
        let payload = br#"{"gw": "gw1", "tm": "2025-09-03T12:15:00+02:00", "adv": []}"#;
        let envelope = decode_message(payload, now()).unwrap();
        assert_eq!(
            envelope.timestamp,
            Utc.with_ymd_and_hms(2025, 9, 3, 10, 15, 0).unwrap()
        );
    }

    #[test]
    fn naive_timestamps_are_assumed_utc() {
        let payload = br#"{"gw": "gw1", "tm": "2025-09-03 10:15:00", "adv": []}"#;
        let envelope = decode_message(payload, now()).unwrap();
        assert_eq!(
            envelope.timestamp,
            Utc.with_ymd_and_hms(2025, 9, 3, 10, 15, 0).unwrap()
        );
    }

    #[test]
    fn unparsable_timestamp_falls_back_to_ingestion_instant() {
        let payload = br#"{
            "gw": "gw1",
            "tm": "garbage",
            "adv": [{"type": "mb", "mac": "aa:bb:cc:dd:ee:ff", "tm": "also garbage"}]
        }"#;
        let envelope = decode_message(payload, now()).unwrap();
        assert_eq!(envelope.timestamp, now());
        assert_eq!(envelope.sightings[0].timestamp, now());
    }

    #[test]
    fn missing_timestamp_falls_back_without_failing() {
        let payload = br#"{"gw": "gw1", "adv": [{"type": "mb", "mac": "aa:bb:cc:dd:ee:ff"}]}"#;
        let envelope = decode_message(payload, now()).unwrap();
        assert_eq!(envelope.timestamp, now());
        assert_eq!(envelope.sightings[0].timestamp, now());
    }
}
