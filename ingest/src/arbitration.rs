use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::metrics_consts::SIGHTINGS_FILTERED;
use crate::types::Tag;

/// The new current-location triple for a tag, applied atomically with the
/// rest of the message's unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationUpdate {
    pub gateway_id: Uuid,
    pub rssi: i32,
    pub seen_at: DateTime<Utc>,
}

impl LocationUpdate {
    pub fn apply(&self, tag: &mut Tag) {
        tag.current_gateway_id = Some(self.gateway_id);
        tag.last_rssi = Some(self.rssi);
        tag.last_seen_at = Some(self.seen_at);
    }
}

/// Decide whether a sighting moves the tag's current-gateway pointer.
///
/// A sighting without RSSI never influences location. The per-tag threshold
/// is applied next, before first-seen establishment: a reading numerically
/// above the threshold is discarded even for a tag with no mapping yet.
/// A tag without a mapping (or without a stored RSSI) then takes the
/// candidate unconditionally. Otherwise the tag is remapped only when the
/// new RSSI is strictly less than the stored one. That comparison direction
/// is the deployed behavior and is preserved as-is; see DESIGN.md before
/// touching it.
pub fn arbitrate(
    tag: &Tag,
    candidate_gateway_id: Uuid,
    rssi: Option<i32>,
    seen_at: DateTime<Utc>,
) -> Option<LocationUpdate> {
    let rssi = rssi?;

    if let Some(threshold) = tag.rssi_threshold {
        if rssi > threshold {
            metrics::counter!(SIGHTINGS_FILTERED, &[("reason", "over_threshold")]).increment(1);
            return None;
        }
    }

    let update = LocationUpdate {
        gateway_id: candidate_gateway_id,
        rssi,
        seen_at,
    };

    let (Some(_), Some(last_rssi)) = (tag.current_gateway_id, tag.last_rssi) else {
        return Some(update);
    };

    if rssi < last_rssi {
        return Some(update);
    }

    metrics::counter!(SIGHTINGS_FILTERED, &[("reason", "weaker_than_current")]).increment(1);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::STATUS_ACTIVE;
    use chrono::TimeZone;

    fn tag(
        rssi_threshold: Option<i32>,
        current_gateway_id: Option<Uuid>,
        last_rssi: Option<i32>,
    ) -> Tag {
        Tag {
            id: Uuid::now_v7(),
            uuid: None,
            mac_address: "20:18:ab:cd:20:21".to_string(),
            tag_type: Some("ib".to_string()),
            assigned_to: None,
            status: STATUS_ACTIVE,
            rssi_threshold,
            current_gateway_id,
            last_rssi,
            last_seen_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn seen_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn sighting_without_rssi_never_moves_location() {
        let candidate = Uuid::now_v7();
        assert_eq!(arbitrate(&tag(None, None, None), candidate, None, seen_at()), None);
    }

    #[test]
    fn threshold_is_applied_before_first_seen() {
        // -60 is numerically greater than -70, so it is discarded even
        // though the tag has no mapping yet.
        let candidate = Uuid::now_v7();
        let result = arbitrate(&tag(Some(-70), None, None), candidate, Some(-60), seen_at());
        assert_eq!(result, None);
    }

    #[test]
    fn passing_threshold_sighting_establishes_first_mapping() {
        let candidate = Uuid::now_v7();
        let result = arbitrate(&tag(Some(-70), None, None), candidate, Some(-75), seen_at());
        assert_eq!(
            result,
            Some(LocationUpdate {
                gateway_id: candidate,
                rssi: -75,
                seen_at: seen_at(),
            })
        );
    }

    #[test]
    fn first_seen_wins_without_threshold() {
        let candidate = Uuid::now_v7();
        let result = arbitrate(&tag(None, None, None), candidate, Some(-65), seen_at());
        assert_eq!(result.map(|u| u.rssi), Some(-65));
    }

    #[test]
    fn missing_stored_rssi_counts_as_unmapped() {
        let candidate = Uuid::now_v7();
        let result = arbitrate(
            &tag(None, Some(Uuid::now_v7()), None),
            candidate,
            Some(-65),
            seen_at(),
        );
        assert_eq!(result.map(|u| u.gateway_id), Some(candidate));
    }

    #[test]
    fn strictly_smaller_rssi_remaps() {
        let candidate = Uuid::now_v7();
        let result = arbitrate(
            &tag(None, Some(Uuid::now_v7()), Some(-65)),
            candidate,
            Some(-70),
            seen_at(),
        );
        assert_eq!(result.map(|u| u.gateway_id), Some(candidate));
    }

    #[test]
    fn larger_rssi_does_not_remap() {
        let candidate = Uuid::now_v7();
        let result = arbitrate(
            &tag(None, Some(Uuid::now_v7()), Some(-65)),
            candidate,
            Some(-60),
            seen_at(),
        );
        assert_eq!(result, None);
    }

    #[test]
    fn equal_rssi_does_not_remap() {
        let candidate = Uuid::now_v7();
        let result = arbitrate(
            &tag(None, Some(Uuid::now_v7()), Some(-65)),
            candidate,
            Some(-65),
            seen_at(),
        );
        assert_eq!(result, None);
    }

    #[test]
    fn apply_sets_the_whole_location_triple() {
        let mut t = tag(None, None, None);
        let update = LocationUpdate {
            gateway_id: Uuid::now_v7(),
            rssi: -72,
            seen_at: seen_at(),
        };
        update.apply(&mut t);
        assert_eq!(t.current_gateway_id, Some(update.gateway_id));
        assert_eq!(t.last_rssi, Some(-72));
        assert_eq!(t.last_seen_at, Some(seen_at()));
    }
}
