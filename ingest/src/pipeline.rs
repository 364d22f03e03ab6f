use std::collections::{hash_map::Entry, HashMap};

use sqlx::PgPool;
use tracing::debug;

use crate::arbitration::arbitrate;
use crate::error::IngestError;
use crate::metrics_consts::{LOCATION_MOVES, SIGHTINGS_RECEIVED, TAG_UUID_BACKFILLS};
use crate::resolve::{resolve_gateway, resolve_tag};
use crate::store::{insert_advertisement, update_tag_state};
use crate::types::{Envelope, ProcessedEnvelope, Tag};

struct TagWork {
    tag: Tag,
    dirty: bool,
}

/// Run one envelope through resolution, arbitration and persistence as a
/// single unit of work: either every advertisement row and every tag/gateway
/// update of this message commits, or none of it does.
///
/// Sightings are evaluated strictly in envelope order against the tag state
/// accumulated so far, so a later sighting in the same message can override
/// an earlier one for the same tag.
pub async fn process_envelope(
    pool: &PgPool,
    envelope: Envelope,
) -> Result<ProcessedEnvelope, IngestError> {
    metrics::counter!(SIGHTINGS_RECEIVED).increment(envelope.sightings.len() as u64);

    let mut tx = pool.begin().await.map_err(IngestError::persist)?;

    let gateway =
        resolve_gateway(&mut tx, &envelope.gateway_external_id, envelope.timestamp).await?;

    // Tags already resolved within this message, keyed on MAC. Re-reading
    // per message (not across messages) is what keeps a long-running loop
    // free of stale state.
    let mut tags: HashMap<String, TagWork> = HashMap::new();
    let mut advertisements = Vec::with_capacity(envelope.sightings.len());

    for sighting in &envelope.sightings {
        let tag_id = if sighting.mac.is_empty() {
            // Unresolvable sighting; still recorded, with no tag reference.
            None
        } else {
            let work = match tags.entry(sighting.mac.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let tag = resolve_tag(&mut tx, sighting).await?;
                    entry.insert(TagWork { tag, dirty: false })
                }
            };

            if work.tag.uuid.is_none() && sighting.uuid.is_some() {
                work.tag.uuid = sighting.uuid.clone();
                work.dirty = true;
                metrics::counter!(TAG_UUID_BACKFILLS).increment(1);
            }

            if let Some(update) = arbitrate(&work.tag, gateway.id, sighting.rssi, sighting.timestamp)
            {
                debug!(
                    mac = %sighting.mac,
                    rssi = update.rssi,
                    "moving tag to gateway {}", envelope.gateway_external_id
                );
                update.apply(&mut work.tag);
                work.dirty = true;
                metrics::counter!(LOCATION_MOVES).increment(1);
            }

            Some(work.tag.id)
        };

        advertisements.push(insert_advertisement(&mut tx, gateway.id, tag_id, sighting).await?);
    }

    for work in tags.values() {
        if work.dirty {
            update_tag_state(&mut tx, &work.tag).await?;
        }
    }

    tx.commit().await.map_err(IngestError::persist)?;

    Ok(ProcessedEnvelope {
        gateway,
        advertisements,
    })
}
