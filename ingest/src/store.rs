use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::IngestError;
use crate::metrics_consts::ADVERTISEMENTS_WRITTEN;
use crate::types::{SensorAdvertisement, Sighting, Tag};

/// Append one sighting to the advertisement time series. Rows here are
/// immutable once written; redelivered messages produce duplicate rows
/// rather than upserts.
pub async fn insert_advertisement(
    conn: &mut PgConnection,
    gateway_id: Uuid,
    tag_id: Option<Uuid>,
    sighting: &Sighting,
) -> Result<SensorAdvertisement, IngestError> {
    let row = sqlx::query_as::<_, SensorAdvertisement>(
        r#"
        INSERT INTO sensor_advertisements
            (id, gateway_id, tag_id, advertisement_type, mac_address, timestamp,
             rssi, battery, major, minor, name, uuid, rssi_at_xm, temperature, humidity)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(gateway_id)
    .bind(tag_id)
    .bind(&sighting.advertisement_type)
    .bind(&sighting.mac)
    .bind(sighting.timestamp)
    .bind(sighting.rssi)
    .bind(sighting.battery)
    .bind(sighting.major)
    .bind(sighting.minor)
    .bind(&sighting.name)
    .bind(&sighting.uuid)
    .bind(sighting.rssi_at_xm)
    .bind(sighting.temperature)
    .bind(sighting.humidity)
    .fetch_one(&mut *conn)
    .await
    .map_err(IngestError::persist)?;

    metrics::counter!(ADVERTISEMENTS_WRITTEN).increment(1);
    Ok(row)
}

/// Write back the pipeline-owned mutable fields of a tag: UUID backfill and
/// the current-location triple. Always writes the triple as a unit so a
/// concurrent reader never sees a fresh RSSI next to a stale gateway.
pub async fn update_tag_state(conn: &mut PgConnection, tag: &Tag) -> Result<(), IngestError> {
    sqlx::query(
        r#"
        UPDATE tags
        SET uuid = $2, current_gateway_id = $3, last_rssi = $4, last_seen_at = $5, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(tag.id)
    .bind(&tag.uuid)
    .bind(tag.current_gateway_id)
    .bind(tag.last_rssi)
    .bind(tag.last_seen_at)
    .execute(&mut *conn)
    .await
    .map_err(IngestError::persist)?;
    Ok(())
}
