use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::IngestError;
use crate::metrics_consts::{GATEWAYS_CREATED, TAGS_CREATED};
use crate::types::{Gateway, Sighting, Tag, STATUS_ACTIVE};

// Upsert-by-natural-key is a plain read-then-create here. That is only safe
// because exactly one message is processed at a time; a parallel consumer
// would need an insert-or-get against the unique index instead.

/// Resolve the Gateway row for an external gateway id, creating it on first
/// sighting. The telemetry timestamp is refreshed on every envelope; all
/// other attributes stay owner-managed.
pub async fn resolve_gateway(
    conn: &mut PgConnection,
    external_id: &str,
    telemetry_at: DateTime<Utc>,
) -> Result<Gateway, IngestError> {
    let existing = sqlx::query_as::<_, Gateway>("SELECT * FROM gateways WHERE gateway_id = $1")
        .bind(external_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(IngestError::resolve)?;

    match existing {
        Some(gateway) => sqlx::query_as::<_, Gateway>(
            "UPDATE gateways SET timestamp = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(gateway.id)
        .bind(telemetry_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(IngestError::resolve),
        None => {
            metrics::counter!(GATEWAYS_CREATED).increment(1);
            sqlx::query_as::<_, Gateway>(
                r#"
                INSERT INTO gateways (id, gateway_id, status, timestamp)
                VALUES ($1, $2, $3, $4)
                RETURNING *
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(external_id)
            .bind(STATUS_ACTIVE)
            .bind(telemetry_at)
            .fetch_one(&mut *conn)
            .await
            .map_err(IngestError::resolve)
        }
    }
}

/// Resolve the Tag row for a sighting's MAC address, creating it on first
/// sighting with default active status and no current-gateway mapping.
/// Callers must not pass an empty MAC; those sightings stay unresolved.
pub async fn resolve_tag(conn: &mut PgConnection, sighting: &Sighting) -> Result<Tag, IngestError> {
    let existing = sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE mac_address = $1")
        .bind(&sighting.mac)
        .fetch_optional(&mut *conn)
        .await
        .map_err(IngestError::resolve)?;

    if let Some(tag) = existing {
        return Ok(tag);
    }

    metrics::counter!(TAGS_CREATED).increment(1);
    let tag_type = Some(sighting.advertisement_type.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    sqlx::query_as::<_, Tag>(
        r#"
        INSERT INTO tags (id, uuid, mac_address, tag_type, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(&sighting.uuid)
    .bind(&sighting.mac)
    .bind(tag_type)
    .bind(STATUS_ACTIVE)
    .fetch_one(&mut *conn)
    .await
    .map_err(IngestError::resolve)
}
