pub const MESSAGES_RECEIVED: &str = "beacon_ingest_messages_received";
pub const MESSAGES_COMMITTED: &str = "beacon_ingest_messages_committed";
pub const MESSAGES_RETRIED: &str = "beacon_ingest_messages_retried";
pub const MESSAGES_SKIPPED: &str = "beacon_ingest_messages_skipped";
pub const EMPTY_PAYLOADS: &str = "beacon_ingest_empty_payloads";
pub const DECODE_FAILURES: &str = "beacon_ingest_decode_failures";
pub const SIGHTINGS_RECEIVED: &str = "beacon_ingest_sightings_received";
pub const ADVERTISEMENTS_WRITTEN: &str = "beacon_ingest_advertisements_written";
pub const GATEWAYS_CREATED: &str = "beacon_ingest_gateways_created";
pub const TAGS_CREATED: &str = "beacon_ingest_tags_created";
pub const TAG_UUID_BACKFILLS: &str = "beacon_ingest_tag_uuid_backfills";
pub const LOCATION_MOVES: &str = "beacon_ingest_location_moves";
pub const SIGHTINGS_FILTERED: &str = "beacon_ingest_sightings_filtered";
pub const TIMESTAMP_FALLBACKS: &str = "beacon_ingest_timestamp_fallbacks";
pub const MESSAGE_PROCESSING_TIME: &str = "beacon_ingest_message_processing_time_ms";
