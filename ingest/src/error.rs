use common_kafka::kafka_consumer::OffsetErr;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Per-message pipeline failures. Decode and invariant failures are
/// permanent: redelivering the message cannot make them succeed, so the
/// consumer stores the offset and moves past them. Resolution and
/// persistence failures are transient: the offset is withheld and the
/// broker redelivers the message later.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("identity resolution failed: {0}")]
    Resolve(sqlx::Error),
    #[error("persistence failed: {0}")]
    Persist(sqlx::Error),
    #[error("location invariant violated: {0}")]
    Invariant(String),
}

impl IngestError {
    /// Wrap a storage error raised while resolving Gateway/Tag identities.
    pub fn resolve(error: sqlx::Error) -> Self {
        if is_foreign_key_violation(&error) {
            return IngestError::Invariant(error.to_string());
        }
        IngestError::Resolve(error)
    }

    /// Wrap a storage error raised inside the per-message unit of work.
    pub fn persist(error: sqlx::Error) -> Self {
        if is_foreign_key_violation(&error) {
            return IngestError::Invariant(error.to_string());
        }
        IngestError::Persist(error)
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, IngestError::Resolve(_) | IngestError::Persist(_))
    }
}

/// Errors that end the consumer loop. Anything broker-level is fatal to the
/// process; per-message failures never reach this type.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Offset store failed: {0}")]
    Offset(#[from] OffsetErr),
}

// Class 23 — Integrity Constraint Violation; 23503 = foreign_key_violation
// See: https://www.postgresql.org/docs/current/errcodes-appendix.html
pub fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => {
            if let Some(code) = db_error.code() {
                code.as_ref() == "23503"
            } else {
                db_error
                    .message()
                    .to_lowercase()
                    .contains("foreign key constraint")
            }
        }
        _ => false,
    }
}
