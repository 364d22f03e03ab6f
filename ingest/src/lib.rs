use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common_kafka::kafka_consumer::{RecvErr, SingleTopicConsumer};
use health::HealthHandle;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app_context::AppContext;
use crate::error::{ConsumerError, IngestError};
use crate::metrics_consts::{
    DECODE_FAILURES, EMPTY_PAYLOADS, MESSAGES_COMMITTED, MESSAGES_RECEIVED, MESSAGES_RETRIED,
    MESSAGES_SKIPPED, MESSAGE_PROCESSING_TIME,
};
use crate::pipeline::process_envelope;
use crate::types::{decode_message, Envelope, ProcessedEnvelope};

pub mod api;
pub mod app_context;
pub mod arbitration;
pub mod config;
pub mod error;
pub mod metrics_consts;
pub mod pipeline;
pub mod resolve;
pub mod server;
pub mod store;
pub mod types;

const RETRY_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(30);

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RETRY_BACKOFF_MAX)
}

/// Run one envelope's unit of work, retrying transient failures in place
/// with capped exponential backoff until the message reaches a definitive
/// outcome or shutdown is signalled.
///
/// Retrying in place, rather than polling on and coming back, is load-bearing
/// for delivery: stored offsets are a per-partition high-water mark, so if the
/// loop moved past a failed message, the next successful message would store
/// an offset beyond it and the broker would never redeliver it. Returns `None`
/// when shutdown interrupts the retries; the caller must leave the offset
/// unstored so the message is redelivered on restart.
pub async fn process_until_committed(
    pool: &PgPool,
    liveness: &HealthHandle,
    envelope: Envelope,
    shutdown: &CancellationToken,
) -> Option<Result<ProcessedEnvelope, IngestError>> {
    let mut backoff = RETRY_BACKOFF_INITIAL;
    loop {
        let start = Instant::now();
        let result = process_envelope(pool, envelope.clone()).await;
        metrics::histogram!(MESSAGE_PROCESSING_TIME).record(start.elapsed().as_millis() as f64);

        match result {
            Err(e) if e.is_retriable() => {
                metrics::counter!(MESSAGES_RETRIED).increment(1);
                warn!(
                    gateway = %envelope.gateway_external_id,
                    "Transient failure, retrying in {:?}: {}",
                    backoff,
                    e
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = next_backoff(backoff);
                liveness.report_healthy().await;
            }
            outcome => return Some(outcome),
        }
    }
}

/// The sequential consumer: one message decoded, resolved, arbitrated and
/// persisted at a time, in partition order. The offset for a message is
/// stored only once its unit of work has committed (or once the message is
/// known to be unprocessable), so nothing is lost across restarts; transient
/// failures are retried in place and never advance the offset.
///
/// The cancellation token is checked at the poll point and between retries;
/// an attempt already in flight always runs to completion first.
pub async fn consumer_loop(
    consumer: SingleTopicConsumer,
    context: Arc<AppContext>,
    shutdown: CancellationToken,
) -> Result<(), ConsumerError> {
    loop {
        context.worker_liveness.report_healthy().await;

        let received = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown signal received, stopping consumer");
                return Ok(());
            }
            received = consumer.recv() => received,
        };

        let (payload, offset) = match received {
            Ok(received) => received,
            Err(RecvErr::Empty) => {
                warn!("Received empty payload");
                metrics::counter!(EMPTY_PAYLOADS).increment(1);
                continue;
            }
            Err(RecvErr::Kafka(e)) => {
                // Broker-level failures are fatal to the loop; per-message
                // failures never take this path.
                return Err(e.into());
            }
        };

        metrics::counter!(MESSAGES_RECEIVED).increment(1);

        let envelope = match decode_message(&payload, Utc::now()) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Poison message: it will never decode, so store its offset
                // rather than letting it block the partition.
                metrics::counter!(DECODE_FAILURES).increment(1);
                error!(
                    partition = offset.partition(),
                    offset = offset.offset(),
                    "Failed to decode message, skipping: {}",
                    e
                );
                offset.store()?;
                continue;
            }
        };

        let gateway = envelope.gateway_external_id.clone();
        let outcome = process_until_committed(
            &context.pool,
            &context.worker_liveness,
            envelope,
            &shutdown,
        )
        .await;

        match outcome {
            None => {
                info!("Shutdown signal received mid-retry, leaving offset unstored");
                return Ok(());
            }
            Some(Ok(processed)) => {
                info!(
                    gateway = %gateway,
                    advertisements = processed.advertisements.len(),
                    "Processed message"
                );
                metrics::counter!(MESSAGES_COMMITTED).increment(1);
                offset.store()?;
            }
            // Only permanent failures escape the retry wrapper.
            Some(Err(e)) => {
                metrics::counter!(MESSAGES_SKIPPED).increment(1);
                error!(
                    gateway = %gateway,
                    partition = offset.partition(),
                    offset = offset.offset(),
                    "Permanent failure, skipping message: {}",
                    e
                );
                offset.store()?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = RETRY_BACKOFF_INITIAL;
        for _ in 0..10 {
            backoff = next_backoff(backoff);
        }
        assert_eq!(backoff, RETRY_BACKOFF_MAX);
        assert_eq!(next_backoff(RETRY_BACKOFF_MAX), RETRY_BACKOFF_MAX);
    }
}
