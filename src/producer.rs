use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerConnection, BrokerError};
use crate::configuration::ProducerSettings;
use crate::model::Transaction;

/// Generates and publishes one transaction per interval until the shared
/// cancellation signal fires or the session deadline elapses. A failed
/// publish is logged and the loop moves on to the next generated value, it
/// is never redelivered and never fatal.
pub async fn run_producer(
    broker: Arc<BrokerConnection>,
    settings: ProducerSettings,
    cancel: CancellationToken,
) {
    let interval = Duration::from_millis(settings.publish_interval_ms);
    let deadline = Instant::now() + Duration::from_secs(settings.session_timeout_secs);

    tracing::info!("Producer started");

    loop {
        let transaction = Transaction::generate();
        match broker.publish(&transaction).await {
            Ok(()) => tracing::info!("Sent: {transaction}"),
            Err(e) => tracing::error!("Failed to publish message: {e}"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep_until(deadline) => {
                tracing::info!("Producer session deadline reached");
                break;
            }
            _ = sleep(interval) => {}
        }
    }

    match broker.close().await {
        Ok(()) => tracing::info!("Producer closed the broker connection"),
        // The consumer's shutdown path may have won the race to close
        Err(BrokerError::AlreadyClosed) => {
            tracing::debug!("Broker connection was already closed")
        }
        Err(e) => tracing::error!("Failed to close the broker connection: {e}"),
    }

    tracing::info!("Producer stopped");
}
