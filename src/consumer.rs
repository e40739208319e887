use std::sync::Arc;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerConnection, BrokerError};
use crate::model::Transaction;
use crate::store::{Store, StoreError};

/// Subscribes to the queue and persists each delivery, acknowledging only
/// after a successful insert. A failed insert is negatively acknowledged
/// with requeue, so the message is redelivered later, to any consumer.
/// Runs until the shared cancellation signal fires or the broker ends the
/// delivery stream.
pub async fn run_consumer(
    broker: Arc<BrokerConnection>,
    store: Arc<Store>,
    cancel: CancellationToken,
) -> Result<(), BrokerError> {
    let mut deliveries = broker.consume().await?;

    tracing::info!("Consumer started. Waiting for messages...");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = deliveries.next() => match delivery {
                Some(Ok(delivery)) => handle_delivery(delivery, &store).await,
                Some(Err(e)) => tracing::error!("Failed to receive delivery: {e}"),
                None => {
                    tracing::info!("Delivery stream ended");
                    break;
                }
            }
        }
    }

    shutdown(&broker, &store).await;
    Ok(())
}

async fn handle_delivery(delivery: Delivery, store: &Store) {
    let transaction: Transaction = match serde_json::from_slice(&delivery.data) {
        Ok(transaction) => transaction,
        Err(e) => {
            tracing::error!("Error decoding transaction: {e}");
            // A malformed message can never succeed on redelivery. Nack it
            // without requeue, so it lands on the dead-letter exchange when
            // one is configured instead of cycling through the queue.
            nack(delivery, false).await;
            return;
        }
    };

    tracing::info!("Received: {transaction}");
    match store.insert_transaction(&transaction).await {
        Ok(()) => {
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                tracing::error!("Failed to ack message: {e}");
            } else {
                tracing::info!("Inserted: {transaction}");
            }
        }
        Err(e) => {
            tracing::warn!("Message has not been processed successfully: {e}");
            nack(delivery, true).await;
        }
    }
}

async fn nack(delivery: Delivery, requeue: bool) {
    let options = BasicNackOptions {
        requeue,
        ..BasicNackOptions::default()
    };
    if let Err(e) = delivery.nack(options).await {
        tracing::error!("Failed to nack message: {e}");
    }
}

async fn shutdown(broker: &BrokerConnection, store: &Store) {
    match broker.close().await {
        Ok(()) => tracing::info!("Consumer closed the broker connection"),
        // The producer's shutdown path may have won the race to close
        Err(BrokerError::AlreadyClosed) => {
            tracing::debug!("Broker connection was already closed")
        }
        Err(e) => tracing::error!("Failed to close the broker connection: {e}"),
    }

    match store.close().await {
        Ok(()) => tracing::info!("Consumer closed the store"),
        Err(StoreError::AlreadyClosed) => tracing::debug!("Store was already closed"),
        Err(e) => tracing::error!("Failed to close the store: {e}"),
    }

    tracing::info!("Consumer stopped");
}
