use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::Transaction;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to the broker: {0}")]
    Connection(#[source] lapin::Error),
    #[error("failed to declare queue '{queue}': {source}")]
    Declaration {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("failed to serialize transaction: {0}")]
    Serialization(String),
    #[error("failed to publish a message: {0}")]
    Publish(String),
    #[error("failed to register a consumer: {0}")]
    Subscription(String),
    #[error("channel/connection is not open")]
    AlreadyClosed,
    #[error("failed to close the broker connection: {0}")]
    Close(String),
}

/// One network connection plus one channel to the broker, shared by the
/// producer and the consumer through an `Arc`.
///
/// Both handles live in a single slot that `close` empties, so no matter how
/// many tasks hold the `Arc`, only the first close performs real work. The
/// channel is cloned out of the slot for each operation instead of holding
/// the lock across broker i/o.
#[derive(Debug)]
pub struct BrokerConnection {
    queue_name: String,
    state: Mutex<Option<BrokerChannel>>,
}

#[derive(Debug)]
struct BrokerChannel {
    connection: Connection,
    channel: Channel,
}

impl BrokerConnection {
    /// Dials the broker, opens a channel and declares `queue_name` as a
    /// durable queue, so messages survive a broker restart.
    pub async fn connect(uri: &str, queue_name: &str) -> Result<BrokerConnection, BrokerError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(BrokerError::Connection)?;

        let channel = connection
            .create_channel()
            .await
            .map_err(BrokerError::Connection)?;

        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Declaration {
                queue: queue_name.to_string(),
                source: e,
            })?;

        Ok(BrokerConnection {
            queue_name: queue_name.to_string(),
            state: Mutex::new(Some(BrokerChannel {
                connection,
                channel,
            })),
        })
    }

    /// Publishes one transaction as a persistent JSON message on the default
    /// exchange, routed by queue name.
    pub async fn publish(&self, transaction: &Transaction) -> Result<(), BrokerError> {
        // serde_json encodes a non-finite float as null, which would decode
        // as a parse failure on the consumer side. Reject it here instead.
        if !transaction.amount.is_finite() {
            return Err(BrokerError::Serialization(format!(
                "amount is not a finite number: {}",
                transaction.amount
            )));
        }

        let body = serde_json::to_vec(transaction)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;

        let channel = self
            .channel()
            .await
            .ok_or_else(|| BrokerError::Publish("channel/connection is not open".to_string()))?;

        channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        Ok(())
    }

    /// Registers a manually-acknowledged subscription with a prefetch window
    /// of one, so the broker never hands this consumer a second delivery
    /// before the first is acked or nacked.
    pub async fn consume(&self) -> Result<Consumer, BrokerError> {
        let channel = self.channel().await.ok_or_else(|| {
            BrokerError::Subscription("channel/connection is not open".to_string())
        })?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Subscription(e.to_string()))?;

        let consumer_tag = format!("consumer-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &self.queue_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Subscription(e.to_string()))?;

        Ok(consumer)
    }

    /// Closes the channel, then the connection. Only the first call after a
    /// successful connect performs cleanup; later calls report
    /// `AlreadyClosed`. Both release steps run even if the first one fails,
    /// and their failures are folded into one error.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let state = match self.state.lock().await.take() {
            Some(state) => state,
            None => return Err(BrokerError::AlreadyClosed),
        };

        let mut failure: Option<String> = None;

        if let Err(e) = state.channel.close(200, "closing").await {
            failure = Some(format!("channel close error: {e}"));
        }

        if let Err(e) = state.connection.close(200, "closing").await {
            failure = Some(match failure {
                Some(previous) => format!("{previous}, connection close error: {e}"),
                None => format!("connection close error: {e}"),
            });
        }

        match failure {
            Some(message) => Err(BrokerError::Close(message)),
            None => Ok(()),
        }
    }

    async fn channel(&self) -> Option<Channel> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|state| state.channel.clone())
    }

    #[cfg(test)]
    fn closed(queue_name: &str) -> BrokerConnection {
        BrokerConnection {
            queue_name: queue_name.to_string(),
            state: Mutex::new(None),
        }
    }
}
