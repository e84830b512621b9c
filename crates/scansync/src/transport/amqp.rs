//! AMQP 0.9.1 transport on top of lapin.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

use super::{Broker, Deliveries, Delivery, Publisher, Session, TransportError};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Adds the heartbeat interval to a broker URL as a query parameter.
pub fn url_with_heartbeat(url: &str, heartbeat_secs: u16) -> String {
    if url.contains("heartbeat=") {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}heartbeat={}", url, separator, heartbeat_secs)
}

pub struct AmqpBroker {
    url: String,
}

impl AmqpBroker {
    pub fn new(url: &str, heartbeat_secs: u16) -> Self {
        Self {
            url: url_with_heartbeat(url, heartbeat_secs),
        }
    }

    async fn connect(&self) -> Result<(Connection, Channel), TransportError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok((connection, channel))
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn open(&self, queues: &[&str]) -> Result<Box<dyn Session>, TransportError> {
        let (connection, channel) = self.connect().await?;

        for queue in queues {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        Ok(Box::new(AmqpSession {
            connection,
            channel,
        }))
    }
}

pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl Publisher for AmqpSession {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), TransportError> {
        publish_to(&self.channel, "", queue, payload).await
    }
}

#[async_trait]
impl Session for AmqpSession {
    async fn consume(&self, queue: &str) -> Result<Box<dyn Deliveries>, TransportError> {
        let tag = format!("scansync-{}", uuid::Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(Box::new(AmqpDeliveries { consumer }))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    fn as_publisher(&self) -> &dyn Publisher {
        self
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) {
        if let Err(e) = self.connection.close(200, "shutdown").await {
            tracing::debug!(error = %e, "Error while closing broker connection");
        }
    }
}

struct AmqpDeliveries {
    consumer: lapin::Consumer,
}

#[async_trait]
impl Deliveries for AmqpDeliveries {
    async fn next(&mut self) -> Option<Result<Delivery, TransportError>> {
        let delivery = self.consumer.next().await?;
        Some(
            delivery
                .map(|d| Delivery {
                    delivery_tag: d.delivery_tag,
                    payload: d.data,
                    redelivered: d.redelivered,
                })
                .map_err(TransportError::from),
        )
    }
}

/// Publishes a persistent message and waits for the broker's confirm.
async fn publish_to(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    payload: &[u8],
) -> Result<(), TransportError> {
    let confirmation = channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            payload,
            BasicProperties::default().with_delivery_mode(PERSISTENT),
        )
        .await?
        .await?;
    let target = if exchange.is_empty() { routing_key } else { exchange };
    check_confirmation(&confirmation, target)
}

fn check_confirmation(confirmation: &Confirmation, target: &str) -> Result<(), TransportError> {
    if confirmation.is_nack() {
        return Err(TransportError::NotConfirmed {
            queue: target.to_string(),
        });
    }
    Ok(())
}

/// Lazily connected publisher for the fan-out updates exchange.
pub struct FanoutPublisher {
    url: String,
    exchange: String,
    channel: tokio::sync::Mutex<Option<(Connection, Channel)>>,
}

impl FanoutPublisher {
    pub fn new(url: &str, heartbeat_secs: u16, exchange: &str) -> Self {
        Self {
            url: url_with_heartbeat(url, heartbeat_secs),
            exchange: exchange.to_string(),
            channel: tokio::sync::Mutex::new(None),
        }
    }

    async fn open(&self) -> Result<(Connection, Channel), TransportError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        declare_fanout(&channel, &self.exchange).await?;
        Ok((connection, channel))
    }

    /// Publishes to the exchange, reconnecting once per failed attempt.
    pub async fn publish(&self, payload: &[u8], max_attempts: u32) -> Result<(), TransportError> {
        let mut guard = self.channel.lock().await;
        let mut last_error = TransportError::Closed;

        for attempt in 1..=max_attempts.max(1) {
            let usable = matches!(
                guard.as_ref(),
                Some((connection, channel))
                    if connection.status().connected() && channel.status().connected()
            );
            if !usable {
                *guard = None;
                match self.open().await {
                    Ok(opened) => *guard = Some(opened),
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "Updates exchange unavailable");
                        last_error = e;
                        continue;
                    }
                }
            }

            if let Some((_, channel)) = guard.as_ref() {
                match publish_to(channel, &self.exchange, "", payload).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "Publishing update failed");
                        *guard = None;
                        last_error = e;
                    }
                }
            }
        }

        Err(last_error)
    }
}

async fn declare_fanout(channel: &Channel, exchange: &str) -> Result<(), TransportError> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Subscribes to the updates exchange through an exclusive, auto-deleted queue.
pub async fn subscribe_updates(
    url: &str,
    heartbeat_secs: u16,
    exchange: &str,
) -> Result<(Connection, Box<dyn Deliveries>), TransportError> {
    let connection =
        Connection::connect(&url_with_heartbeat(url, heartbeat_secs), ConnectionProperties::default())
            .await?;
    let channel = connection.create_channel().await?;
    declare_fanout(&channel, exchange).await?;

    let queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    let queue_name = queue.name().as_str().to_string();
    channel
        .queue_bind(
            &queue_name,
            exchange,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let consumer = channel
        .basic_consume(
            &queue_name,
            "scansync-updates",
            BasicConsumeOptions {
                no_ack: true,
                ..BasicConsumeOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    Ok((connection, Box::new(AmqpDeliveries { consumer })))
}
