//! Durable queue transport between stages.
//!
//! Stages talk to the broker through the [`Broker`], [`Session`] and
//! [`Deliveries`] traits. [`amqp::AmqpBroker`] is the production
//! implementation, [`memory::MemoryBroker`] an in-process one used by tests.

pub mod amqp;
pub mod memory;
pub mod supervisor;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::{RetryError, RetryPolicy};

pub use supervisor::Supervisor;

pub const METADATA_QUEUE: &str = "metadata_queue";
pub const OCR_QUEUE: &str = "ocr_queue";
pub const FILE_NAMING_QUEUE: &str = "file_naming_queue";
pub const UPLOAD_QUEUE: &str = "upload_queue";
pub const UPDATES_EXCHANGE: &str = "sse_updates_fanout";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Broker unreachable after {attempts} attempts: {reason}")]
    Unreachable { attempts: u32, reason: String },

    #[error("Connection closed")]
    Closed,

    #[error("Publish to '{queue}' was not confirmed")]
    NotConfirmed { queue: String },

    #[error("Unknown queue '{0}'")]
    UnknownQueue(String),
}

/// One message taken from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

/// Publishing side of a session.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes a persistent message to a named queue.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), TransportError>;
}

/// Stream of deliveries from one queue.
#[async_trait]
pub trait Deliveries: Send {
    /// Next message, `None` once the consumer was cancelled or the connection ended.
    async fn next(&mut self) -> Option<Result<Delivery, TransportError>>;
}

/// An open connection with its channel and declared queues.
#[async_trait]
pub trait Session: Publisher {
    async fn consume(&self, queue: &str) -> Result<Box<dyn Deliveries>, TransportError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;

    fn as_publisher(&self) -> &dyn Publisher;

    fn is_connected(&self) -> bool;

    async fn close(&self);
}

/// Something that can open sessions.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connects once, declares `queues` durable and sets prefetch to one.
    async fn open(&self, queues: &[&str]) -> Result<Box<dyn Session>, TransportError>;
}

/// Opens a session, retrying according to `policy`.
pub async fn connect(
    broker: &dyn Broker,
    queues: &[&str],
    policy: &RetryPolicy,
) -> Result<Box<dyn Session>, TransportError> {
    let result = policy
        .run("broker.connect", |_| broker.open(queues), |_| true)
        .await;
    match result {
        Ok(session) => {
            tracing::info!(queues = ?queues, "Connected to broker");
            Ok(session)
        }
        Err(RetryError::Exhausted { attempts, last }) => {
            tracing::error!(attempts, error = %last, "Could not connect to broker");
            Err(TransportError::Unreachable {
                attempts,
                reason: last.to_string(),
            })
        }
        Err(RetryError::Aborted(e)) => Err(e),
    }
}

/// Publishes `payload` and logs a failure. Returns whether it was handed off.
pub async fn forward(publisher: &dyn Publisher, queue: &str, payload: &[u8]) -> bool {
    match publisher.publish(queue, payload).await {
        Ok(()) => {
            tracing::debug!(queue, bytes = payload.len(), "Forwarded message");
            true
        }
        Err(e) => {
            tracing::error!(queue, error = %e, "Failed to forward message");
            false
        }
    }
}
