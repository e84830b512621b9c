//! Connection lifecycle of a consuming stage.
//!
//! The outer loop owns the session and reconnects after transport errors.
//! The inner loop consumes one message at a time: handle, then ack. A
//! message is never acknowledged before its handler returned.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{connect, Broker, Session, TransportError};
use crate::config::BrokerConfig;
use crate::retry::RetryPolicy;
use crate::worker::Stage;

pub struct Supervisor {
    broker: Arc<dyn Broker>,
    connect_policy: RetryPolicy,
    reconnect_delay: Duration,
}

impl Supervisor {
    pub fn new(broker: Arc<dyn Broker>, config: &BrokerConfig) -> Self {
        Self::with_policy(broker, config.connect_policy(), config.reconnect_delay())
    }

    pub fn with_policy(
        broker: Arc<dyn Broker>,
        connect_policy: RetryPolicy,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            broker,
            connect_policy,
            reconnect_delay,
        }
    }

    /// Runs `stage` until `cancel` fires.
    ///
    /// Returns an error only when the very first connection cannot be
    /// established within the connect policy. Later losses are retried
    /// forever.
    pub async fn run(
        &self,
        stage: &dyn Stage,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let mut connected_once = false;

        loop {
            let opened = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                opened = connect(self.broker.as_ref(), stage.queues(), &self.connect_policy) => opened,
            };

            let session = match opened {
                Ok(session) => session,
                Err(e) if !connected_once => return Err(e),
                Err(e) => {
                    tracing::warn!(stage = stage.name(), error = %e, "Reconnect failed");
                    if self.pause(&cancel).await {
                        return Ok(());
                    }
                    continue;
                }
            };
            connected_once = true;
            tracing::info!(stage = stage.name(), queue = stage.queue(), "Waiting for messages");

            let result = self.consume(stage, session.as_ref(), &cancel).await;
            session.close().await;

            match result {
                Ok(()) => {
                    tracing::info!(stage = stage.name(), "Stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        stage = stage.name(),
                        error = %e,
                        delay_secs = self.reconnect_delay.as_secs(),
                        "Connection lost, reconnecting"
                    );
                    if self.pause(&cancel).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Consumes until cancelled (`Ok`) or the session fails (`Err`).
    async fn consume(
        &self,
        stage: &dyn Stage,
        session: &dyn Session,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let mut deliveries = session.consume(stage.queue()).await?;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = deliveries.next() => next,
            };
            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(e),
                None => return Err(TransportError::Closed),
            };

            if delivery.redelivered {
                tracing::debug!(stage = stage.name(), "Handling redelivered message");
            }
            if let Err(e) = stage.handle(&delivery.payload, session.as_publisher()).await {
                tracing::error!(stage = stage.name(), error = %e, "Message handling failed");
            }
            session.ack(delivery.delivery_tag).await?;
        }
    }

    /// Sleeps for the reconnect delay. Returns true when cancelled meanwhile.
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.reconnect_delay) => false,
        }
    }
}
