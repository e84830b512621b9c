//! In-process broker with AMQP-like semantics, for tests and local runs.
//!
//! Queues must be declared before use, deliveries stay unacknowledged until
//! acked, and a consumer never holds more than `prefetch` unacked messages.
//! [`MemoryBroker::disconnect`] simulates a dropped connection: unacked
//! messages go back to the front of their queue and old sessions fail.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{Broker, Deliveries, Delivery, Publisher, Session, TransportError};

/// Something observable the broker did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Opened,
    Published { queue: String },
    Delivered { queue: String, delivery_tag: u64 },
    Acked { delivery_tag: u64 },
    Disconnected,
}

#[derive(Debug)]
struct Queued {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct State {
    queues: HashMap<String, VecDeque<Queued>>,
    unacked: HashMap<u64, (String, Vec<u8>)>,
    next_tag: u64,
    prefetch: usize,
    generation: u64,
    fail_opens: u32,
    fail_publishes: u32,
    events: Vec<BrokerEvent>,
}

#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_prefetch(1)
    }

    pub fn with_prefetch(prefetch: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                queues: HashMap::new(),
                unacked: HashMap::new(),
                next_tag: 1,
                prefetch: prefetch.max(1),
                generation: 0,
                fail_opens: 0,
                fail_publishes: 0,
                events: Vec::new(),
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the broker state from others.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Makes the next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: u32) {
        self.lock().fail_opens = n;
    }

    /// Makes the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: u32) {
        self.lock().fail_publishes = n;
    }

    /// Declares a queue and appends a message to it.
    pub fn push(&self, queue: &str, payload: &[u8]) {
        {
            let mut state = self.lock();
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(Queued {
                    payload: payload.to_vec(),
                    redelivered: false,
                });
        }
        self.notify.notify_waiters();
    }

    /// Payloads waiting in a queue, oldest first.
    pub fn queued(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub fn unacked_count(&self) -> usize {
        self.lock().unacked.len()
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.lock().events.clone()
    }

    /// Drops every open session and requeues unacknowledged messages.
    pub fn disconnect(&self) {
        {
            let mut state = self.lock();
            state.generation += 1;
            let mut tags: Vec<u64> = state.unacked.keys().copied().collect();
            tags.sort_unstable_by(|a, b| b.cmp(a));
            for tag in tags {
                if let Some((queue, payload)) = state.unacked.remove(&tag) {
                    state.queues.entry(queue).or_default().push_front(Queued {
                        payload,
                        redelivered: true,
                    });
                }
            }
            state.events.push(BrokerEvent::Disconnected);
        }
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open(&self, queues: &[&str]) -> Result<Box<dyn Session>, TransportError> {
        let mut state = self.lock();
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(TransportError::Closed);
        }
        for queue in queues {
            state.queues.entry(queue.to_string()).or_default();
        }
        state.events.push(BrokerEvent::Opened);
        Ok(Box::new(MemorySession {
            broker: self.clone(),
            generation: state.generation,
        }))
    }
}

struct MemorySession {
    broker: MemoryBroker,
    generation: u64,
}

impl MemorySession {
    fn check(&self, state: &State) -> Result<(), TransportError> {
        if state.generation == self.generation {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

#[async_trait]
impl Publisher for MemorySession {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), TransportError> {
        {
            let mut state = self.broker.lock();
            self.check(&state)?;
            if state.fail_publishes > 0 {
                state.fail_publishes -= 1;
                return Err(TransportError::NotConfirmed {
                    queue: queue.to_string(),
                });
            }
            let Some(messages) = state.queues.get_mut(queue) else {
                return Err(TransportError::UnknownQueue(queue.to_string()));
            };
            messages.push_back(Queued {
                payload: payload.to_vec(),
                redelivered: false,
            });
            state.events.push(BrokerEvent::Published {
                queue: queue.to_string(),
            });
        }
        self.broker.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn consume(&self, queue: &str) -> Result<Box<dyn Deliveries>, TransportError> {
        let state = self.broker.lock();
        self.check(&state)?;
        if !state.queues.contains_key(queue) {
            return Err(TransportError::UnknownQueue(queue.to_string()));
        }
        Ok(Box::new(MemoryDeliveries {
            broker: self.broker.clone(),
            queue: queue.to_string(),
            generation: self.generation,
        }))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        {
            let mut state = self.broker.lock();
            self.check(&state)?;
            state.unacked.remove(&delivery_tag);
            state.events.push(BrokerEvent::Acked { delivery_tag });
        }
        self.broker.notify.notify_waiters();
        Ok(())
    }

    fn as_publisher(&self) -> &dyn Publisher {
        self
    }

    fn is_connected(&self) -> bool {
        self.broker.lock().generation == self.generation
    }

    async fn close(&self) {}
}

struct MemoryDeliveries {
    broker: MemoryBroker,
    queue: String,
    generation: u64,
}

impl MemoryDeliveries {
    fn try_take(&self) -> Option<Result<Delivery, TransportError>> {
        let mut state = self.broker.lock();
        if state.generation != self.generation {
            return Some(Err(TransportError::Closed));
        }
        let in_flight = state
            .unacked
            .values()
            .filter(|(queue, _)| *queue == self.queue)
            .count();
        if in_flight >= state.prefetch {
            return None;
        }
        let message = state.queues.get_mut(&self.queue)?.pop_front()?;
        let delivery_tag = state.next_tag;
        state.next_tag += 1;
        state
            .unacked
            .insert(delivery_tag, (self.queue.clone(), message.payload.clone()));
        state.events.push(BrokerEvent::Delivered {
            queue: self.queue.clone(),
            delivery_tag,
        });
        Some(Ok(Delivery {
            delivery_tag,
            payload: message.payload,
            redelivered: message.redelivered,
        }))
    }
}

#[async_trait]
impl Deliveries for MemoryDeliveries {
    async fn next(&mut self) -> Option<Result<Delivery, TransportError>> {
        loop {
            let notify = self.broker.notify.clone();
            let notified = notify.notified();
            if let Some(result) = self.try_take() {
                return Some(result);
            }
            notified.await;
        }
    }
}
