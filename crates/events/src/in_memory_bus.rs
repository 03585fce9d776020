//! In-memory broker for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::bus::{Delivery, DeliveryTag, MessageBroker};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum InMemoryBrokerError {
    /// Internal lock poisoning.
    #[error("broker state lock poisoned")]
    Poisoned,

    /// Settlement of a delivery that is not in flight (double ack/nack).
    #[error("delivery {0} is not in flight")]
    UnknownDelivery(DeliveryTag),
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    body: Vec<u8>,
    attempt: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    ready: VecDeque<QueuedMessage>,
    in_flight: HashMap<DeliveryTag, QueuedMessage>,
    dead_letters: Vec<Vec<u8>>,
    acked: u64,
}

/// In-process queue with redelivery-on-nack and a dead-letter list.
///
/// - No IO
/// - FIFO; a nacked message goes to the back of the queue
/// - After `max_attempts` failed deliveries the message is dead-lettered
#[derive(Debug)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    next_tag: AtomicU64,
    max_attempts: u32,
    poll_interval: Duration,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            next_tag: AtomicU64::new(1),
            max_attempts: max_attempts.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Messages waiting to be delivered.
    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Messages delivered but not yet settled.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    pub fn acked_count(&self) -> u64 {
        self.state.lock().map(|s| s.acked).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .map(|s| s.dead_letters.clone())
            .unwrap_or_default()
    }

    /// True when every published message has been settled for good.
    pub fn is_drained(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.ready.is_empty() && s.in_flight.is_empty())
            .unwrap_or(false)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    type Error = InMemoryBrokerError;

    async fn publish(&self, body: Vec<u8>) -> Result<(), Self::Error> {
        let mut state = self.state.lock().map_err(|_| InMemoryBrokerError::Poisoned)?;
        state.ready.push_back(QueuedMessage { body, attempt: 0 });
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, Self::Error> {
        let next = {
            let mut state = self.state.lock().map_err(|_| InMemoryBrokerError::Poisoned)?;
            match state.ready.pop_front() {
                Some(mut msg) => {
                    msg.attempt += 1;
                    let tag = DeliveryTag::new(self.next_tag.fetch_add(1, Ordering::Relaxed).to_string());
                    let delivery = Delivery::new(tag.clone(), msg.body.clone(), msg.attempt);
                    state.in_flight.insert(tag, msg);
                    Some(delivery)
                }
                None => None,
            }
        };

        if next.is_none() {
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(next)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        let mut state = self.state.lock().map_err(|_| InMemoryBrokerError::Poisoned)?;
        state
            .in_flight
            .remove(delivery.tag())
            .ok_or_else(|| InMemoryBrokerError::UnknownDelivery(delivery.tag().clone()))?;
        state.acked += 1;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        let mut state = self.state.lock().map_err(|_| InMemoryBrokerError::Poisoned)?;
        let msg = state
            .in_flight
            .remove(delivery.tag())
            .ok_or_else(|| InMemoryBrokerError::UnknownDelivery(delivery.tag().clone()))?;

        if msg.attempt >= self.max_attempts {
            warn!(
                delivery_tag = %delivery.tag(),
                attempts = msg.attempt,
                "message sent to dead-letter queue"
            );
            state.dead_letters.push(msg.body);
        } else {
            state.ready.push_back(msg);
        }
        Ok(())
    }
}
