//! Message broker abstraction (mechanics only).
//!
//! The broker hands the consumer one [`Delivery`] at a time. The consumer settles
//! every delivery exactly once:
//!
//! - [`MessageBroker::ack`] after the unit of work has **committed**
//! - [`MessageBroker::nack`] on any failure before that point
//!
//! ## Delivery Guarantees
//!
//! - **At-least-once**: a nacked (or never settled) delivery is redelivered
//! - **No ordering guarantees** across distinct cases/questionnaires
//! - **Dead-lettering** is a broker policy: implementations move a message aside once
//!   it has been attempted too many times
//!
//! Consumers must therefore be idempotent. Redelivery of an already-committed message
//! (ack lost after commit) must converge to the same stored state.

use std::sync::Arc;

use async_trait::async_trait;

/// Opaque broker-assigned identifier of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(String);

impl DeliveryTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivery of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    tag: DeliveryTag,
    body: Vec<u8>,
    /// 1 on first delivery, incremented on each redelivery.
    attempt: u32,
}

impl Delivery {
    pub fn new(tag: DeliveryTag, body: Vec<u8>, attempt: u32) -> Self {
        Self { tag, body, attempt }
    }

    pub fn tag(&self) -> &DeliveryTag {
        &self.tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// Transport-agnostic broker with explicit settlement.
///
/// The trait requires `Send + Sync`; several workers may share one broker.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish a message body (used by producers, tests and tooling).
    async fn publish(&self, body: Vec<u8>) -> Result<(), Self::Error>;

    /// Wait briefly for the next delivery. `None` means nothing arrived in the
    /// broker's poll window; callers loop.
    async fn receive(&self) -> Result<Option<Delivery>, Self::Error>;

    /// Settle a delivery as processed. Call only after the store commit.
    async fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error>;

    /// Settle a delivery as failed; it becomes visible again (or is dead-lettered).
    async fn nack(&self, delivery: &Delivery) -> Result<(), Self::Error>;
}

#[async_trait]
impl<B> MessageBroker for Arc<B>
where
    B: MessageBroker + ?Sized,
{
    type Error = B::Error;

    async fn publish(&self, body: Vec<u8>) -> Result<(), Self::Error> {
        (**self).publish(body).await
    }

    async fn receive(&self) -> Result<Option<Delivery>, Self::Error> {
        (**self).receive().await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        (**self).ack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        (**self).nack(delivery).await
    }
}
