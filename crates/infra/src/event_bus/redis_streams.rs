//! Redis Streams-backed message broker (durable, at-least-once delivery).
//!
//! This implementation uses Redis Streams (XREADGROUP/XACK) to provide:
//! - **Durable delivery**: entries stay pending in the consumer group until acknowledged
//! - **At-least-once**: a nacked entry is claimed back and delivered again
//! - **Consumer groups**: all workers share one group; each entry goes to one consumer
//! - **Dead-letter handling**: after `max_delivery_attempts` the entry is copied to the
//!   DLQ stream and acknowledged on the main stream
//!
//! ## Architecture
//!
//! - **Stream Key**: `census:action:events` (one stream for every event type)
//! - **Consumer Group**: `action-processor`
//! - **Consumers**: one per worker (e.g. `worker-<uuid>-0`, `worker-<uuid>-1`)
//! - **Dead-Letter Queue**: `census:action:events:dlq`
//!
//! Each entry carries the JSON event in its `payload` field.
//!
//! ## Redelivery
//!
//! A nack is an `XCLAIM` of the entry back to the same consumer with zero idle time,
//! which bumps its delivery counter. `receive` reads this consumer's own pending
//! entries (`XREADGROUP ... 0`) before new ones (`XREADGROUP ... >`), and reports the
//! delivery counter from `XPENDING` as the attempt number.
//!
//! Each broker instance owns one multiplexed connection; `XREADGROUP BLOCK` holds that
//! connection, so give every worker its own broker.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamReadReply;
use tracing::{instrument, warn};

use census_action_events::{Delivery, DeliveryTag, MessageBroker};

use crate::config::BrokerConfig;

/// Field holding the event body in each stream entry.
const PAYLOAD_FIELD: &str = "payload";

/// How long one `receive` blocks waiting for new entries.
const DEFAULT_BLOCK: Duration = Duration::from_millis(1000);

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),
}

/// Settings for one consumer in the group.
#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    pub redis_url: String,
    pub stream_key: String,
    pub dlq_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub max_delivery_attempts: u32,
    pub block: Duration,
}

impl RedisStreamsConfig {
    /// Settings for the worker with index `worker` from the process configuration.
    pub fn for_worker(broker: &BrokerConfig, worker: usize) -> Self {
        Self {
            redis_url: broker.redis_url.clone(),
            stream_key: broker.stream_key.clone(),
            dlq_key: broker.dlq_key.clone(),
            consumer_group: broker.consumer_group.clone(),
            consumer_name: format!("{}-{worker}", broker.consumer_name),
            max_delivery_attempts: broker.max_delivery_attempts,
            block: DEFAULT_BLOCK,
        }
    }
}

pub struct RedisStreamsBroker {
    conn: MultiplexedConnection,
    config: RedisStreamsConfig,
}

impl RedisStreamsBroker {
    /// Connect and make sure the consumer group exists.
    pub async fn connect(config: RedisStreamsConfig) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let broker = Self { conn, config };
        broker.ensure_consumer_group().await?;
        Ok(broker)
    }

    /// Ensure the consumer group exists (idempotent).
    ///
    /// `MKSTREAM` creates the stream if needed; starting at `0` means a fresh group
    /// also sees entries published before it existed.
    async fn ensure_consumer_group(&self) -> Result<(), RedisStreamsError> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_key)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::ConsumerGroup(e.to_string())),
        }
    }

    /// Read one entry for this consumer starting after `start` (`0` = own pending
    /// entries, `>` = never delivered entries).
    async fn read_one(
        &self,
        start: &str,
        block: Option<Duration>,
    ) -> Result<Option<(String, Option<Vec<u8>>)>, RedisStreamsError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&self.config.stream_key).arg(start);

        // A BLOCK timeout replies nil.
        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        let entry = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next());

        Ok(entry.map(|entry| {
            let payload: Option<Vec<u8>> = entry.get(PAYLOAD_FIELD);
            (entry.id, payload)
        }))
    }

    /// Delivery counter of a pending entry.
    async fn delivery_count(&self, id: &str) -> Result<u32, RedisStreamsError> {
        let mut conn = self.conn.clone();
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.config.stream_key)
            .arg(&self.config.consumer_group)
            .arg(id)
            .arg(id)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {e}")))?;

        Ok(pending
            .first()
            .map(|(_, _, _, count)| u32::try_from(*count).unwrap_or(u32::MAX))
            .unwrap_or(1))
    }

    async fn xack(&self, id: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("XACK")
            .arg(&self.config.stream_key)
            .arg(&self.config.consumer_group)
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    /// Copy an entry to the dead-letter stream with its failure metadata.
    async fn send_to_dlq(&self, delivery: &Delivery) -> Result<(), RedisStreamsError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(&self.config.dlq_key)
            .arg("*")
            .arg("original_message_id")
            .arg(delivery.tag().as_str())
            .arg("retry_count")
            .arg(delivery.attempt())
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg(PAYLOAD_FIELD)
            .arg(delivery.body())
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {e}")))?;

        warn!(
            message_id = %delivery.tag(),
            retry_count = delivery.attempt(),
            "Message sent to dead-letter queue"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for RedisStreamsBroker {
    type Error = RedisStreamsError;

    #[instrument(skip(self, body), fields(stream_key = %self.config.stream_key), err)]
    async fn publish(&self, body: Vec<u8>) -> Result<(), Self::Error> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(&self.config.stream_key)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, Self::Error> {
        // Own pending entries (nacked earlier, or left by a crash) come first.
        let entry = match self.read_one("0", None).await? {
            Some(entry) => Some(entry),
            None => self.read_one(">", Some(self.config.block)).await?,
        };

        let Some((id, payload)) = entry else {
            return Ok(None);
        };

        let Some(body) = payload else {
            // Entry trimmed from the stream while pending; nothing left to process.
            warn!(message_id = %id, "pending entry has no payload, acknowledging");
            self.xack(&id).await?;
            return Ok(None);
        };

        let attempt = self.delivery_count(&id).await?;
        Ok(Some(Delivery::new(DeliveryTag::new(id), body, attempt)))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        self.xack(delivery.tag().as_str()).await
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        if delivery.attempt() >= self.config.max_delivery_attempts {
            self.send_to_dlq(delivery).await?;
            return self.xack(delivery.tag().as_str()).await;
        }

        // Claim back to ourselves with zero idle time: increments the delivery counter
        // and keeps the entry pending for the next `receive`.
        let mut conn = self.conn.clone();
        let _: redis::Value = redis::cmd("XCLAIM")
            .arg(&self.config.stream_key)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(0)
            .arg(delivery.tag().as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;
        Ok(())
    }
}
