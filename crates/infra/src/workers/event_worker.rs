use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use census_action_events::{Delivery, MessageBroker, ResponseManagementEvent};

use crate::dispatcher::{DispatchOutcome, EventDispatcher};
use crate::store::ActionStore;

/// Pause after a broker error before polling again.
const BROKER_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// How one delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Committed, then acknowledged.
    Acked(DispatchOutcome),
    /// Nothing committed; left to the broker's redelivery/dead-letter policy.
    Nacked,
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// The worker finishes the delivery it is processing before it exits.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Consumer loop: receive, decode, dispatch, then ack or nack.
///
/// - Ack only after the dispatcher has committed
/// - Nack on any decode or dispatch failure (nothing was persisted)
/// - One delivery at a time; run several workers for concurrency
pub struct EventWorker<B, S> {
    name: String,
    broker: B,
    dispatcher: Arc<EventDispatcher<S>>,
}

impl<B, S> EventWorker<B, S>
where
    B: MessageBroker + 'static,
    S: ActionStore + 'static,
{
    pub fn new(name: impl Into<String>, broker: B, dispatcher: Arc<EventDispatcher<S>>) -> Self {
        Self {
            name: name.into(),
            broker,
            dispatcher,
        }
    }

    /// Receive and settle at most one delivery. `Ok(None)` when nothing arrived.
    pub async fn process_next(&self) -> Result<Option<Settlement>, B::Error> {
        let Some(delivery) = self.broker.receive().await? else {
            return Ok(None);
        };
        self.settle(&delivery).await.map(Some)
    }

    async fn settle(&self, delivery: &Delivery) -> Result<Settlement, B::Error> {
        let event = match ResponseManagementEvent::from_slice(delivery.body()) {
            Ok(event) => event,
            Err(err) => {
                error!(
                    worker = %self.name,
                    delivery_tag = %delivery.tag(),
                    attempt = delivery.attempt(),
                    error = %err,
                    "failed to decode message"
                );
                self.broker.nack(delivery).await?;
                return Ok(Settlement::Nacked);
            }
        };

        match self.dispatcher.dispatch(&event).await {
            Ok(outcome) => {
                self.broker.ack(delivery).await?;
                Ok(Settlement::Acked(outcome))
            }
            Err(err) => {
                let summary = if err.is_transient() {
                    "infrastructure failure processing message, leaving for redelivery"
                } else {
                    "failed to process message"
                };
                error!(
                    worker = %self.name,
                    delivery_tag = %delivery.tag(),
                    attempt = delivery.attempt(),
                    event_type = %event.event.event_type,
                    transient = err.is_transient(),
                    error = %err,
                    "{summary}"
                );
                self.broker.nack(delivery).await?;
                Ok(Settlement::Nacked)
            }
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(worker = %self.name, "event worker started");

        while !*shutdown.borrow() && shutdown.has_changed().is_ok() {
            if let Err(err) = self.process_next().await {
                warn!(worker = %self.name, error = %err, "broker error, backing off");
                tokio::time::sleep(BROKER_ERROR_BACKOFF).await;
            }
        }

        info!(worker = %self.name, "event worker stopped");
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}
