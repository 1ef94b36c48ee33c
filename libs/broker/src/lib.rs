//! # Tapedeck Broker Boundary
//!
//! ## Purpose
//! Abstracts the message broker behind two narrow capabilities so the
//! record/play engines never see connection or discovery mechanics:
//!
//! - [`Publisher`]: publish a raw payload to a topic.
//! - [`Subscriber`]: open a [`Subscription`] on a (topic, channel) pair
//!   that yields [`Delivery`] items with explicit, deferred acknowledgment.
//!
//! ## Implementations
//! - [`MemoryBroker`]: in-process topics and channels; the fake the core
//!   engines are tested against, also usable for single-process bridging.
//! - [`SocketPublisher`] / [`SocketSubscriber`]: TCP clients speaking a
//!   u32-length-prefixed bincode wire protocol against broker nodes.
//!
//! ## Acknowledgment Contract
//! Transports never acknowledge on their own. A delivery is acked exactly
//! when the consumer calls [`Delivery::ack`], which the record engine does
//! only after the message body is written to its archive file. Dropping a
//! delivery without acking leaves redelivery policy to the broker.

pub mod error;
pub mod memory;
pub mod socket;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub use error::BrokerError;
pub use memory::MemoryBroker;
pub use socket::{SocketPublisher, SocketSubscriber};

/// A destination for raw message payloads, keyed by topic.
#[async_trait]
pub trait Publisher: Send + Sync + fmt::Debug {
    async fn publish(&self, topic: &str, body: Bytes) -> Result<(), BrokerError>;
}

/// A source of message deliveries, keyed by (topic, channel).
#[async_trait]
pub trait Subscriber: Send + Sync + fmt::Debug {
    async fn subscribe(&self, topic: &str, channel: &str)
        -> Result<Subscription, BrokerError>;
}

/// One message delivered by a subscription, pending acknowledgment.
pub struct Delivery {
    body: Bytes,
    ack: Option<Box<dyn FnOnce() + Send>>,
}

impl Delivery {
    pub fn new(body: Bytes, ack: impl FnOnce() + Send + 'static) -> Self {
        Self {
            body,
            ack: Some(Box::new(ack)),
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Acknowledge the delivery. Consumes the delivery: a message is acked
    /// at most once, and only after the consumer has secured it.
    pub fn ack(mut self) {
        if let Some(ack) = self.ack.take() {
            ack();
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.body.len())
            .field("acked", &self.ack.is_none())
            .finish()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if self.ack.is_some() {
            tracing::trace!(len = self.body.len(), "delivery dropped without ack");
        }
    }
}

/// A stream of deliveries for one (topic, channel) pair.
///
/// [`close`](Subscription::close) stops the transport from delivering
/// further messages; anything already buffered stays receivable, so a
/// consumer can drain what it was sent before shutting down. `recv`
/// returns `None` once the subscription is closed and drained.
pub struct Subscription {
    rx: mpsc::Receiver<Delivery>,
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Delivery>, closer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            closer: Some(Box::new(closer)),
        }
    }

    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Stop the flow of new deliveries. Idempotent.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.closer.is_none())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
