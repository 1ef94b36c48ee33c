//! In-process broker.
//!
//! Topics fan deliveries out to named channels: every channel attached to a
//! topic receives its own copy of each published message, and a channel has
//! at most one consumer. Messages published before any channel exists are
//! held in a per-topic backlog and handed to the first channel that
//! attaches.
//!
//! This is the in-memory fake the record and play engines are tested with;
//! it also works as a real broker when both sides run in one process.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::BrokerError;
use crate::{Delivery, Publisher, Subscriber, Subscription};

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    // Ack counters outlive their channel so tests can assert on them after
    // the subscription closed.
    acks: HashMap<(String, String), Arc<AtomicU64>>,
}

#[derive(Debug, Default)]
struct TopicState {
    backlog: VecDeque<Bytes>,
    channels: HashMap<String, ChannelState>,
}

#[derive(Debug)]
struct ChannelState {
    tx: mpsc::Sender<Delivery>,
    acked: Arc<AtomicU64>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// `capacity` bounds each channel's undelivered buffer; a full channel
    /// backpressures publishers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            capacity,
        }
    }

    /// Messages acknowledged on a (topic, channel) pair so far.
    pub fn acked(&self, topic: &str, channel: &str) -> u64 {
        let state = self.state.lock().expect("broker state poisoned");
        state
            .acks
            .get(&(topic.to_string(), channel.to_string()))
            .map(|count| count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn delivery(body: Bytes, acked: Arc<AtomicU64>) -> Delivery {
        Delivery::new(body, move || {
            acked.fetch_add(1, Ordering::SeqCst);
        })
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, topic: &str, body: Bytes) -> Result<(), BrokerError> {
        let outputs: Vec<(mpsc::Sender<Delivery>, Arc<AtomicU64>)> = {
            let mut state = self.state.lock().expect("broker state poisoned");
            let topic_state = state.topics.entry(topic.to_string()).or_default();

            if topic_state.channels.is_empty() {
                topic_state.backlog.push_back(body);
                return Ok(());
            }

            topic_state
                .channels
                .values()
                .map(|ch| (ch.tx.clone(), ch.acked.clone()))
                .collect()
        };

        for (tx, acked) in outputs {
            if tx.send(Self::delivery(body.clone(), acked)).await.is_err() {
                // Consumer went away between snapshot and send; its channel
                // entry is removed by the subscription closer.
                debug!(topic, "dropping delivery to detached channel");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber for MemoryBroker {
    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
    ) -> Result<Subscription, BrokerError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let acked = Arc::new(AtomicU64::new(0));

        let backlog = {
            let mut state = self.state.lock().expect("broker state poisoned");
            let topic_state = state.topics.entry(topic.to_string()).or_default();
            if topic_state.channels.contains_key(channel) {
                return Err(BrokerError::ChannelBusy {
                    topic: topic.to_string(),
                    channel: channel.to_string(),
                });
            }
            topic_state.channels.insert(
                channel.to_string(),
                ChannelState {
                    tx: tx.clone(),
                    acked: acked.clone(),
                },
            );
            let backlog = std::mem::take(&mut topic_state.backlog);
            state
                .acks
                .insert((topic.to_string(), channel.to_string()), acked.clone());
            backlog
        };

        if !backlog.is_empty() {
            debug!(
                topic,
                channel,
                queued = backlog.len(),
                "draining topic backlog to new channel"
            );
            let feeder_tx = tx;
            let feeder_acked = acked;
            tokio::spawn(async move {
                for body in backlog {
                    let delivery = Self::delivery(body, feeder_acked.clone());
                    if feeder_tx.send(delivery).await.is_err() {
                        break;
                    }
                }
            });
        }

        let state = self.state.clone();
        let close_topic = topic.to_string();
        let close_channel = channel.to_string();
        Ok(Subscription::new(rx, move || {
            let mut state = state.lock().expect("broker state poisoned");
            if let Some(topic_state) = state.topics.get_mut(&close_topic) {
                topic_state.channels.remove(&close_channel);
            }
        }))
    }
}
