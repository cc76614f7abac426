use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, RwLock},
    task::{Context, Poll},
};

use futures::Stream;
use serde_json::json;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::{kinds, BroadcastMessage};
use crate::metrics::Metrics;

pub const DEFAULT_CAPACITY: usize = 10;

type Subscribers = Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>;

/// Bounded fan-out to SSE subscribers.
///
/// Each subscriber owns a channel of `capacity` serialized messages. Sends
/// never wait: a full buffer drops the message for that subscriber only.
#[derive(Clone)]
pub struct EventHub {
    subscribers: Subscribers,
    capacity: usize,
    metrics: Metrics,
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

impl EventHub {
    pub fn new(capacity: usize, metrics: Metrics) -> Self {
        Self { subscribers: Arc::new(RwLock::new(HashMap::new())), capacity: capacity.max(1), metrics }
    }

    /// Registers a subscriber. The synthetic `connected` message is yielded
    /// first and does not take a slot in the subscriber's buffer.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let greeting = serde_json::to_string(&BroadcastMessage::new(kinds::CONNECTED, json!({}))).ok();

        let id = Uuid::new_v4();
        {
            let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            subs.insert(id, tx);
            tracing::debug!("SSE subscriber {} connected ({} active)", id, subs.len());
        }
        Subscription { id, greeting, rx, subscribers: self.subscribers.clone() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn broadcast(&self, message: &BroadcastMessage) -> Delivery {
        match serde_json::to_string(message) {
            Ok(text) => self.broadcast_raw(text),
            Err(e) => {
                tracing::warn!("Failed to serialize broadcast message {}: {}", message.kind, e);
                Delivery::default()
            }
        }
    }

    /// Sends an already serialized message to every subscriber without blocking.
    pub fn broadcast_raw(&self, text: String) -> Delivery {
        let mut delivery = Delivery::default();
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        for (id, tx) in subs.iter() {
            match tx.try_send(text.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("Subscriber {} buffer full, dropping message", id);
                    delivery.dropped += 1;
                }
                // Receiver is going away; its Subscription removes the entry on drop
                Err(TrySendError::Closed(_)) => {}
            }
        }
        drop(subs);
        self.metrics.add_events(delivery.delivered as u64, delivery.dropped as u64);
        delivery
    }
}

/// A registered SSE client. Yields serialized messages and unregisters itself on drop.
pub struct Subscription {
    id: Uuid,
    greeting: Option<String>,
    rx: mpsc::Receiver<String>,
    subscribers: Subscribers,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<String> {
        if let Some(text) = self.greeting.take() {
            return Some(text);
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        if let Some(text) = self.greeting.take() {
            return Some(text);
        }
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(text) = self.greeting.take() {
            return Poll::Ready(Some(text));
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.remove(&self.id);
        self.rx.close();
        tracing::debug!("SSE subscriber {} disconnected ({} active)", self.id, subs.len());
    }
}
