//! Live subscriber registry and best-effort fan-out.
//!
//! A [`Broadcaster`] maps a key (topic name or device id) to the connections
//! currently registered for it. Mutations take the write lock; a broadcast
//! copies the current list under the read lock and delivers outside it, so a
//! subscriber that arrives mid-broadcast misses that message. Delivery is
//! at-most-once with no replay.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RelayError, Result};

/// Identity of one live connection
pub type ConnectionId = Uuid;

/// Anything that can take a serialized payload for one connection
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn id(&self) -> ConnectionId;

    async fn send(&self, payload: Arc<str>) -> Result<()>;
}

/// Messages a connection may have queued before further pushes are dropped
pub const OUTBOX_CAPACITY: usize = 256;

/// Subscriber backed by a bounded channel; the connection's writer task drains the receiver
pub struct ChannelSubscriber {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn channel() -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        Self::with_capacity(OUTBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Arc::new(Self {
                id: Uuid::new_v4(),
                tx,
            }),
            rx,
        )
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    fn id(&self) -> ConnectionId {
        self.id
    }

    /// Never waits on a slow reader: a full outbox drops the message
    async fn send(&self, payload: Arc<str>) -> Result<()> {
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => {
                RelayError::Delivery(format!("connection {} outbox full", self.id))
            }
            TrySendError::Closed(_) => {
                RelayError::Delivery(format!("connection {} closed", self.id))
            }
        })
    }
}

pub struct Broadcaster<K> {
    name: &'static str,
    subscribers: RwLock<HashMap<K, Vec<Arc<dyn Subscriber>>>>,
}

impl<K> Broadcaster<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, key: K, subscriber: Arc<dyn Subscriber>) {
        debug!(hub = self.name, key = %key, connection = %subscriber.id(), "Subscribe");
        let mut map = self.subscribers.write().await;
        map.entry(key).or_default().push(subscriber);
    }

    /// Remove by identity. Order of the remaining connections is not preserved.
    pub async fn unsubscribe(&self, key: &K, connection: ConnectionId) -> bool {
        let mut map = self.subscribers.write().await;
        let Some(list) = map.get_mut(key) else {
            return false;
        };

        let removed = match list.iter().position(|s| s.id() == connection) {
            Some(idx) => {
                list.swap_remove(idx);
                true
            }
            None => false,
        };

        if list.is_empty() {
            map.remove(key);
        }

        debug!(hub = self.name, key = %key, connection = %connection, removed, "Unsubscribe");
        removed
    }

    pub async fn subscriber_count(&self, key: &K) -> usize {
        self.subscribers.read().await.get(key).map_or(0, Vec::len)
    }

    async fn snapshot(&self, key: &K) -> Vec<Arc<dyn Subscriber>> {
        self.subscribers
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Serialize once and deliver to every connection registered right now.
    ///
    /// Failed deliveries are logged and skipped. Returns how many succeeded.
    pub async fn broadcast<T: Serialize + ?Sized>(&self, key: &K, payload: &T) -> Result<usize> {
        let targets = self.snapshot(key).await;
        if targets.is_empty() {
            return Ok(0);
        }

        let message: Arc<str> = serde_json::to_string(payload)?.into();
        let mut delivered = 0;
        for subscriber in targets {
            match subscriber.send(message.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    hub = self.name,
                    key = %key,
                    connection = %subscriber.id(),
                    "Delivery failed: {}",
                    e
                ),
            }
        }

        debug!(hub = self.name, key = %key, delivered, "Broadcast complete");
        Ok(delivered)
    }

    /// Single-recipient push; fails when nothing is registered under `key`
    pub async fn send<T: Serialize + ?Sized>(&self, key: &K, payload: &T) -> Result<usize> {
        match self.broadcast(key, payload).await? {
            0 => Err(RelayError::Delivery(format!("disconnected device {}", key))),
            n => Ok(n),
        }
    }
}
