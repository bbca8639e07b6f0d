use crate::message::RelayMessage;
use dashmap::DashMap;
use log::*;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Unique identifier for a subscriber (server-generated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(uuid::Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Live subscribers, each with its own bounded queue.
///
/// A subscriber is live exactly as long as its entry is in the map. Broadcasting never
/// waits on a subscriber: a full or closed queue removes that subscriber and leaves the
/// others untouched.
pub struct SubscriberRegistry {
    subscribers: DashMap<SubscriberId, mpsc::Sender<RelayMessage>>,
    capacity: usize,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new subscriber. It only sees messages broadcast after this call.
    pub fn attach(&self) -> (SubscriberId, mpsc::Receiver<RelayMessage>) {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = SubscriberId::new();
        self.subscribers.insert(id, sender);
        debug!("Attached relay subscriber {id} ({} live)", self.len());
        (id, receiver)
    }

    /// Removes a subscriber. Returns `false` if it was already gone.
    pub fn detach(&self, id: &SubscriberId) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            debug!("Detached relay subscriber {id} ({} live)", self.len());
        }
        removed
    }

    /// Enqueues `message` for every live subscriber and returns how many accepted it.
    pub fn broadcast(&self, message: &RelayMessage) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Relay subscriber {} is not keeping up, dropping it",
                        entry.key()
                    );
                    dropped.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => dropped.push(*entry.key()),
            }
        }

        // Removal happens after iteration so no shard lock is held twice.
        for id in dropped {
            self.detach(&id);
        }

        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Removes every subscriber. Their receivers end once drained.
    pub fn clear(&self) {
        self.subscribers.clear();
    }
}
