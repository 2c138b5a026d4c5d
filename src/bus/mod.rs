//! In-process publish-subscribe fanout over per-topic `tokio::sync::broadcast` channels, mirroring
//! this codebase's existing `broadcast::channel::<JobEvent>` event stream and its
//! `BroadcastStream`-wrapped subscription side.
//!
//! `publish` to a topic with zero current subscribers is a no-op success, not a failure: fanout
//! to nobody is vacuously satisfied, the same way a logger with no attached sink still returns
//! `Ok`. `AlarmError::Bus` is reserved for a transport that can genuinely saturate (a future
//! out-of-process bus); the in-process broadcast channel's send side has no such failure mode.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::RwLock;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::errors::AlarmError;
use crate::models::AlarmEvent;

#[async_trait]
pub trait Bus: Send + Sync {
    /// Publishes `event` to `topic`. Zero subscribers is success. `Err(AlarmError::Bus(..))` is
    /// reserved for a transport that can genuinely fail to deliver.
    async fn publish(&self, topic: &str, event: AlarmEvent) -> Result<(), AlarmError>;

    /// An infinite, tail-follow stream of events published to `topic` from this point forward.
    fn subscribe(&self, topic: &str) -> Pin<Box<dyn Stream<Item = AlarmEvent> + Send>>;
}

pub struct BroadcastBus {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<AlarmEvent>>>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: RwLock::new(HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<AlarmEvent> {
        if let Some(tx) = self.topics.read().unwrap().get(topic) {
            return tx.clone();
        }
        let mut guard = self.topics.write().unwrap();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait]
impl Bus for BroadcastBus {
    async fn publish(&self, topic: &str, event: AlarmEvent) -> Result<(), AlarmError> {
        let sender = self.sender_for(topic);
        match sender.send(event) {
            Ok(_subscriber_count) => {}
            Err(broadcast::error::SendError(_)) => {
                tracing::debug!(topic, "publish had no subscribers");
            }
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Pin<Box<dyn Stream<Item = AlarmEvent> + Send>> {
        let rx = self.sender_for(topic).subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|result| async move {
            match result {
                Ok(event) => Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "bus subscriber lagged, events dropped");
                    None
                }
            }
        });
        Box::pin(stream)
    }
}
