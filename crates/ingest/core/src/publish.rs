//! The block event channel handed to downstream consumers.

use derive_more::Display;
use hotchain_primitives::BlockEvent;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::{broadcast, mpsc};

/// What the channel does when the consumer falls behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishPolicy {
    /// Publishing waits for capacity, slowing ingestion down to the consumer.
    #[default]
    #[display("block")]
    Block,
    /// Publishing never waits; a lagging consumer loses the oldest events.
    #[display("drop-oldest")]
    DropOldest,
}

impl FromStr for PublishPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Self::Block),
            "drop-oldest" => Ok(Self::DropOldest),
            other => Err(format!("unknown publish policy `{other}`")),
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(policy: PublishPolicy, capacity: usize) -> (EventPublisher, EventSubscriber) {
    match policy {
        PublishPolicy::Block => {
            let (tx, rx) = mpsc::channel(capacity);
            (EventPublisher::Block(tx), EventSubscriber::Block(rx))
        }
        PublishPolicy::DropOldest => {
            let (tx, rx) = broadcast::channel(capacity);
            (EventPublisher::DropOldest(tx), EventSubscriber::DropOldest(rx))
        }
    }
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub enum EventPublisher {
    /// See [`PublishPolicy::Block`].
    Block(mpsc::Sender<BlockEvent>),
    /// See [`PublishPolicy::DropOldest`].
    DropOldest(broadcast::Sender<BlockEvent>),
}

impl EventPublisher {
    /// Publishes `event`. Events published without a live subscriber are discarded.
    pub async fn publish(&self, event: BlockEvent) {
        let delivered = match self {
            Self::Block(tx) => tx.send(event).await.is_ok(),
            Self::DropOldest(tx) => tx.send(event).is_ok(),
        };
        if !delivered {
            trace!(target: "writer", hash = %event.hash(), "No subscriber for block event");
        }
    }
}

/// Receiving half of the event channel.
#[derive(Debug)]
pub enum EventSubscriber {
    /// See [`PublishPolicy::Block`].
    Block(mpsc::Receiver<BlockEvent>),
    /// See [`PublishPolicy::DropOldest`].
    DropOldest(broadcast::Receiver<BlockEvent>),
}

impl EventSubscriber {
    /// Waits for the next event. Returns `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<BlockEvent> {
        match self {
            Self::Block(rx) => rx.recv().await,
            Self::DropOldest(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(dropped)) => {
                        warn!(target: "writer", dropped, "Subscriber lagged, events dropped");
                        metrics::counter!(crate::Metrics::PUBLISH_DROPPED).increment(dropped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }
}
