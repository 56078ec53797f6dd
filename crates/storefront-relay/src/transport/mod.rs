//! Per-relay transport seam.
//!
//! A [`RelayTransport`] is one connection to one relay endpoint. Subscriptions
//! are channels: the transport pushes [`RelaySignal`]s into a
//! [`RelaySubscription`] and stops producing as soon as the subscription is
//! closed or dropped.

mod sdk;
mod scripted;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::events::{Filter, RawEvent};
use crate::Error;

pub use sdk::NostrRelayTransport;
pub use scripted::{ScriptedRelay, ScriptedStats};

const SIGNAL_BUFFER: usize = 256;

/// What a relay can say about an open subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelaySignal {
    Event(RawEvent),
    EndOfStoredEvents,
    Closed(String),
}

/// Outcome of publishing one event to one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishAck {
    Accepted,
    Rejected(String),
}

impl PublishAck {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PublishAck::Accepted)
    }
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    fn url(&self) -> &str;

    async fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn subscribe(&self, filter: &Filter) -> Result<RelaySubscription, Error>;

    async fn publish(&self, event: &RawEvent) -> PublishAck;

    async fn close(&self);
}

/// Consumer half of a subscription.
///
/// Dropping it cancels the producer.
#[derive(Debug)]
pub struct RelaySubscription {
    relay_url: String,
    signals: mpsc::Receiver<RelaySignal>,
    cancel: Option<oneshot::Sender<()>>,
}

/// Producer half of a subscription, held by the transport.
#[derive(Debug)]
pub struct SubscriptionFeed {
    signals: mpsc::Sender<RelaySignal>,
    cancelled: oneshot::Receiver<()>,
    cancel_seen: bool,
}

impl RelaySubscription {
    pub fn channel(relay_url: impl Into<String>) -> (SubscriptionFeed, RelaySubscription) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let feed = SubscriptionFeed {
            signals: signal_tx,
            cancelled: cancel_rx,
            cancel_seen: false,
        };
        let subscription = RelaySubscription {
            relay_url: relay_url.into(),
            signals: signal_rx,
            cancel: Some(cancel_tx),
        };
        (feed, subscription)
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Next signal, or `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<RelaySignal> {
        self.signals.recv().await
    }

    pub fn close(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl SubscriptionFeed {
    /// Returns false when the consumer is gone.
    pub async fn send(&self, signal: RelaySignal) -> bool {
        self.signals.send(signal).await.is_ok()
    }

    /// Resolves once the consumer closed or dropped the subscription.
    pub async fn cancelled(&mut self) {
        if !self.cancel_seen {
            let _ = (&mut self.cancelled).await;
            self.cancel_seen = true;
        }
    }
}
