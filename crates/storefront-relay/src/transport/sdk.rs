use async_trait::async_trait;
use nostr_sdk::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::{PublishAck, RelaySignal, RelaySubscription, RelayTransport, SubscriptionFeed};
use crate::events::{Filter as QueryFilter, RawEvent};
use crate::Error;

/// [`RelayTransport`] backed by a single-relay nostr-sdk [`Client`].
#[derive(Clone)]
pub struct NostrRelayTransport {
    url: String,
    client: Client,
}

impl NostrRelayTransport {
    pub async fn new(url: impl Into<String>) -> Result<Self, Error> {
        let url = url.into();
        let client = Client::default();
        client.add_relay(&url).await?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl RelayTransport for NostrRelayTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<(), Error> {
        self.client.connect().await;
        info!(relay = %self.url, "Connecting to relay");
        Ok(())
    }

    async fn subscribe(&self, filter: &QueryFilter) -> Result<RelaySubscription, Error> {
        let sdk_filter = filter.to_sdk_filter()?;
        // Listen before the REQ goes out so early events are not missed.
        let notifications = self.client.notifications();
        let output = self
            .client
            .subscribe(sdk_filter, None)
            .await
            .map_err(|err| Error::transport(&self.url, err))?;
        let subscription_id = output.val;

        let (feed, subscription) = RelaySubscription::channel(&self.url);
        tokio::spawn(forward_notifications(
            self.client.clone(),
            self.url.clone(),
            subscription_id,
            notifications,
            feed,
        ));

        Ok(subscription)
    }

    async fn publish(&self, event: &RawEvent) -> PublishAck {
        let event = match event.to_event() {
            Ok(event) => event,
            Err(err) => return PublishAck::Rejected(err.to_string()),
        };

        match self.client.send_event(&event).await {
            Ok(output) if !output.success.is_empty() => PublishAck::Accepted,
            Ok(output) => {
                let reason = output
                    .failed
                    .values()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| "no acknowledgement".to_string());
                PublishAck::Rejected(reason)
            }
            Err(err) => PublishAck::Rejected(err.to_string()),
        }
    }

    async fn close(&self) {
        let _ = self.client.disconnect().await;
        debug!(relay = %self.url, "Relay transport closed");
    }
}

async fn forward_notifications(
    client: Client,
    url: String,
    subscription_id: SubscriptionId,
    mut notifications: tokio::sync::broadcast::Receiver<RelayPoolNotification>,
    mut feed: SubscriptionFeed,
) {
    let wanted = subscription_id.to_string();

    loop {
        let signal = tokio::select! {
            _ = feed.cancelled() => break,
            received = notifications.recv() => match received {
                Ok(RelayPoolNotification::Event { subscription_id, event, .. })
                    if subscription_id.to_string() == wanted =>
                {
                    RelaySignal::Event(RawEvent::from_event(&event))
                }
                Ok(RelayPoolNotification::Message { message, .. }) => match message {
                    RelayMessage::EndOfStoredEvents(id) if id.to_string() == wanted => {
                        RelaySignal::EndOfStoredEvents
                    }
                    RelayMessage::Closed { subscription_id, message, .. }
                        if subscription_id.to_string() == wanted =>
                    {
                        RelaySignal::Closed(message.to_string())
                    }
                    _ => continue,
                },
                Ok(RelayPoolNotification::Shutdown) => RelaySignal::Closed("client shutdown".to_string()),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(relay = %url, skipped, "Notification receiver lagged");
                    continue;
                }
                Err(RecvError::Closed) => RelaySignal::Closed("notification channel closed".to_string()),
            },
        };

        let terminal = matches!(signal, RelaySignal::Closed(_));
        if !feed.send(signal).await || terminal {
            break;
        }
    }

    let _ = client.unsubscribe(&subscription_id).await;
    debug!(relay = %url, subscription = %wanted, "Subscription torn down");
}
