use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};

use super::{PublishAck, RelaySignal, RelaySubscription, RelayTransport};
use crate::events::{Filter, RawEvent};
use crate::Error;

#[derive(Debug, Clone)]
struct Step {
    at: Duration,
    signal: RelaySignal,
}

#[derive(Debug, Clone)]
enum PublishScript {
    Respond { after: Duration, ack: PublishAck },
    Hang,
}

/// Counters shared between a [`ScriptedRelay`] and the test observing it.
#[derive(Debug, Default)]
pub struct ScriptedStats {
    subscriptions: AtomicUsize,
    teardowns: AtomicUsize,
    filters: Mutex<Vec<Filter>>,
    published: Mutex<Vec<RawEvent>>,
}

impl ScriptedStats {
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Subscriptions the consumer closed or dropped.
    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn filters(&self) -> Vec<Filter> {
        self.filters.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn published(&self) -> Vec<RawEvent> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

/// In-process relay that replays a fixed timeline on every subscription.
///
/// Offsets are measured from the moment `subscribe` is called. After the
/// script runs out the subscription stays open and silent until the consumer
/// lets go of it.
#[derive(Debug, Clone)]
pub struct ScriptedRelay {
    url: String,
    steps: Vec<Step>,
    subscribe_error: Option<String>,
    publish: PublishScript,
    stats: Arc<ScriptedStats>,
}

impl ScriptedRelay {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            steps: Vec::new(),
            subscribe_error: None,
            publish: PublishScript::Respond {
                after: Duration::ZERO,
                ack: PublishAck::Accepted,
            },
            stats: Arc::new(ScriptedStats::default()),
        }
    }

    pub fn event_at(mut self, at_ms: u64, event: RawEvent) -> Self {
        self.push(at_ms, RelaySignal::Event(event));
        self
    }

    pub fn eose_at(mut self, at_ms: u64) -> Self {
        self.push(at_ms, RelaySignal::EndOfStoredEvents);
        self
    }

    pub fn closed_at(mut self, at_ms: u64, reason: impl Into<String>) -> Self {
        self.push(at_ms, RelaySignal::Closed(reason.into()));
        self
    }

    /// Every `subscribe` call fails as if the relay was unreachable.
    pub fn unreachable(mut self, reason: impl Into<String>) -> Self {
        self.subscribe_error = Some(reason.into());
        self
    }

    pub fn accepts_after(mut self, after_ms: u64) -> Self {
        self.publish = PublishScript::Respond {
            after: Duration::from_millis(after_ms),
            ack: PublishAck::Accepted,
        };
        self
    }

    pub fn rejects(mut self, reason: impl Into<String>) -> Self {
        self.publish = PublishScript::Respond {
            after: Duration::ZERO,
            ack: PublishAck::Rejected(reason.into()),
        };
        self
    }

    pub fn never_acks(mut self) -> Self {
        self.publish = PublishScript::Hang;
        self
    }

    pub fn stats(&self) -> Arc<ScriptedStats> {
        Arc::clone(&self.stats)
    }

    fn push(&mut self, at_ms: u64, signal: RelaySignal) {
        self.steps.push(Step {
            at: Duration::from_millis(at_ms),
            signal,
        });
        self.steps.sort_by_key(|step| step.at);
    }
}

#[async_trait]
impl RelayTransport for ScriptedRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn subscribe(&self, filter: &Filter) -> Result<RelaySubscription, Error> {
        if let Some(reason) = &self.subscribe_error {
            return Err(Error::transport(&self.url, reason));
        }

        self.stats.subscriptions.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut filters) = self.stats.filters.lock() {
            filters.push(filter.clone());
        }

        let (mut feed, subscription) = RelaySubscription::channel(&self.url);
        let steps = self.steps.clone();
        let stats = Arc::clone(&self.stats);
        let started = Instant::now();

        tokio::spawn(async move {
            for step in steps {
                tokio::select! {
                    _ = feed.cancelled() => break,
                    _ = sleep_until(started + step.at) => {
                        if !feed.send(step.signal).await {
                            break;
                        }
                    }
                }
            }
            feed.cancelled().await;
            stats.teardowns.fetch_add(1, Ordering::SeqCst);
        });

        Ok(subscription)
    }

    async fn publish(&self, event: &RawEvent) -> PublishAck {
        if let Ok(mut published) = self.stats.published.lock() {
            published.push(event.clone());
        }

        match &self.publish {
            PublishScript::Respond { after, ack } => {
                tokio::time::sleep(*after).await;
                ack.clone()
            }
            PublishScript::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) {}
}
