//! Multi-relay query fan-out.
//!
//! A logical query opens one subscription per relay and runs as a single
//! [`AggregationSession`]. The session ends through exactly one of three
//! triggers (every relay ended, the first match arrived, or the deadline
//! passed); [`FinalizeGuard`] makes sure only the first one resolves the
//! query and tears the subscriptions down.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::events::{Filter, RawEvent};
use crate::transport::{PublishAck, RelaySignal, RelaySubscription, RelayTransport};
use crate::Error;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryMode {
    /// Wait for every relay to finish (or the deadline).
    #[default]
    AllEose,
    /// Resolve on the first event from any relay.
    FirstMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTrigger {
    AllEnded,
    FirstMatch,
    Timeout,
}

/// One-shot latch shared by every completion trigger of a session.
#[derive(Debug, Default)]
pub struct FinalizeGuard(AtomicBool);

impl FinalizeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for exactly one caller.
    pub fn try_finalize(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_finalized(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type SignalStream = BoxStream<'static, (usize, RelaySignal)>;

fn signal_stream(index: usize, subscription: RelaySubscription) -> SignalStream {
    stream::unfold(subscription, move |mut subscription| async move {
        subscription
            .recv()
            .await
            .map(|signal| ((index, signal), subscription))
    })
    .boxed()
}

/// State of one in-flight query.
pub struct AggregationSession {
    mode: QueryMode,
    relays: Vec<String>,
    ended: Vec<bool>,
    events: Vec<RawEvent>,
    signals: Option<SelectAll<SignalStream>>,
    guard: FinalizeGuard,
}

impl AggregationSession {
    /// `None` entries are relays whose subscription could not be opened;
    /// they count as already ended.
    pub fn new(mode: QueryMode, subscriptions: Vec<(String, Option<RelaySubscription>)>) -> Self {
        let mut relays = Vec::with_capacity(subscriptions.len());
        let mut ended = Vec::with_capacity(subscriptions.len());
        let mut signals = SelectAll::new();

        for (index, (url, subscription)) in subscriptions.into_iter().enumerate() {
            relays.push(url);
            match subscription {
                Some(subscription) => {
                    ended.push(false);
                    signals.push(signal_stream(index, subscription));
                }
                None => ended.push(true),
            }
        }

        Self {
            mode,
            relays,
            ended,
            events: Vec::new(),
            signals: Some(signals),
            guard: FinalizeGuard::new(),
        }
    }

    pub fn all_ended(&self) -> bool {
        self.ended.iter().all(|ended| *ended)
    }

    pub fn is_finalized(&self) -> bool {
        self.guard.is_finalized()
    }

    pub fn collected(&self) -> usize {
        self.events.len()
    }

    /// Next signal from any relay; `None` once every producer is gone.
    pub async fn next_signal(&mut self) -> Option<(usize, RelaySignal)> {
        match self.signals.as_mut() {
            Some(signals) if !signals.is_empty() => signals.next().await,
            _ => None,
        }
    }

    /// Fold one signal into the session. Returns the trigger that should
    /// finalize it, if any.
    pub fn record(&mut self, index: usize, signal: RelaySignal) -> Option<FinalizeTrigger> {
        if self.is_finalized() || index >= self.ended.len() {
            return None;
        }

        match signal {
            RelaySignal::Event(event) => {
                debug!(relay = %self.relays[index], event_id = %event.id, "Received event");
                self.events.push(event);
                if self.mode == QueryMode::FirstMatch {
                    return Some(FinalizeTrigger::FirstMatch);
                }
            }
            RelaySignal::EndOfStoredEvents => {
                debug!(relay = %self.relays[index], "End of stored events");
                self.ended[index] = true;
            }
            RelaySignal::Closed(reason) => {
                if !self.ended[index] {
                    debug!(relay = %self.relays[index], reason = %reason, "Subscription closed before EOSE");
                }
                self.ended[index] = true;
            }
        }

        self.all_ended().then_some(FinalizeTrigger::AllEnded)
    }

    /// Resolve the session. Only the first call returns the result and
    /// drops the subscriptions; later calls are no-ops returning `None`.
    pub fn finalize(&mut self, trigger: FinalizeTrigger) -> Option<Vec<RawEvent>> {
        if !self.guard.try_finalize() {
            return None;
        }

        self.signals.take();
        let events = dedup_and_sort(std::mem::take(&mut self.events));
        info!(
            ?trigger,
            relays = self.relays.len(),
            events = events.len(),
            "Query finalized"
        );
        Some(events)
    }
}

/// Drop repeated ids (first occurrence wins), newest first.
pub fn dedup_and_sort(events: Vec<RawEvent>) -> Vec<RawEvent> {
    let mut seen = HashSet::with_capacity(events.len());
    let mut unique: Vec<RawEvent> = events
        .into_iter()
        .filter(|event| seen.insert(event.id.clone()))
        .collect();
    unique.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    unique
}

/// Run one logical query against `endpoints`. Never fails; unreachable or
/// silent relays simply contribute nothing.
pub async fn query(
    endpoints: &[Arc<dyn RelayTransport>],
    filter: &Filter,
    limit: Duration,
    mode: QueryMode,
) -> Vec<RawEvent> {
    let deadline = Instant::now() + limit;

    let opened = join_all(endpoints.iter().map(|endpoint| async move {
        let url = endpoint.url().to_string();
        match timeout_at(deadline, endpoint.subscribe(filter)).await {
            Ok(Ok(subscription)) => (url, Some(subscription)),
            Ok(Err(err)) => {
                warn!(relay = %url, error = %err, "Failed to open subscription");
                (url, None)
            }
            Err(_) => {
                warn!(relay = %url, "Timed out opening subscription");
                (url, None)
            }
        }
    }))
    .await;

    let mut session = AggregationSession::new(mode, opened);
    if session.all_ended() {
        return session
            .finalize(FinalizeTrigger::AllEnded)
            .unwrap_or_default();
    }

    let sleep = sleep_until(deadline);
    tokio::pin!(sleep);

    let trigger = loop {
        tokio::select! {
            _ = &mut sleep => {
                debug!(collected = session.collected(), "Query deadline reached");
                break FinalizeTrigger::Timeout;
            }
            signal = session.next_signal() => match signal {
                Some((index, signal)) => {
                    if let Some(trigger) = session.record(index, signal) {
                        break trigger;
                    }
                }
                None => break FinalizeTrigger::AllEnded,
            },
        }
    };

    session.finalize(trigger).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSummary {
    pub acknowledged: usize,
    pub failed: usize,
}

/// Send `event` to every endpoint. Partial failure is success; zero
/// acknowledgements is [`Error::PublishFailed`].
pub async fn publish(
    endpoints: &[Arc<dyn RelayTransport>],
    event: &RawEvent,
    limit: Duration,
) -> Result<PublishSummary, Error> {
    let acks = join_all(endpoints.iter().map(|endpoint| async move {
        let ack = match timeout(limit, endpoint.publish(event)).await {
            Ok(ack) => ack,
            Err(_) => PublishAck::Rejected("timed out waiting for OK".to_string()),
        };
        if let PublishAck::Rejected(reason) = &ack {
            warn!(relay = %endpoint.url(), event_id = %event.id, reason = %reason, "Relay rejected event");
        }
        ack
    }))
    .await;

    let acknowledged = acks.iter().filter(|ack| ack.is_accepted()).count();
    let failed = acks.len() - acknowledged;

    if acknowledged == 0 {
        return Err(Error::PublishFailed { failed });
    }

    info!(event_id = %event.id, acknowledged, failed, "Published event");
    Ok(PublishSummary {
        acknowledged,
        failed,
    })
}

/// Long-lived merged subscription. Stays open past EOSE until closed or
/// dropped; events already seen from another relay are skipped.
pub struct AggregatedStream {
    relays: Vec<String>,
    signals: Option<SelectAll<SignalStream>>,
    seen: HashSet<String>,
}

impl AggregatedStream {
    pub async fn open(endpoints: &[Arc<dyn RelayTransport>], filters: &[Filter]) -> Self {
        let pairs: Vec<_> = endpoints
            .iter()
            .flat_map(|endpoint| filters.iter().map(move |filter| (endpoint, filter)))
            .collect();

        let opened = join_all(pairs.into_iter().map(|(endpoint, filter)| async move {
            match endpoint.subscribe(filter).await {
                Ok(subscription) => Some(subscription),
                Err(err) => {
                    warn!(relay = %endpoint.url(), error = %err, "Failed to open live subscription");
                    None
                }
            }
        }))
        .await;

        let mut relays = Vec::new();
        let mut signals = SelectAll::new();
        for subscription in opened.into_iter().flatten() {
            relays.push(subscription.relay_url().to_string());
            signals.push(signal_stream(relays.len() - 1, subscription));
        }
        info!(subscriptions = relays.len(), "Live subscription opened");

        Self {
            relays,
            signals: Some(signals),
            seen: HashSet::new(),
        }
    }

    /// Next unseen event, or `None` once closed or every relay is gone.
    pub async fn next_event(&mut self) -> Option<RawEvent> {
        loop {
            let signals = match self.signals.as_mut() {
                Some(signals) if !signals.is_empty() => signals,
                _ => return None,
            };

            match signals.next().await? {
                (_, RelaySignal::Event(event)) => {
                    if self.seen.insert(event.id.clone()) {
                        return Some(event);
                    }
                }
                (index, RelaySignal::EndOfStoredEvents) => {
                    debug!(relay = %self.relays[index], "EOSE on live subscription, still listening");
                }
                (index, RelaySignal::Closed(reason)) => {
                    debug!(relay = %self.relays[index], reason = %reason, "Live subscription closed by relay");
                }
            }
        }
    }

    pub fn close(&mut self) {
        if self.signals.take().is_some() {
            debug!(subscriptions = self.relays.len(), "Live subscription closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.signals.is_none()
    }
}

/// Transports keyed by URL, built once by the composition root.
pub struct RelayPool {
    relays: HashMap<String, Arc<dyn RelayTransport>>,
    closed: AtomicBool,
}

impl RelayPool {
    pub fn new(transports: Vec<Arc<dyn RelayTransport>>) -> Self {
        let relays = transports
            .into_iter()
            .map(|transport| (transport.url().to_string(), transport))
            .collect();
        Self {
            relays,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn open(&self) {
        for (url, relay) in &self.relays {
            if let Err(err) = relay.connect().await {
                warn!(relay = %url, error = %err, "Failed to connect relay");
            }
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for relay in self.relays.values() {
            relay.close().await;
        }
        info!(relays = self.relays.len(), "Relay pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Transports for `urls`, deduplicated, in the order given.
    pub fn endpoints(&self, urls: &[String]) -> Vec<Arc<dyn RelayTransport>> {
        let mut seen = HashSet::new();
        urls.iter()
            .filter(|url| seen.insert(url.as_str()))
            .filter_map(|url| match self.relays.get(url) {
                Some(relay) => Some(Arc::clone(relay)),
                None => {
                    warn!(relay = %url, "Relay not in pool");
                    None
                }
            })
            .collect()
    }
}

/// Query/publish front-end over a [`RelayPool`].
#[derive(Clone)]
pub struct SubscriptionAggregator {
    pool: Arc<RelayPool>,
    query_timeout: Duration,
    publish_timeout: Duration,
}

impl SubscriptionAggregator {
    pub fn new(pool: Arc<RelayPool>) -> Self {
        Self {
            pool,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, limit: Duration) -> Self {
        self.query_timeout = limit;
        self
    }

    pub fn with_publish_timeout(mut self, limit: Duration) -> Self {
        self.publish_timeout = limit;
        self
    }

    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub async fn query(&self, relays: &[String], filter: &Filter, mode: QueryMode) -> Vec<RawEvent> {
        self.query_with_timeout(relays, filter, self.query_timeout, mode)
            .await
    }

    pub async fn query_with_timeout(
        &self,
        relays: &[String],
        filter: &Filter,
        limit: Duration,
        mode: QueryMode,
    ) -> Vec<RawEvent> {
        if self.pool.is_closed() {
            warn!("Query on closed relay pool");
            return Vec::new();
        }
        let endpoints = self.pool.endpoints(relays);
        query(&endpoints, filter, limit, mode).await
    }

    pub async fn publish(&self, relays: &[String], event: &RawEvent) -> Result<PublishSummary, Error> {
        let endpoints = self.pool.endpoints(relays);
        publish(&endpoints, event, self.publish_timeout).await
    }

    pub async fn stream(&self, relays: &[String], filters: &[Filter]) -> AggregatedStream {
        let endpoints = self.pool.endpoints(relays);
        AggregatedStream::open(&endpoints, filters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::KIND_APP;

    fn event(id: &str, created_at: u64) -> RawEvent {
        RawEvent {
            id: id.to_string(),
            pubkey: "pk".to_string(),
            created_at,
            kind: KIND_APP,
            tags: vec![],
            content: String::new(),
            sig: None,
        }
    }

    fn open(url: &str) -> (crate::transport::SubscriptionFeed, (String, Option<RelaySubscription>)) {
        let (feed, subscription) = RelaySubscription::channel(url);
        (feed, (url.to_string(), Some(subscription)))
    }

    #[test]
    fn guard_admits_one_caller() {
        let guard = FinalizeGuard::new();
        assert!(!guard.is_finalized());
        assert!(guard.try_finalize());
        assert!(!guard.try_finalize());
        assert!(guard.is_finalized());
    }

    #[test]
    fn dedup_keeps_first_and_sorts_newest_first() {
        let mut first = event("x", 10);
        first.content = "first".into();
        let mut dup = event("x", 10);
        dup.content = "dup".into();

        let result = dedup_and_sort(vec![event("old", 5), first, event("new", 20), dup]);
        let ids: Vec<_> = result.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "x", "old"]);
        assert_eq!(result[1].content, "first");
    }

    #[tokio::test]
    async fn racing_triggers_finalize_once() {
        let (_feed_a, a) = open("wss://a");
        let (_feed_b, b) = open("wss://b");
        let mut session = AggregationSession::new(QueryMode::AllEose, vec![a, b]);

        assert_eq!(session.record(0, RelaySignal::Event(event("x", 1))), None);
        assert_eq!(session.record(0, RelaySignal::EndOfStoredEvents), None);
        let trigger = session.record(1, RelaySignal::Closed("gone".into()));
        assert_eq!(trigger, Some(FinalizeTrigger::AllEnded));

        let mut resolutions = 0;
        for trigger in [
            FinalizeTrigger::AllEnded,
            FinalizeTrigger::Timeout,
            FinalizeTrigger::AllEnded,
        ] {
            if let Some(events) = session.finalize(trigger) {
                resolutions += 1;
                assert_eq!(events.len(), 1);
            }
        }
        assert_eq!(resolutions, 1);

        // late signals after finalize are ignored
        assert_eq!(session.record(1, RelaySignal::Event(event("late", 2))), None);
        assert_eq!(session.collected(), 0);
    }

    #[tokio::test]
    async fn finalize_tears_down_subscriptions() {
        let (mut feed, a) = open("wss://a");
        let mut session = AggregationSession::new(QueryMode::FirstMatch, vec![a]);
        assert!(session.finalize(FinalizeTrigger::Timeout).is_some());
        feed.cancelled().await;
        assert!(!feed.send(RelaySignal::EndOfStoredEvents).await);
    }

    #[test]
    fn failed_subscriptions_count_as_ended() {
        let session = AggregationSession::new(
            QueryMode::AllEose,
            vec![("wss://a".to_string(), None), ("wss://b".to_string(), None)],
        );
        assert!(session.all_ended());
    }

    #[test]
    fn first_match_triggers_on_first_event() {
        let (_feed, a) = open("wss://a");
        let mut session = AggregationSession::new(QueryMode::FirstMatch, vec![a]);
        assert_eq!(
            session.record(0, RelaySignal::Event(event("x", 1))),
            Some(FinalizeTrigger::FirstMatch)
        );
    }
}
