//! Zap receipt correlation.
//!
//! A zap request is paid out-of-band; the only confirmation is a kind 9735
//! receipt that some relay eventually carries. [`PayoutCorrelator`] keeps a
//! live subscription for receipts addressed to the recipient and hands the
//! first one that matches the original request to a callback.
//!
//! Matching tries four strategies in a fixed order, see [`MatchStrategy`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::aggregator::SubscriptionAggregator;
use crate::config::DEFAULT_RECEIPT_WINDOW;
use crate::events::{unix_timestamp, Filter, RawEvent, KIND_ZAP_RECEIPT};
use crate::parsers::{embedded_request_id, parse_zap, Zap};

/// Optional identifiers that let a receipt be matched when its embedded
/// request is missing or rewritten by the wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentHints {
    /// BOLT11 invoice that was handed to the payer.
    pub invoice: Option<String>,
    /// `a` tag coordinate of the zapped app.
    pub app_address: Option<String>,
    /// `e` tag id of the zapped event.
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStrategy {
    /// Embedded zap request id equals the original request id.
    EmbeddedRequest,
    /// `bolt11` tag equals the invoice, ignoring case.
    Invoice,
    /// `a` tag equals the app address.
    Address,
    /// `e` tag equals the event id.
    EventReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationState {
    Pending,
    Matched(MatchStrategy),
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    pub recipient: String,
    pub request_id: String,
    pub hints: PaymentHints,
}

impl CorrelationContext {
    pub fn new(recipient: impl Into<String>, request_id: impl Into<String>, hints: PaymentHints) -> Self {
        Self {
            recipient: recipient.into(),
            request_id: request_id.into(),
            hints,
        }
    }

    /// First strategy under which `receipt` belongs to this request.
    pub fn evaluate(&self, receipt: &RawEvent) -> Option<MatchStrategy> {
        if embedded_request_id(receipt).as_deref() == Some(self.request_id.as_str()) {
            return Some(MatchStrategy::EmbeddedRequest);
        }

        if let (Some(invoice), Some(bolt11)) = (&self.hints.invoice, receipt.tag_value("bolt11")) {
            if invoice.eq_ignore_ascii_case(bolt11) {
                return Some(MatchStrategy::Invoice);
            }
        }

        if let Some(address) = &self.hints.app_address {
            if receipt.has_tag("a", address) {
                return Some(MatchStrategy::Address);
            }
        }

        if let Some(event_id) = &self.hints.event_id {
            if receipt.has_tag("e", event_id) {
                return Some(MatchStrategy::EventReference);
            }
        }

        None
    }
}

pub struct PayoutCorrelator {
    aggregator: SubscriptionAggregator,
    relays: Vec<String>,
    window: Duration,
}

impl PayoutCorrelator {
    pub fn new(aggregator: SubscriptionAggregator, relays: Vec<String>) -> Self {
        Self {
            aggregator,
            relays,
            window: DEFAULT_RECEIPT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Receipt filters for `recipient`: one on `#p` and one on `#P`, both
    /// starting `window` ago.
    pub fn filters(&self, recipient: &str) -> Vec<Filter> {
        let since = unix_timestamp().saturating_sub(self.window.as_secs());
        ['p', 'P']
            .into_iter()
            .map(|letter| {
                Filter::new()
                    .kind(KIND_ZAP_RECEIPT)
                    .tag(letter, [recipient])
                    .since(since)
            })
            .collect()
    }

    /// Watch for the receipt of `context.request_id`.
    ///
    /// `on_match` runs at most once. The subscription lives until the
    /// returned handle is disposed or dropped; there is no internal timeout.
    pub fn correlate<F>(&self, context: CorrelationContext, on_match: F) -> CorrelationHandle
    where
        F: FnOnce(Zap) + Send + 'static,
    {
        let state = Arc::new(Mutex::new(CorrelationState::Pending));
        let filters = self.filters(&context.recipient);
        let aggregator = self.aggregator.clone();
        let relays = self.relays.clone();
        let task_state = Arc::clone(&state);

        info!(
            recipient = %context.recipient,
            request_id = %context.request_id,
            relays = relays.len(),
            "Waiting for zap receipt"
        );

        let task = tokio::spawn(async move {
            let mut stream = aggregator.stream(&relays, &filters).await;
            let mut on_match = Some(on_match);

            while let Some(receipt) = stream.next_event().await {
                let Some(strategy) = context.evaluate(&receipt) else {
                    debug!(receipt_id = %receipt.id, "Zap receipt does not match request");
                    continue;
                };

                let fire = match task_state.lock() {
                    Ok(mut state) if *state == CorrelationState::Pending => {
                        *state = CorrelationState::Matched(strategy);
                        true
                    }
                    _ => false,
                };

                if let (true, Some(callback)) = (fire, on_match.take()) {
                    info!(
                        receipt_id = %receipt.id,
                        request_id = %context.request_id,
                        strategy = ?strategy,
                        "Zap receipt matched"
                    );
                    callback(parse_zap(&receipt));
                }
            }
        });

        CorrelationHandle { state, task }
    }
}

/// Owner of a running correlation. Dropping it disposes.
#[derive(Debug)]
pub struct CorrelationHandle {
    state: Arc<Mutex<CorrelationState>>,
    task: JoinHandle<()>,
}

impl CorrelationHandle {
    pub fn state(&self) -> CorrelationState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(CorrelationState::Disposed)
    }

    /// Stop listening. Safe to call any number of times.
    pub fn dispose(&self) {
        if let Ok(mut state) = self.state.lock() {
            if *state != CorrelationState::Disposed {
                debug!(previous = ?*state, "Disposing zap receipt correlation");
                *state = CorrelationState::Disposed;
            }
        }
        self.task.abort();
    }
}

impl Drop for CorrelationHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST_ID: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    fn receipt(tags: Vec<(&str, String)>) -> RawEvent {
        RawEvent {
            id: "2".repeat(64),
            pubkey: "3".repeat(64),
            created_at: 1,
            kind: KIND_ZAP_RECEIPT,
            tags: tags
                .into_iter()
                .map(|(name, value)| vec![name.to_string(), value])
                .collect(),
            content: String::new(),
            sig: None,
        }
    }

    fn description(id: &str) -> String {
        serde_json::json!({"id": id, "pubkey": "4".repeat(64), "content": ""}).to_string()
    }

    fn context(hints: PaymentHints) -> CorrelationContext {
        CorrelationContext::new("recipient", REQUEST_ID, hints)
    }

    #[test]
    fn embedded_request_wins_over_other_hints() {
        let ctx = context(PaymentHints {
            invoice: Some("lnbc10u1abc".into()),
            app_address: Some("32267:pk:app".into()),
            event_id: None,
        });
        let receipt = receipt(vec![
            ("description", description(REQUEST_ID)),
            ("bolt11", "lnbc10u1abc".into()),
            ("a", "32267:pk:app".into()),
        ]);
        assert_eq!(ctx.evaluate(&receipt), Some(MatchStrategy::EmbeddedRequest));
    }

    #[test]
    fn invoice_match_ignores_case() {
        let ctx = context(PaymentHints {
            invoice: Some("lnbc10u1ABC".into()),
            ..Default::default()
        });
        let receipt = receipt(vec![
            ("description", description(&"9".repeat(64))),
            ("bolt11", "LNBC10U1abc".into()),
        ]);
        assert_eq!(ctx.evaluate(&receipt), Some(MatchStrategy::Invoice));
    }

    #[test]
    fn address_before_event_reference() {
        let ctx = context(PaymentHints {
            invoice: None,
            app_address: Some("32267:pk:app".into()),
            event_id: Some("app-event".into()),
        });
        let both = receipt(vec![("a", "32267:pk:app".into()), ("e", "app-event".into())]);
        assert_eq!(ctx.evaluate(&both), Some(MatchStrategy::Address));

        let only_e = receipt(vec![("a", "32267:other:app".into()), ("e", "app-event".into())]);
        assert_eq!(ctx.evaluate(&only_e), Some(MatchStrategy::EventReference));
    }

    #[test]
    fn invoice_before_event_reference() {
        let ctx = context(PaymentHints {
            invoice: Some("lnbc5u1xyz".into()),
            app_address: None,
            event_id: Some("app-event".into()),
        });
        let both = receipt(vec![("e", "app-event".into()), ("bolt11", "lnbc5u1xyz".into())]);
        assert_eq!(ctx.evaluate(&both), Some(MatchStrategy::Invoice));
    }

    #[test]
    fn reference_tags_match_beyond_the_first() {
        let ctx = context(PaymentHints {
            invoice: None,
            app_address: Some("32267:pk:app".into()),
            event_id: None,
        });
        let address = receipt(vec![
            ("a", "30063:pk:app@1.0".into()),
            ("a", "32267:pk:app".into()),
        ]);
        assert_eq!(ctx.evaluate(&address), Some(MatchStrategy::Address));

        let ctx = context(PaymentHints {
            event_id: Some("app-event".into()),
            ..Default::default()
        });
        let event = receipt(vec![("e", "other".into()), ("e", "app-event".into())]);
        assert_eq!(ctx.evaluate(&event), Some(MatchStrategy::EventReference));
    }

    #[test]
    fn unrelated_receipt_does_not_match() {
        let ctx = context(PaymentHints::default());
        let receipt = receipt(vec![
            ("description", "not json".into()),
            ("a", "32267:pk:app".into()),
        ]);
        assert_eq!(ctx.evaluate(&receipt), None);
    }

    #[test]
    fn filters_cover_both_recipient_tags() {
        let pool = Arc::new(crate::aggregator::RelayPool::new(Vec::new()));
        let correlator = PayoutCorrelator::new(SubscriptionAggregator::new(pool), Vec::new());
        let filters = correlator.filters("recipient");

        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].tags.get(&'p'), Some(&vec!["recipient".to_string()]));
        assert_eq!(filters[1].tags.get(&'P'), Some(&vec!["recipient".to_string()]));
        let since = filters[0].since.unwrap();
        assert!(unix_timestamp() - since >= 300);
        assert!(unix_timestamp() - since < 310);
        assert!(filters.iter().all(|f| f.kinds == vec![KIND_ZAP_RECEIPT]));
    }
}
