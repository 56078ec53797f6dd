//! Storefront operations composed from the pool, aggregator, cache, and
//! correlator.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregator::{QueryMode, RelayPool, SubscriptionAggregator};
use crate::cache::EventCache;
use crate::config::StorefrontConfig;
use crate::correlator::{CorrelationContext, CorrelationHandle, PaymentHints, PayoutCorrelator};
use crate::events::{
    address, is_event_id, Filter, RawEvent, UnsignedEvent, KIND_APP, KIND_COMMENT,
    KIND_FILE_METADATA, KIND_PROFILE, KIND_RELEASE, KIND_ZAP_RECEIPT, KIND_ZAP_REQUEST,
};
use crate::parsers::{
    parse_app, parse_comment, parse_file_metadata, parse_profile, parse_release, parse_zap, App,
    Comment, FileMetadata, Profile, Release, Zap,
};
use crate::signer::EventSigner;
use crate::transport::{NostrRelayTransport, RelayTransport};
use crate::Error;

const APP_PAGE_SIZE: usize = 12;
const RELEASE_LOOKBACK: usize = 5;
const ZAP_LIMIT: usize = 200;
pub const COMMENT_LIMIT: usize = 200;

/// App listing query against the primary relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppQuery {
    pub limit: usize,
    pub authors: Option<Vec<String>>,
    pub d_tags: Option<Vec<String>>,
    /// Page cursor: only apps created at or before this timestamp.
    pub until: Option<u64>,
    /// NIP-50 free-text search.
    pub search: Option<String>,
}

impl Default for AppQuery {
    fn default() -> Self {
        Self {
            limit: APP_PAGE_SIZE,
            authors: None,
            d_tags: None,
            until: None,
            search: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZapSummary {
    pub zaps: Vec<Zap>,
    pub total_sats: u64,
    pub count: usize,
}

pub struct StorefrontClient {
    config: StorefrontConfig,
    aggregator: SubscriptionAggregator,
    cache: Arc<EventCache>,
    correlator: PayoutCorrelator,
}

impl StorefrontClient {
    /// Build nostr-sdk transports for every configured relay and connect.
    pub async fn connect(config: StorefrontConfig) -> Result<Self, Error> {
        let mut transports: Vec<Arc<dyn RelayTransport>> = Vec::new();
        for url in config.all_relays() {
            transports.push(Arc::new(NostrRelayTransport::new(url).await?));
        }
        let cache = Arc::new(EventCache::open(&config.cache));
        let client = Self::with_transports(config, transports, cache);
        client.aggregator.pool().open().await;
        Ok(client)
    }

    /// Assemble a client over caller-provided transports and cache.
    pub fn with_transports(
        config: StorefrontConfig,
        transports: Vec<Arc<dyn RelayTransport>>,
        cache: Arc<EventCache>,
    ) -> Self {
        let pool = Arc::new(RelayPool::new(transports));
        let aggregator = SubscriptionAggregator::new(pool)
            .with_query_timeout(config.query_timeout)
            .with_publish_timeout(config.publish_timeout);
        let correlator = PayoutCorrelator::new(aggregator.clone(), config.zap_relays())
            .with_window(config.receipt_window);

        Self {
            config,
            aggregator,
            cache,
            correlator,
        }
    }

    pub fn config(&self) -> &StorefrontConfig {
        &self.config
    }

    pub fn cache(&self) -> &EventCache {
        &self.cache
    }

    fn primary(&self) -> Vec<String> {
        vec![self.config.primary_relay.clone()]
    }

    /// Apps for the configured platform, newest first. Every result is cached.
    pub async fn fetch_apps(&self, query: &AppQuery) -> Vec<App> {
        let mut filter = Filter::new()
            .kind(KIND_APP)
            .limit(query.limit)
            .tag('f', [self.config.platform.as_str()]);
        if let Some(authors) = &query.authors {
            filter = filter.authors(authors.iter().cloned());
        }
        if let Some(d_tags) = &query.d_tags {
            filter = filter.tag('d', d_tags.iter().cloned());
        }
        if let Some(until) = query.until {
            filter = filter.until(until);
        }
        if let Some(search) = &query.search {
            filter = filter.search(search);
        }

        let events = self
            .aggregator
            .query(&self.primary(), &filter, QueryMode::AllEose)
            .await;
        let apps: Vec<App> = events.iter().map(parse_app).collect();
        for app in &apps {
            self.cache_app(app);
        }
        info!(count = apps.len(), "Fetched apps");
        apps
    }

    pub async fn fetch_app(&self, pubkey: &str, d_tag: &str) -> Option<App> {
        if let Some(app) = self.cache.get::<App>(KIND_APP, &format!("{pubkey}:{d_tag}")) {
            debug!(pubkey, d_tag, "App served from cache");
            return Some(app);
        }

        let filter = Filter::new()
            .kind(KIND_APP)
            .authors([pubkey])
            .tag('d', [d_tag]);
        let app = self.first_app(&filter).await?;
        self.cache_app(&app);
        Some(app)
    }

    /// Any author's app with this `d` tag.
    pub async fn fetch_app_by_d_tag(&self, d_tag: &str) -> Option<App> {
        let filter = Filter::new().kind(KIND_APP).tag('d', [d_tag]).limit(1);
        let app = self.first_app(&filter).await?;
        self.cache_app(&app);
        Some(app)
    }

    async fn first_app(&self, filter: &Filter) -> Option<App> {
        self.aggregator
            .query(&self.primary(), filter, QueryMode::FirstMatch)
            .await
            .first()
            .map(parse_app)
    }

    fn cache_app(&self, app: &App) {
        if !app.pubkey.is_empty() && !app.d_tag.is_empty() {
            self.cache.put(KIND_APP, &app.cache_key(), app);
        }
    }

    pub async fn fetch_profile(&self, pubkey: &str) -> Option<Profile> {
        if let Some(profile) = self.cache.get::<Profile>(KIND_PROFILE, pubkey) {
            return Some(profile);
        }
        self.fetch_profile_fresh(pubkey).await
    }

    /// Skip the cache read, but refresh the cached copy on success.
    pub async fn fetch_profile_fresh(&self, pubkey: &str) -> Option<Profile> {
        let filter = Filter::new().kind(KIND_PROFILE).authors([pubkey]).limit(1);
        let events = self
            .aggregator
            .query(&self.config.profile_relays(), &filter, QueryMode::FirstMatch)
            .await;
        let profile = parse_profile(events.first()?);
        self.cache.put(KIND_PROFILE, pubkey, &profile);
        Some(profile)
    }

    pub async fn fetch_latest_release(&self, app: &App, skip_cache: bool) -> Option<Release> {
        if app.pubkey.is_empty() || app.d_tag.is_empty() {
            return None;
        }
        let key = app.cache_key();
        if !skip_cache {
            if let Some(release) = self.cache.get::<Release>(KIND_RELEASE, &key) {
                return Some(release);
            }
        }

        let filter = Filter::new()
            .kind(KIND_RELEASE)
            .tag('a', [app.address()])
            .authors([app.pubkey.as_str()])
            .limit(RELEASE_LOOKBACK);
        let events = self
            .aggregator
            .query(&self.primary(), &filter, QueryMode::AllEose)
            .await;

        let release = parse_release(events.first()?);
        self.cache.put(KIND_RELEASE, &key, &release);
        Some(release)
    }

    /// File metadata for `ids`; only well-formed ids missing from the cache
    /// hit the relay.
    pub async fn fetch_file_metadata(&self, ids: &[String]) -> Vec<FileMetadata> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        let mut missing = Vec::new();
        for id in ids.iter().filter(|id| seen.insert(id.as_str())) {
            if !is_event_id(id) {
                debug!(id = %id, "Skipping malformed file event id");
                continue;
            }
            match self.cache.get::<FileMetadata>(KIND_FILE_METADATA, id) {
                Some(file) => files.push(file),
                None => missing.push(id.clone()),
            }
        }
        if missing.is_empty() {
            return files;
        }

        debug!(cached = files.len(), missing = missing.len(), "Fetching file metadata");
        let filter = Filter::new().kind(KIND_FILE_METADATA).ids(missing);
        let events = self
            .aggregator
            .query(&self.primary(), &filter, QueryMode::AllEose)
            .await;
        for event in &events {
            let file = parse_file_metadata(event);
            self.cache.put(KIND_FILE_METADATA, &file.id, &file);
            files.push(file);
        }
        files
    }

    /// Version string of the app's latest release, read from its files.
    pub async fn fetch_app_version(&self, app: &App) -> Option<String> {
        let release = self.fetch_latest_release(app, false).await?;
        if release.file_ids.is_empty() {
            return None;
        }
        self.fetch_file_metadata(&release.file_ids)
            .await
            .into_iter()
            .map(|file| file.version.trim().to_string())
            .find(|version| !version.is_empty())
    }

    /// Receipts paid to the app's publisher that reference the app itself or
    /// one of its file events.
    pub async fn fetch_app_zaps(&self, app: &App, file_event_ids: &[String]) -> ZapSummary {
        let app_address = app.address();
        let referenced: HashSet<&str> = std::iter::once(app.id.as_str())
            .chain(file_event_ids.iter().map(String::as_str))
            .filter(|id| !id.is_empty())
            .collect();

        let filter = Filter::new()
            .kind(KIND_ZAP_RECEIPT)
            .tag('p', [app.pubkey.as_str()])
            .limit(ZAP_LIMIT);
        let events = self
            .aggregator
            .query(&self.config.social_relays, &filter, QueryMode::AllEose)
            .await;

        let zaps: Vec<Zap> = events
            .iter()
            .filter(|event| {
                event.has_tag("a", &app_address)
                    || event.tag_values("e").any(|id| referenced.contains(id))
            })
            .map(parse_zap)
            .collect();
        let total_sats = zaps.iter().map(|zap| zap.amount_sats).sum();

        ZapSummary {
            count: zaps.len(),
            total_sats,
            zaps,
        }
    }

    pub async fn fetch_app_comments(&self, pubkey: &str, d_tag: &str, limit: usize) -> Vec<Comment> {
        if pubkey.is_empty() || d_tag.is_empty() {
            return Vec::new();
        }
        let filter = Filter::new()
            .kind(KIND_COMMENT)
            .tag('A', [address(KIND_APP, pubkey, d_tag)])
            .limit(limit);
        self.aggregator
            .query(&self.config.comment_relays(), &filter, QueryMode::AllEose)
            .await
            .iter()
            .map(parse_comment)
            .collect()
    }

    /// Sign and publish a NIP-22 comment on `app`, or a reply to `parent`.
    pub async fn publish_app_comment(
        &self,
        app: &App,
        content: &str,
        version: &str,
        parent: Option<&Comment>,
        signer: &dyn EventSigner,
    ) -> Result<RawEvent, Error> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::InvalidInput("comment cannot be empty".to_string()));
        }
        if app.pubkey.is_empty() || app.d_tag.is_empty() {
            return Err(Error::InvalidInput("missing app information for comment".to_string()));
        }
        if version.trim().is_empty() {
            return Err(Error::InvalidInput("version is required as thread key".to_string()));
        }

        let unsigned = comment_event(app, content, version, parent, &self.config.primary_relay);
        let signed = signer.sign(unsigned).await?;
        self.aggregator
            .publish(&self.config.comment_relays(), &signed)
            .await?;
        Ok(signed)
    }

    /// Signed kind 9734 zap request for `app`. Not published; it is handed to
    /// the recipient's lightning service.
    pub async fn create_zap_request(
        &self,
        app: &App,
        amount_sats: u64,
        comment: &str,
        signer: &dyn EventSigner,
    ) -> Result<RawEvent, Error> {
        if app.pubkey.is_empty() || app.d_tag.is_empty() {
            return Err(Error::InvalidInput("missing app information for zap request".to_string()));
        }
        if amount_sats == 0 {
            return Err(Error::InvalidInput("invalid zap amount".to_string()));
        }

        let unsigned = zap_request_event(app, amount_sats, comment, &self.config.social_relays)?;
        signer.sign(unsigned).await
    }

    /// See [`PayoutCorrelator::correlate`].
    pub fn subscribe_to_zap_receipt<F>(
        &self,
        recipient: &str,
        request_id: &str,
        hints: PaymentHints,
        on_match: F,
    ) -> CorrelationHandle
    where
        F: FnOnce(Zap) + Send + 'static,
    {
        self.correlator
            .correlate(CorrelationContext::new(recipient, request_id, hints), on_match)
    }

    pub async fn close(&self) {
        self.aggregator.pool().close().await;
    }
}

fn comment_event(
    app: &App,
    content: &str,
    version: &str,
    parent: Option<&Comment>,
    relay: &str,
) -> UnsignedEvent {
    let app_address = app.address();
    let root_kind = KIND_APP.to_string();

    let event = UnsignedEvent::new(KIND_COMMENT, content)
        .tag(["A", app_address.as_str(), relay])
        .tag(["K", root_kind.as_str()])
        .tag(["P", app.pubkey.as_str(), relay])
        .tag(["v", version.trim()]);

    match parent.filter(|parent| !parent.id.is_empty() && !parent.pubkey.is_empty()) {
        Some(parent) => event
            .tag(["e", parent.id.as_str(), relay, parent.pubkey.as_str()])
            .tag(["k", KIND_COMMENT.to_string().as_str()])
            .tag(["p", parent.pubkey.as_str(), relay]),
        None => {
            let mut event = event.tag(["a", app_address.as_str(), relay, app.pubkey.as_str()]);
            if !app.id.is_empty() {
                event = event.tag(["e", app.id.as_str(), relay, app.pubkey.as_str()]);
            }
            event
                .tag(["k", root_kind.as_str()])
                .tag(["p", app.pubkey.as_str(), relay])
        }
    }
}

fn zap_request_event(
    app: &App,
    amount_sats: u64,
    comment: &str,
    relays: &[String],
) -> Result<UnsignedEvent, Error> {
    let millisats = amount_sats
        .checked_mul(1000)
        .ok_or_else(|| Error::InvalidInput("zap amount too large".to_string()))?;

    let mut event = UnsignedEvent::new(KIND_ZAP_REQUEST, comment.trim())
        .tag(["p", app.pubkey.as_str()])
        .tag(["a", app.address().as_str()])
        .tag(["amount".to_string(), millisats.to_string()])
        .tag(std::iter::once("relays").chain(relays.iter().map(String::as_str)));
    if !app.id.is_empty() {
        event = event.tag(["e", app.id.as_str()]);
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::parse_app;

    fn app() -> App {
        parse_app(&RawEvent {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1,
            kind: KIND_APP,
            tags: vec![vec!["d".into(), "com.example".into()]],
            content: "{}".into(),
            sig: None,
        })
    }

    #[test]
    fn top_level_comment_tags() {
        let app = app();
        let event = comment_event(&app, "hi", "1.0.0", None, "wss://relay.zapstore.dev");
        let address = app.address();
        assert_eq!(
            event.tags,
            vec![
                vec!["A", address.as_str(), "wss://relay.zapstore.dev"],
                vec!["K", "32267"],
                vec!["P", app.pubkey.as_str(), "wss://relay.zapstore.dev"],
                vec!["v", "1.0.0"],
                vec!["a", address.as_str(), "wss://relay.zapstore.dev", app.pubkey.as_str()],
                vec!["e", app.id.as_str(), "wss://relay.zapstore.dev", app.pubkey.as_str()],
                vec!["k", "32267"],
                vec!["p", app.pubkey.as_str(), "wss://relay.zapstore.dev"],
            ]
        );
        assert_eq!(event.kind, KIND_COMMENT);
    }

    #[test]
    fn reply_points_at_parent_comment() {
        let app = app();
        let parent = parse_comment(&RawEvent {
            id: "c".repeat(64),
            pubkey: "d".repeat(64),
            created_at: 2,
            kind: KIND_COMMENT,
            tags: Vec::new(),
            content: "first".into(),
            sig: None,
        });
        let event = comment_event(&app, "reply", "1.0.0", Some(&parent), "wss://r");
        let tail: Vec<_> = event.tags[4..].to_vec();
        assert_eq!(
            tail,
            vec![
                vec!["e".to_string(), parent.id.clone(), "wss://r".into(), parent.pubkey.clone()],
                vec!["k".to_string(), "1111".into()],
                vec!["p".to_string(), parent.pubkey.clone(), "wss://r".into()],
            ]
        );
    }

    #[test]
    fn parent_without_id_falls_back_to_top_level() {
        let app = app();
        let orphan = parse_comment(&RawEvent {
            id: String::new(),
            pubkey: "d".repeat(64),
            created_at: 2,
            kind: KIND_COMMENT,
            tags: Vec::new(),
            content: "first".into(),
            sig: None,
        });
        let reply = comment_event(&app, "reply", "1.0.0", Some(&orphan), "wss://r");
        let top = comment_event(&app, "reply", "1.0.0", None, "wss://r");
        assert_eq!(reply.tags, top.tags);
    }

    #[test]
    fn zap_request_tags() {
        let app = app();
        let relays = vec!["wss://one".to_string(), "wss://two".to_string()];
        let event = zap_request_event(&app, 21, "  thanks ", &relays).unwrap();

        assert_eq!(event.kind, KIND_ZAP_REQUEST);
        assert_eq!(event.content, "thanks");
        assert_eq!(event.tags[0], vec!["p".to_string(), app.pubkey.clone()]);
        assert_eq!(event.tags[1], vec!["a".to_string(), app.address()]);
        assert_eq!(event.tags[2], vec!["amount".to_string(), "21000".to_string()]);
        assert_eq!(event.tags[3], vec!["relays", "wss://one", "wss://two"]);
        assert_eq!(event.tags[4], vec!["e".to_string(), app.id.clone()]);
    }

    #[test]
    fn zap_amount_overflow_is_rejected() {
        assert!(zap_request_event(&app(), u64::MAX, "", &[]).is_err());
    }
}
