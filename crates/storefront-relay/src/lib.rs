//! Nostr relay data layer for the app storefront.
//!
//! Queries fan out to several unreliable relays and are merged into one
//! deduplicated result set. Parsed events land in a bounded local cache so
//! repeat views are instant, and zap receipts are correlated back to the zap
//! requests that caused them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       STOREFRONT-RELAY                           │
//! │                                                                  │
//! │                     ┌───────────────────┐                        │
//! │                     │ StorefrontClient  │                        │
//! │                     └─────────┬─────────┘                        │
//! │           ┌───────────────────┼────────────────────┐             │
//! │           ▼                   ▼                    ▼             │
//! │  ┌────────────────┐ ┌───────────────────┐ ┌─────────────────┐    │
//! │  │  EventCache    │ │ SubscriptionAggr. │ │ PayoutCorrelator│    │
//! │  │ (LRU, 500 max) │ │ - query (EOSE /   │ │ - live 9735 sub │    │
//! │  │ sqlite | memory│ │   first match)    │ │ - 4 strategies  │    │
//! │  └────────────────┘ │ - publish         │ └────────┬────────┘    │
//! │                     │ - stream          │◄─────────┘             │
//! │                     └─────────┬─────────┘                        │
//! │                               ▼                                  │
//! │                  RelayPool ── RelayTransport × N                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Event Kinds
//!
//! | Kind | Constant | Parsed into |
//! |------|----------|-------------|
//! | 0 | `KIND_PROFILE` | [`Profile`] |
//! | 1063 | `KIND_FILE_METADATA` | [`FileMetadata`] |
//! | 1111 | `KIND_COMMENT` | [`Comment`] (NIP-22) |
//! | 9734 | `KIND_ZAP_REQUEST` | built by [`StorefrontClient::create_zap_request`] |
//! | 9735 | `KIND_ZAP_RECEIPT` | [`Zap`] |
//! | 30063 | `KIND_RELEASE` | [`Release`] |
//! | 32267 | `KIND_APP` | [`App`] |
//!
//! # Example
//!
//! ```rust,ignore
//! use storefront_relay::{AppQuery, StorefrontClient, StorefrontConfig};
//!
//! let client = StorefrontClient::connect(StorefrontConfig::from_env()?).await?;
//! let apps = client.fetch_apps(&AppQuery::default()).await;
//! for app in &apps {
//!     let version = client.fetch_app_version(app).await;
//!     println!("{} {}", app.name, version.unwrap_or_default());
//! }
//! client.close().await;
//! ```

pub mod aggregator;
pub mod cache;
mod client;
mod config;
pub mod correlator;
mod error;
mod events;
pub mod parsers;
mod signer;
pub mod transport;

pub use aggregator::{
    AggregatedStream, PublishSummary, QueryMode, RelayPool, SubscriptionAggregator,
};
pub use cache::{CacheStats, EventCache};
pub use client::{AppQuery, StorefrontClient, ZapSummary, COMMENT_LIMIT};
pub use config::{CacheConfig, StorefrontConfig};
pub use correlator::{
    CorrelationContext, CorrelationHandle, CorrelationState, MatchStrategy, PaymentHints,
    PayoutCorrelator,
};
pub use error::Error;
pub use events::{
    address, is_event_id, tag_value, unix_timestamp, Filter, RawEvent, UnsignedEvent,
    KIND_APP, KIND_COMMENT, KIND_FILE_METADATA, KIND_PROFILE, KIND_RELEASE, KIND_ZAP_RECEIPT,
    KIND_ZAP_REQUEST,
};
pub use parsers::{App, Comment, FileMetadata, Profile, Release, Zap};
pub use signer::{EventSigner, KeysSigner};
pub use transport::{NostrRelayTransport, PublishAck, RelaySignal, RelayTransport, ScriptedRelay};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
