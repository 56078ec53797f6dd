//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{EVICTION_BATCH, MAX_CAPACITY};
use crate::Error;

pub const DEFAULT_PRIMARY_RELAY: &str = "wss://relay.zapstore.dev";
pub const DEFAULT_PROFILE_RELAY: &str = "wss://relay.vertexlab.io";
pub const DEFAULT_SOCIAL_RELAYS: [&str; 4] = [
    "wss://relay.damus.io",
    "wss://relay.primal.net",
    "wss://relay.nostr.band",
    "wss://nos.lol",
];
/// Wallet relays where zap receipts commonly land, on top of the social set.
pub const DEFAULT_WALLET_RELAYS: [&str; 3] = [
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://nostr.wine",
];
pub const DEFAULT_PLATFORM: &str = "android-arm64-v8a";
pub const DEFAULT_RECEIPT_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// SQLite file for the durable cache; `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    pub max_capacity: usize,
    pub eviction_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_capacity: MAX_CAPACITY,
            eviction_batch: EVICTION_BATCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorefrontConfig {
    /// Relay that serves app, release, and file metadata events.
    pub primary_relay: String,
    pub profile_relay: String,
    pub social_relays: Vec<String>,
    pub wallet_relays: Vec<String>,
    /// Value of the `#f` platform filter on app queries.
    pub platform: String,
    pub query_timeout: Duration,
    pub publish_timeout: Duration,
    /// How far back the receipt correlator looks when it subscribes.
    pub receipt_window: Duration,
    pub cache: CacheConfig,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            primary_relay: DEFAULT_PRIMARY_RELAY.to_string(),
            profile_relay: DEFAULT_PROFILE_RELAY.to_string(),
            social_relays: DEFAULT_SOCIAL_RELAYS.iter().map(|s| s.to_string()).collect(),
            wallet_relays: DEFAULT_WALLET_RELAYS.iter().map(|s| s.to_string()).collect(),
            platform: DEFAULT_PLATFORM.to_string(),
            query_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
            receipt_window: DEFAULT_RECEIPT_WINDOW,
            cache: CacheConfig::default(),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `STOREFRONT_PRIMARY_RELAY` | `wss://relay.zapstore.dev` |
    /// | `STOREFRONT_PROFILE_RELAY` | `wss://relay.vertexlab.io` |
    /// | `STOREFRONT_SOCIAL_RELAYS` | damus, primal, nostr.band, nos.lol (comma separated) |
    /// | `STOREFRONT_WALLET_RELAYS` | nos.lol, nostr.band, nostr.wine (comma separated) |
    /// | `STOREFRONT_PLATFORM` | `android-arm64-v8a` |
    /// | `STOREFRONT_QUERY_TIMEOUT_MS` | `10000` |
    /// | `STOREFRONT_PUBLISH_TIMEOUT_MS` | `10000` |
    /// | `STOREFRONT_RECEIPT_WINDOW_SECS` | `300` |
    /// | `STOREFRONT_CACHE_PATH` | unset (memory cache) |
    /// | `STOREFRONT_CACHE_MAX` | `500` |
    /// | `STOREFRONT_CACHE_EVICTION_BATCH` | `50` |
    pub fn from_env() -> Result<Self, Error> {
        let defaults = Self::default();

        let primary_relay =
            env::var("STOREFRONT_PRIMARY_RELAY").unwrap_or(defaults.primary_relay);
        let profile_relay =
            env::var("STOREFRONT_PROFILE_RELAY").unwrap_or(defaults.profile_relay);
        let social_relays = env::var("STOREFRONT_SOCIAL_RELAYS")
            .ok()
            .map(|v| split_list(&v))
            .unwrap_or(defaults.social_relays);
        let wallet_relays = env::var("STOREFRONT_WALLET_RELAYS")
            .ok()
            .map(|v| split_list(&v))
            .unwrap_or(defaults.wallet_relays);
        let platform = env::var("STOREFRONT_PLATFORM").unwrap_or(defaults.platform);

        let query_timeout = parse_env::<u64>("STOREFRONT_QUERY_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.query_timeout);
        let publish_timeout = parse_env::<u64>("STOREFRONT_PUBLISH_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.publish_timeout);
        let receipt_window = parse_env::<u64>("STOREFRONT_RECEIPT_WINDOW_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.receipt_window);

        let cache = CacheConfig {
            db_path: env::var("STOREFRONT_CACHE_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            max_capacity: parse_env("STOREFRONT_CACHE_MAX")?.unwrap_or(MAX_CAPACITY),
            eviction_batch: parse_env("STOREFRONT_CACHE_EVICTION_BATCH")?
                .unwrap_or(EVICTION_BATCH),
        };

        let config = Self {
            primary_relay,
            profile_relay,
            social_relays,
            wallet_relays,
            platform,
            query_timeout,
            publish_timeout,
            receipt_window,
            cache,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        for url in self.all_relays() {
            if !(url.starts_with("wss://") || url.starts_with("ws://")) {
                return Err(Error::InvalidConfig {
                    name: "relay url",
                    reason: format!("{url} is not a websocket url"),
                });
            }
        }
        if self.cache.max_capacity == 0 {
            return Err(Error::InvalidConfig {
                name: "STOREFRONT_CACHE_MAX",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cache.eviction_batch == 0 {
            return Err(Error::InvalidConfig {
                name: "STOREFRONT_CACHE_EVICTION_BATCH",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_primary_relay(mut self, url: impl Into<String>) -> Self {
        self.primary_relay = url.into();
        self
    }

    pub fn with_profile_relay(mut self, url: impl Into<String>) -> Self {
        self.profile_relay = url.into();
        self
    }

    pub fn with_social_relays<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.social_relays = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_wallet_relays<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wallet_relays = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache.db_path = Some(path.into());
        self
    }

    /// Profile relay, then the primary relay, then the social relays.
    pub fn profile_relays(&self) -> Vec<String> {
        dedup(
            [self.profile_relay.clone(), self.primary_relay.clone()]
                .into_iter()
                .chain(self.social_relays.iter().cloned()),
        )
    }

    pub fn comment_relays(&self) -> Vec<String> {
        dedup(self.social_relays.iter().cloned())
    }

    /// Social relays, the primary relay, then wallet relays.
    pub fn zap_relays(&self) -> Vec<String> {
        dedup(
            self.social_relays
                .iter()
                .cloned()
                .chain(std::iter::once(self.primary_relay.clone()))
                .chain(self.wallet_relays.iter().cloned()),
        )
    }

    /// Every endpoint the pool must hold a transport for.
    pub fn all_relays(&self) -> Vec<String> {
        dedup(
            self.profile_relays()
                .into_iter()
                .chain(self.zap_relays()),
        )
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, Error>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|err: T::Err| Error::InvalidConfig {
                name,
                reason: err.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn dedup(urls: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for url in urls {
        if !seen.contains(&url) {
            seen.push(url);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_relay_sets() {
        let config = StorefrontConfig::default();

        assert_eq!(
            config.profile_relays(),
            vec![
                "wss://relay.vertexlab.io",
                "wss://relay.zapstore.dev",
                "wss://relay.damus.io",
                "wss://relay.primal.net",
                "wss://relay.nostr.band",
                "wss://nos.lol",
            ]
        );
        assert_eq!(config.comment_relays(), config.social_relays);
        assert_eq!(
            config.zap_relays(),
            vec![
                "wss://relay.damus.io",
                "wss://relay.primal.net",
                "wss://relay.nostr.band",
                "wss://nos.lol",
                "wss://relay.zapstore.dev",
                "wss://nostr.wine",
            ]
        );
        assert_eq!(config.all_relays().len(), 7);
    }

    #[test]
    fn list_parsing_skips_blanks() {
        assert_eq!(
            split_list(" wss://a , ,wss://b,"),
            vec!["wss://a".to_string(), "wss://b".to_string()]
        );
    }

    #[test]
    fn rejects_non_websocket_relays() {
        let config = StorefrontConfig::default().with_primary_relay("https://relay.example");
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { name: "relay url", .. })
        ));
    }

    #[test]
    fn rejects_zero_capacity() {
        let mut config = StorefrontConfig::default();
        config.cache.max_capacity = 0;
        assert!(config.validate().is_err());
    }
}
