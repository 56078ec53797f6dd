//! Typed views over raw relay events.
//!
//! Parsers never fail. Malformed content degrades to documented fallbacks so
//! a single bad event cannot take a result set down with it.

mod app;
mod comment;
mod profile;
mod release;
mod zap;

use std::collections::HashMap;

use nostr_sdk::prelude::{PublicKey, ToBech32};
use serde_json::{Map, Value};

pub use app::{parse_app, App};
pub use comment::{parse_comment, Comment};
pub use profile::{parse_profile, Profile};
pub use release::{parse_file_metadata, parse_release, FileMetadata, Release};
pub use zap::{bolt11_amount_sats, parse_zap, Zap};
pub(crate) use zap::embedded_request_id;

/// First value of every tag name; tags shorter than two elements are skipped.
#[derive(Debug, Default, Clone)]
pub(crate) struct TagMap<'a> {
    first: HashMap<&'a str, &'a str>,
}

impl<'a> TagMap<'a> {
    pub(crate) fn new(tags: &'a [Vec<String>]) -> Self {
        let mut first = HashMap::new();
        for tag in tags {
            if let [name, value, ..] = tag.as_slice() {
                first.entry(name.as_str()).or_insert(value.as_str());
            }
        }
        Self { first }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&'a str> {
        self.first.get(name).copied()
    }

    pub(crate) fn string(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }
}

/// Bech32 `npub` for a hex key, or the input unchanged if it does not parse.
pub fn npub(pubkey: &str) -> String {
    PublicKey::parse(pubkey)
        .ok()
        .and_then(|key| key.to_bech32().ok())
        .unwrap_or_else(|| pubkey.to_string())
}

/// First non-empty string among `keys` in a JSON object.
pub(crate) fn json_str(content: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| content.get(*key))
        .filter_map(Value::as_str)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_map_keeps_first_occurrence() {
        let tags = vec![
            vec!["d".to_string(), "one".to_string()],
            vec!["d".to_string(), "two".to_string()],
            vec!["lonely".to_string()],
        ];
        let map = TagMap::new(&tags);
        assert_eq!(map.get("d"), Some("one"));
        assert_eq!(map.get("lonely"), None);
        assert_eq!(map.string("missing"), "");
    }

    #[test]
    fn npub_falls_back_to_input() {
        assert_eq!(npub("not-a-key"), "not-a-key");
        let hex = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";
        assert!(npub(hex).starts_with("npub1"));
    }
}
