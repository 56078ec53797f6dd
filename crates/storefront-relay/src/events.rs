use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Error;

pub const KIND_PROFILE: u16 = 0;
pub const KIND_FILE_METADATA: u16 = 1063;
pub const KIND_COMMENT: u16 = 1111;
pub const KIND_ZAP_REQUEST: u16 = 9734;
pub const KIND_ZAP_RECEIPT: u16 = 9735;
pub const KIND_RELEASE: u16 = 30063;
pub const KIND_APP: u16 = 32267;

/// A signed event as delivered by a relay. Identity is `id`; it is carried
/// through untouched and never recomputed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl RawEvent {
    pub fn from_event(event: &Event) -> Self {
        let tags = event
            .tags
            .iter()
            .map(|tag| tag.clone().to_vec())
            .collect();

        Self {
            id: event.id.to_string(),
            pubkey: event.pubkey.to_string(),
            created_at: event.created_at.as_secs(),
            kind: event.kind.as_u16(),
            tags,
            content: event.content.clone(),
            sig: Some(event.sig.to_string()),
        }
    }

    pub fn to_event(&self) -> Result<Event, Error> {
        if self.sig.is_none() {
            return Err(Error::InvalidInput(format!(
                "event {} is not signed",
                self.id
            )));
        }
        let json = serde_json::to_string(self)?;
        Ok(Event::from_json(json)?)
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        tag_value(&self.tags, name)
    }

    /// First value of every tag named `name`, in order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    pub fn has_tag(&self, name: &str, value: &str) -> bool {
        self.tag_values(name).any(|v| v == value)
    }
}

/// An event waiting for an external signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub kind: u16,
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            kind,
            created_at: unix_timestamp(),
            tags: Vec::new(),
            content: content.into(),
        }
    }

    pub fn tag<I, S>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(parts.into_iter().map(Into::into).collect());
        self
    }

    pub fn to_builder(&self) -> Result<EventBuilder, Error> {
        let tags = self
            .tags
            .iter()
            .map(|parts| Tag::parse(parts.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EventBuilder::new(Kind::from(self.kind), self.content.clone())
            .custom_created_at(Timestamp::from(self.created_at))
            .tags(tags))
    }
}

/// Subscription query as sent to a relay.
///
/// Serializes to the NIP-01 filter shape: `{"kinds":[..],"authors":[..],"#d":[..],...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub kinds: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(flatten, with = "tag_filters")]
    pub tags: BTreeMap<char, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    /// NIP-50 search; blank strings are dropped.
    pub fn search(mut self, search: &str) -> Self {
        let trimmed = search.trim();
        self.search = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn tag<I, S>(mut self, letter: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .insert(letter, values.into_iter().map(Into::into).collect());
        self
    }

    /// Translate into the nostr-sdk filter used on the wire.
    pub fn to_sdk_filter(&self) -> Result<nostr_sdk::Filter, Error> {
        let mut filter = nostr_sdk::Filter::new().kinds(self.kinds.iter().map(|k| Kind::from(*k)));

        if let Some(authors) = &self.authors {
            let keys = authors
                .iter()
                .map(|value| PublicKey::parse(value).map_err(Error::from))
                .collect::<Result<Vec<_>, _>>()?;
            filter = filter.authors(keys);
        }
        if let Some(ids) = &self.ids {
            let ids = ids
                .iter()
                .map(|value| {
                    EventId::parse(value)
                        .map_err(|err| Error::InvalidInput(format!("event id {value}: {err}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            filter = filter.ids(ids);
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        if let Some(since) = self.since {
            filter = filter.since(Timestamp::from(since));
        }
        if let Some(until) = self.until {
            filter = filter.until(Timestamp::from(until));
        }
        if let Some(search) = &self.search {
            filter = filter.search(search.clone());
        }
        for (letter, values) in &self.tags {
            let tag = SingleLetterTag::from_char(*letter)
                .map_err(|err| Error::InvalidInput(format!("tag filter #{letter}: {err}")))?;
            filter = filter.custom_tags(tag, values.iter().cloned());
        }

        Ok(filter)
    }
}

mod tag_filters {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(tags: &BTreeMap<char, Vec<String>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let keyed: BTreeMap<String, &Vec<String>> = tags
            .iter()
            .map(|(letter, values)| (format!("#{letter}"), values))
            .collect();
        keyed.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<char, Vec<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut tags = BTreeMap::new();
        for (key, value) in raw {
            let mut chars = key.chars();
            if let (Some('#'), Some(letter), None) = (chars.next(), chars.next(), chars.next()) {
                let values = Vec::<String>::deserialize(value).map_err(D::Error::custom)?;
                tags.insert(letter, values);
            }
        }
        Ok(tags)
    }
}

/// Coordinate string `<kind>:<pubkey>:<d>` used by `a`/`A` tags.
pub fn address(kind: u16, pubkey: &str, d_tag: &str) -> String {
    format!("{kind}:{pubkey}:{d_tag}")
}

pub fn tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.first().map(String::as_str) == Some(name))
        .and_then(|tag| tag.get(1).map(String::as_str))
}

pub fn is_event_id(value: &str) -> bool {
    value.len() == 64
        && value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        && hex::decode(value).is_ok()
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawEvent {
        RawEvent {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1_700_000_000,
            kind: KIND_RELEASE,
            tags: vec![
                vec!["d".into(), "com.example@1.0".into()],
                vec!["e".into(), "file-1".into()],
                vec!["e".into(), "file-2".into()],
                vec!["alone".into()],
            ],
            content: "notes".into(),
            sig: None,
        }
    }

    #[test]
    fn tag_lookup_uses_first_occurrence() {
        let event = sample();
        assert_eq!(event.tag_value("d"), Some("com.example@1.0"));
        assert_eq!(event.tag_value("e"), Some("file-1"));
        assert_eq!(event.tag_value("alone"), None);
        assert_eq!(event.tag_values("e").collect::<Vec<_>>(), vec!["file-1", "file-2"]);
        assert!(event.has_tag("e", "file-2"));
        assert!(!event.has_tag("e", "file-3"));
    }

    #[test]
    fn filter_serializes_to_wire_shape() {
        let filter = Filter::new()
            .kind(KIND_APP)
            .authors(["pk"])
            .tag('d', ["com.example"])
            .tag('f', ["android-arm64-v8a"])
            .limit(12)
            .search("  wallet ");

        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kinds": [32267],
                "authors": ["pk"],
                "limit": 12,
                "search": "wallet",
                "#d": ["com.example"],
                "#f": ["android-arm64-v8a"],
            })
        );

        let parsed: Filter = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, filter);
    }

    #[test]
    fn blank_search_is_dropped() {
        let filter = Filter::new().kind(KIND_APP).search("   ");
        assert!(filter.search.is_none());
    }

    #[test]
    fn unsigned_event_cannot_be_converted() {
        let err = sample().to_event().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn event_id_shape() {
        assert!(is_event_id(&"0f".repeat(32)));
        assert!(!is_event_id(&"0F".repeat(32)));
        assert!(!is_event_id("abc"));
    }

    #[test]
    fn address_format() {
        assert_eq!(address(KIND_APP, "pk", "com.example"), "32267:pk:com.example");
    }
}
