use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{json_str, npub, TagMap};
use crate::events::{address, RawEvent, KIND_APP};

/// Application listing (kind 32267).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub pubkey: String,
    pub npub: String,
    pub d_tag: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub images: Vec<String>,
    pub url: String,
    pub download_url: String,
    pub repository: String,
    pub category: String,
    pub license: String,
    pub developer: String,
    pub platform: String,
    pub created_at: u64,
    pub event: RawEvent,
}

impl App {
    /// `32267:<pubkey>:<d>` coordinate used by releases, comments, and zaps.
    pub fn address(&self) -> String {
        address(KIND_APP, &self.pubkey, &self.d_tag)
    }

    /// Key under which the app is cached.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.pubkey, self.d_tag)
    }
}

pub fn parse_app(event: &RawEvent) -> App {
    let tags = TagMap::new(&event.tags);
    let images_from_tags: Vec<String> = event.tag_values("image").map(str::to_string).collect();

    let content = match serde_json::from_str::<Value>(&event.content) {
        Ok(Value::Object(map)) => map,
        _ => {
            debug!(event_id = %event.id, "App content is not a JSON object, using it as description");
            let mut map = Map::new();
            map.insert("description".into(), Value::String(event.content.clone()));
            map
        }
    };

    let icon = tags
        .get("icon")
        .map(str::to_string)
        .or_else(|| json_str(&content, &["icon", "picture"]))
        .unwrap_or_default();

    let images = if images_from_tags.is_empty() {
        content
            .get("images")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    } else {
        images_from_tags
    };

    let description = json_str(&content, &["description", "about", "summary"])
        .or_else(|| (!event.content.is_empty()).then(|| event.content.clone()))
        .unwrap_or_else(|| "No description available".to_string());

    let license = json_str(&content, &["license"])
        .or_else(|| tags.get("license").map(str::to_string))
        .filter(|license| !license.trim().eq_ignore_ascii_case("NOASSERTION"))
        .unwrap_or_default();

    let field = |keys: &[&str], tag: &str| {
        json_str(&content, keys)
            .or_else(|| tags.get(tag).map(str::to_string))
            .unwrap_or_default()
    };

    App {
        id: event.id.clone(),
        pubkey: event.pubkey.clone(),
        npub: npub(&event.pubkey),
        d_tag: tags.string("d"),
        name: json_str(&content, &["name"])
            .or_else(|| tags.get("name").map(str::to_string))
            .unwrap_or_else(|| "Unknown App".to_string()),
        description,
        icon,
        images,
        url: field(&["url", "website"], "url"),
        download_url: field(&["downloadUrl", "download"], "download"),
        repository: field(&["repository", "repo", "source"], "repository"),
        category: field(&["category"], "category"),
        license,
        developer: field(&["developer", "publisher", "author"], "developer"),
        platform: field(&["platform"], "platform"),
        created_at: event.created_at,
        event: event.clone(),
    }
}
