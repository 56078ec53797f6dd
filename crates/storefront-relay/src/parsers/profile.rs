use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{json_str, npub};
use crate::events::RawEvent;

/// Profile metadata (kind 0).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub pubkey: String,
    pub npub: String,
    pub name: String,
    pub display_name: String,
    pub picture: String,
    pub about: String,
    pub nip05: String,
    /// Lightning address.
    pub lud16: String,
    pub lud06: String,
    pub created_at: u64,
}

impl Profile {
    pub fn has_lightning(&self) -> bool {
        !self.lud16.is_empty() || !self.lud06.is_empty()
    }
}

pub fn parse_profile(event: &RawEvent) -> Profile {
    let content = match serde_json::from_str::<Value>(&event.content) {
        Ok(Value::Object(map)) => map,
        _ => {
            debug!(pubkey = %event.pubkey, "Profile content is not a JSON object");
            Default::default()
        }
    };
    let field = |keys: &[&str]| json_str(&content, keys).unwrap_or_default();

    Profile {
        pubkey: event.pubkey.clone(),
        npub: npub(&event.pubkey),
        name: field(&["name", "display_name"]),
        display_name: field(&["display_name", "name"]),
        picture: field(&["picture"]),
        about: field(&["about"]),
        nip05: field(&["nip05"]),
        lud16: field(&["lud16"]),
        lud06: field(&["lud06"]),
        created_at: event.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::KIND_PROFILE;

    fn profile(content: &str) -> RawEvent {
        RawEvent {
            id: "9".repeat(64),
            pubkey: "8".repeat(64),
            created_at: 100,
            kind: KIND_PROFILE,
            tags: Vec::new(),
            content: content.to_string(),
            sig: None,
        }
    }

    #[test]
    fn name_falls_back_to_display_name() {
        let parsed = parse_profile(&profile(r#"{"display_name":"Alice","lud16":"alice@ln.example"}"#));
        assert_eq!(parsed.name, "Alice");
        assert_eq!(parsed.display_name, "Alice");
        assert!(parsed.has_lightning());
    }

    #[test]
    fn garbage_content_gives_empty_fields() {
        let parsed = parse_profile(&profile("not json"));
        assert_eq!(parsed.name, "");
        assert_eq!(parsed.pubkey, "8".repeat(64));
        assert!(!parsed.has_lightning());
    }
}
