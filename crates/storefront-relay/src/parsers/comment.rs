use serde::{Deserialize, Serialize};

use super::{npub, TagMap};
use crate::events::{RawEvent, KIND_COMMENT};

/// NIP-22 comment (kind 1111) anchored on an app.
///
/// Uppercase tags name the root (`A`, `K`, `P`), lowercase tags the direct
/// parent (`a`/`e`, `k`, `p`). `v` carries the app version as thread key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub pubkey: String,
    pub npub: String,
    pub content: String,
    pub created_at: u64,
    pub app_address: String,
    pub app_kind: String,
    pub app_pubkey: String,
    pub version: String,
    pub parent_address: String,
    pub parent_id: Option<String>,
    pub parent_kind: Option<String>,
    pub parent_pubkey: Option<String>,
    pub is_reply: bool,
}

pub fn parse_comment(event: &RawEvent) -> Comment {
    let tags = TagMap::new(&event.tags);
    let parent_kind = tags.get("k").map(str::to_string);
    let is_reply = parent_kind.as_deref() == Some(KIND_COMMENT.to_string().as_str());

    Comment {
        id: event.id.clone(),
        pubkey: event.pubkey.clone(),
        npub: npub(&event.pubkey),
        content: event.content.clone(),
        created_at: event.created_at,
        app_address: tags.string("A"),
        app_kind: tags.string("K"),
        app_pubkey: tags.string("P"),
        version: tags.string("v"),
        parent_address: tags.string("a"),
        parent_id: tags.get("e").map(str::to_string),
        parent_kind,
        parent_pubkey: tags.get("p").map(str::to_string),
        is_reply,
    }
}
