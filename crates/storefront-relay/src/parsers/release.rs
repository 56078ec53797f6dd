use serde::{Deserialize, Serialize};

use super::{npub, TagMap};
use crate::events::RawEvent;

/// Release (kind 30063). `file_ids` point at kind 1063 file metadata events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub pubkey: String,
    pub npub: String,
    pub d_tag: String,
    pub url: String,
    pub app_addresses: Vec<String>,
    pub file_ids: Vec<String>,
    pub notes: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: String,
    pub pubkey: String,
    pub url: String,
    pub mime_type: String,
    pub hash: String,
    pub size: String,
    pub version: String,
    pub created_at: u64,
}

pub fn parse_release(event: &RawEvent) -> Release {
    let tags = TagMap::new(&event.tags);
    Release {
        id: event.id.clone(),
        pubkey: event.pubkey.clone(),
        npub: npub(&event.pubkey),
        d_tag: tags.string("d"),
        url: tags.string("url"),
        app_addresses: event.tag_values("a").map(str::to_string).collect(),
        file_ids: event.tag_values("e").map(str::to_string).collect(),
        notes: event.content.clone(),
        created_at: event.created_at,
    }
}

pub fn parse_file_metadata(event: &RawEvent) -> FileMetadata {
    let tags = TagMap::new(&event.tags);
    FileMetadata {
        id: event.id.clone(),
        pubkey: event.pubkey.clone(),
        url: tags.string("url"),
        mime_type: tags.string("m"),
        hash: tags.string("x"),
        size: tags.string("size"),
        version: tags.string("version"),
        created_at: event.created_at,
    }
}
