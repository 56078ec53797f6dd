use serde::{Deserialize, Serialize};

use super::{npub, TagMap};
use crate::events::RawEvent;

/// Zap receipt (kind 9735) with the embedded zap request unpacked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zap {
    pub id: String,
    pub pubkey: String,
    pub npub: String,
    pub created_at: u64,
    pub amount_sats: u64,
    /// Comment carried by the embedded zap request.
    pub description: String,
    pub preimage: String,
    pub bolt11: String,
    /// Id of the embedded zap request, when the description decodes.
    pub request_id: Option<String>,
    pub sender_pubkey: String,
    pub sender_npub: String,
    pub recipient: String,
    pub app_address: Option<String>,
    pub event_ref: Option<String>,
    pub event: RawEvent,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddedRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    pubkey: String,
    #[serde(default)]
    content: String,
}

pub fn parse_zap(event: &RawEvent) -> Zap {
    let tags = TagMap::new(&event.tags);
    let bolt11 = tags.string("bolt11");
    let request = embedded_request(event).unwrap_or_default();
    let sender_npub = if request.pubkey.is_empty() {
        String::new()
    } else {
        npub(&request.pubkey)
    };

    Zap {
        id: event.id.clone(),
        pubkey: event.pubkey.clone(),
        npub: npub(&event.pubkey),
        created_at: event.created_at,
        amount_sats: bolt11_amount_sats(&bolt11),
        description: request.content,
        preimage: tags.string("preimage"),
        bolt11,
        request_id: request.id,
        sender_pubkey: request.pubkey,
        sender_npub,
        recipient: tags.string("p"),
        app_address: tags.get("a").map(str::to_string),
        event_ref: tags.get("e").map(str::to_string),
        event: event.clone(),
    }
}

/// Id of the zap request embedded in the receipt's `description` tag.
pub(crate) fn embedded_request_id(event: &RawEvent) -> Option<String> {
    embedded_request(event).and_then(|request| request.id)
}

fn embedded_request(event: &RawEvent) -> Option<EmbeddedRequest> {
    let description = event.tag_value("description")?;
    serde_json::from_str(description).ok()
}

/// Amount encoded in the human-readable part of a BOLT11 invoice.
///
/// `lnbc<digits>[m|u|n|p]`, case-insensitive; 0 when absent.
pub fn bolt11_amount_sats(invoice: &str) -> u64 {
    let lower = invoice.to_ascii_lowercase();
    for (start, _) in lower.match_indices("lnbc") {
        let rest = &lower[start + 4..];
        let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits_len == 0 {
            continue;
        }
        let Ok(value) = rest[..digits_len].parse::<u64>() else {
            return 0;
        };
        return match rest[digits_len..].chars().next() {
            Some('m') => value.saturating_mul(100_000),
            Some('u') => value.saturating_mul(100),
            Some('n') => value / 10,
            Some('p') => value / 10_000,
            _ => value.saturating_mul(100_000_000),
        };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::KIND_ZAP_RECEIPT;

    fn receipt(tags: Vec<Vec<String>>) -> RawEvent {
        RawEvent {
            id: "7".repeat(64),
            pubkey: "6".repeat(64),
            created_at: 1_700_000_100,
            kind: KIND_ZAP_RECEIPT,
            tags,
            content: String::new(),
            sig: None,
        }
    }

    #[test]
    fn amount_multipliers() {
        assert_eq!(bolt11_amount_sats("lnbc10u1pjexample"), 1_000);
        assert_eq!(bolt11_amount_sats("lnbc2m1p"), 200_000);
        assert_eq!(bolt11_amount_sats("LNBC2500N1P"), 250);
        assert_eq!(bolt11_amount_sats("lnbc10000p1"), 1);
        assert_eq!(bolt11_amount_sats("lnbc1"), 100_000_000);
        assert_eq!(bolt11_amount_sats("lntb10u"), 0);
        assert_eq!(bolt11_amount_sats(""), 0);
    }

    #[test]
    fn unpacks_embedded_request() {
        let request = serde_json::json!({
            "id": "a".repeat(64),
            "pubkey": "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d",
            "kind": 9734,
            "content": "great app",
            "tags": [],
        });
        let zap = parse_zap(&receipt(vec![
            vec!["p".into(), "recipient".into()],
            vec!["bolt11".into(), "lnbc210n1pexample".into()],
            vec!["description".into(), request.to_string()],
            vec!["preimage".into(), "secret".into()],
            vec!["a".into(), "32267:pk:app".into()],
        ]));

        assert_eq!(zap.amount_sats, 21);
        assert_eq!(zap.description, "great app");
        assert_eq!(zap.request_id.as_deref(), Some("a".repeat(64).as_str()));
        assert!(zap.sender_npub.starts_with("npub1"));
        assert_eq!(zap.preimage, "secret");
        assert_eq!(zap.recipient, "recipient");
        assert_eq!(zap.app_address.as_deref(), Some("32267:pk:app"));
        assert_eq!(zap.event_ref, None);
    }

    #[test]
    fn broken_description_is_tolerated() {
        let zap = parse_zap(&receipt(vec![vec!["description".into(), "{not json".into()]]));
        assert_eq!(zap.description, "");
        assert_eq!(zap.sender_pubkey, "");
        assert_eq!(zap.request_id, None);
        assert_eq!(zap.amount_sats, 0);
    }
}
