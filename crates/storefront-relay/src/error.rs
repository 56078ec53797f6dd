use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("nostr client error: {0}")]
    NostrClient(#[from] nostr_sdk::client::Error),
    #[error("nostr key error: {0}")]
    NostrKey(#[from] nostr_sdk::nostr::key::Error),
    #[error("nostr tag error: {0}")]
    NostrTag(#[from] nostr_sdk::nostr::event::tag::Error),
    #[error("nostr event error: {0}")]
    NostrEvent(#[from] nostr_sdk::nostr::event::Error),
    #[error("serde json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("missing env var: {0}")]
    MissingEnv(&'static str),
    #[error("invalid config value for {name}: {reason}")]
    InvalidConfig { name: &'static str, reason: String },
    #[error("relay {url} unavailable: {reason}")]
    Transport { url: String, reason: String },
    #[error("failed to publish event to any relay ({failed} failed)")]
    PublishFailed { failed: usize },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("signer error: {0}")]
    Signer(String),
    #[error("mutex poisoned")]
    MutexPoisoned,
}

impl Error {
    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
