//! Signing capability consumed by the comment and zap-request builders.

use async_trait::async_trait;
use nostr_sdk::prelude::*;

use crate::events::{RawEvent, UnsignedEvent};
use crate::Error;

#[async_trait]
pub trait EventSigner: Send + Sync {
    /// Hex public key of the signing identity.
    fn public_key(&self) -> String;

    async fn sign(&self, event: UnsignedEvent) -> Result<RawEvent, Error>;
}

/// Local key signer backed by nostr-sdk [`Keys`].
#[derive(Debug, Clone)]
pub struct KeysSigner {
    keys: Keys,
}

impl KeysSigner {
    pub fn new(keys: Keys) -> Self {
        Self { keys }
    }

    /// Accepts hex or `nsec` secret keys.
    pub fn parse(secret_key: &str) -> Result<Self, Error> {
        Ok(Self::new(Keys::parse(secret_key)?))
    }

    pub fn generate() -> Self {
        Self::new(Keys::generate())
    }
}

#[async_trait]
impl EventSigner for KeysSigner {
    fn public_key(&self) -> String {
        self.keys.public_key().to_hex()
    }

    async fn sign(&self, event: UnsignedEvent) -> Result<RawEvent, Error> {
        let signed = event
            .to_builder()?
            .sign_with_keys(&self.keys)
            .map_err(|err| Error::Signer(err.to_string()))?;
        Ok(RawEvent::from_event(&signed))
    }
}
