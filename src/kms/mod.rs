//! Channel to the external key-management service.
//!
//! Private key material only ever crosses the wire inside an [`Envelope`]
//! keyed by a fresh ECDH exchange, so neither the network nor our own logs
//! see it in the clear.

use std::fmt::Display;

use evote_crypto::SealedKeyPair;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::mongodb::Id;

mod client;
mod envelope;
#[cfg(test)]
pub(crate) mod memory;

pub use client::KmsClient;
pub use envelope::Envelope;

/// What a key pair belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    User,
    Election,
}

impl KeyKind {
    fn path(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Election => "election",
        }
    }
}

impl Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// The public half of a key pair as served by the KMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    #[serde(with = "evote_crypto::serde_base64")]
    pub public_key: Vec<u8>,
}

/// Custody of key pairs, held outside this process.
#[rocket::async_trait]
pub trait KeyService: Send + Sync {
    /// Is the service reachable? Never fails; unreachable is `false`.
    async fn probe(&self) -> bool;

    async fn store_keys(&self, kind: KeyKind, owner: Id, keys: &SealedKeyPair) -> Result<()>;

    async fn rotate_keys(&self, kind: KeyKind, owner: Id, keys: &SealedKeyPair) -> Result<()>;

    /// DER-encoded public key of `owner`.
    async fn public_key(&self, kind: KeyKind, owner: Id) -> Result<Vec<u8>>;

    /// The sealed key pair of `owner`. Unsealing needs the owner's passphrase.
    async fn private_key(&self, kind: KeyKind, owner: Id) -> Result<SealedKeyPair>;

    async fn delete_keys(&self, kind: KeyKind, owner: Id) -> Result<()>;
}
