use evote_crypto::{serde_base64, EphemeralExchange};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::Result;

/// An AEAD payload addressed to the holder of one ephemeral ECDH key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The sender's ephemeral public key.
    #[serde(with = "serde_base64")]
    pub public_key: Vec<u8>,
    #[serde(with = "serde_base64")]
    pub data: Vec<u8>,
    #[serde(with = "serde_base64")]
    pub iv: Vec<u8>,
    #[serde(with = "serde_base64")]
    pub tag: Vec<u8>,
}

impl Envelope {
    /// Seal `payload` from `sender` to the holder of `recipient_public`.
    pub fn seal(
        sender: &EphemeralExchange,
        recipient_public: &[u8],
        payload: &[u8],
    ) -> Result<Self> {
        let sender_public = sender.public_key();
        let key = sender.shared_key(recipient_public, &salt(&sender_public, recipient_public))?;
        let sealed = evote_crypto::seal(&key, payload)?;
        Ok(Self {
            public_key: sender_public,
            data: sealed.ciphertext,
            iv: sealed.iv,
            tag: sealed.tag,
        })
    }

    /// Open an envelope addressed to `recipient`. Fails closed if the tag
    /// does not verify.
    pub fn open(&self, recipient: &EphemeralExchange) -> Result<Zeroizing<Vec<u8>>> {
        let salt = salt(&self.public_key, &recipient.public_key());
        let key = recipient.shared_key(&self.public_key, &salt)?;
        Ok(evote_crypto::open(&key, &self.data, &self.iv, &self.tag)?)
    }

    pub fn seal_json<T: Serialize>(
        sender: &EphemeralExchange,
        recipient_public: &[u8],
        payload: &T,
    ) -> Result<Self> {
        let payload = Zeroizing::new(serde_json::to_vec(payload)?);
        Self::seal(sender, recipient_public, &payload)
    }

    pub fn open_json<T: DeserializeOwned>(&self, recipient: &EphemeralExchange) -> Result<T> {
        let payload = self.open(recipient)?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

fn salt(sender_public: &[u8], recipient_public: &[u8]) -> Vec<u8> {
    [sender_public, recipient_public].concat()
}
