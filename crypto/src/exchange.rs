use p256::{ecdh::EphemeralSecret, elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::aead::AEAD_KEY_LEN;
use crate::error::{CryptoError, Result};
use crate::kdf::derive_key;

/// One side of a single-use P-256 Diffie-Hellman exchange.
///
/// A new exchange is created for every request; the secret half never
/// leaves this struct and is dropped with it.
pub struct EphemeralExchange {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralExchange {
    pub fn new() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Uncompressed SEC1 encoding of our public point.
    pub fn public_key(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Derive the symmetric key shared with the holder of `peer_public`.
    pub fn shared_key(&self, peer_public: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let peer = PublicKey::from_sec1_bytes(peer_public)
            .map_err(|_| CryptoError::InvalidKey("peer key is not a P-256 point".to_string()))?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(derive_key(
            shared.raw_secret_bytes().as_slice(),
            salt,
            AEAD_KEY_LEN,
        ))
    }
}

impl Default for EphemeralExchange {
    fn default() -> Self {
        Self::new()
    }
}
