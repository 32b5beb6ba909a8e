//! Cryptographic building blocks for the e-vote backend.
//!
//! Nothing in here performs I/O. The crate composes well-known primitives
//! into the handful of operations the ballot protocol needs:
//!
//! - sealing private keys under a passphrase-derived AEAD key,
//! - encrypting ballot choices to an election key,
//! - signing and verifying voter choices,
//! - deriving transport keys from an ephemeral ECDH exchange,
//! - keyed hashing for tamper evidence.

mod aead;
mod error;
mod exchange;
mod kdf;
mod keys;
pub mod serde_base64;

pub use aead::{open, seal, SealedData, AEAD_KEY_LEN, NONCE_LEN, TAG_LEN};
pub use error::{CryptoError, Result};
pub use exchange::EphemeralExchange;
pub use kdf::{derive_key, hmac, verify_hmac, HmacSha256, PBKDF2_ITERATIONS};
pub use keys::{
    generate_asymmetric, sign, unseal_private, verify, DecryptionKey, EncryptionKey, KeyRole,
    SealedKeyPair, SignatureKey, RSA_BITS, SALT_LEN,
};
