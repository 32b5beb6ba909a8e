use thiserror::Error;

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGen(String),
    /// An AEAD tag did not verify: the ciphertext was altered or the key is wrong.
    #[error("Authentication tag mismatch")]
    AuthenticationFailed,
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
    #[error("Encryption failed: {0}")]
    Encryption(String),
    #[error("Decryption failed")]
    Decryption,
}
