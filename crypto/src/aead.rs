use aes_gcm::{
    aead::{generic_array::GenericArray, AeadInPlace, KeyInit},
    Aes256Gcm,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

pub const AEAD_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// AES-256-GCM output with a detached nonce and tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedData {
    #[serde(with = "crate::serde_base64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::serde_base64")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::serde_base64")]
    pub tag: Vec<u8>,
}

impl SealedData {
    pub fn open(&self, key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        open(key, &self.ciphertext, &self.iv, &self.tag)
    }
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey(format!("AEAD key must be {AEAD_KEY_LEN} bytes")))
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<SealedData> {
    let cipher = cipher(key)?;
    let mut iv = vec![0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| CryptoError::Encryption("AES-GCM refused the payload".to_string()))?;
    Ok(SealedData {
        ciphertext: buffer,
        iv,
        tag: tag.to_vec(),
    })
}

/// Decrypt and authenticate. Any tag mismatch is [`CryptoError::AuthenticationFailed`];
/// no plaintext is ever returned for a ciphertext that does not verify.
pub fn open(key: &[u8], ciphertext: &[u8], iv: &[u8], tag: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = cipher(key)?;
    if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(iv),
            b"",
            buffer.as_mut_slice(),
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok(buffer)
}
