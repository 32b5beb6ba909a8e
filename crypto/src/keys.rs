use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use rand::{rngs::OsRng, RngCore};
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    Oaep, RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::aead::{self, AEAD_KEY_LEN};
use crate::error::{CryptoError, Result};
use crate::kdf::derive_key;

/// Modulus size of election encryption keys.
pub const RSA_BITS: usize = 2048;
/// Length of the per-key PBKDF2 salt.
pub const SALT_LEN: usize = 16;

/// What a generated key pair will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    /// RSA-OAEP: ballots are encrypted to the election's public key.
    Encryption,
    /// ECDSA P-256: voters sign their choice.
    Signing,
}

/// A key pair whose private half is AEAD-encrypted under a passphrase-derived key.
///
/// This is the only form in which private key material leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKeyPair {
    pub role: KeyRole,
    /// SPKI DER.
    #[serde(with = "crate::serde_base64")]
    pub public_key: Vec<u8>,
    /// PKCS#8 DER, encrypted.
    #[serde(with = "crate::serde_base64")]
    pub encrypted_private: Vec<u8>,
    #[serde(with = "crate::serde_base64")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::serde_base64")]
    pub tag: Vec<u8>,
    #[serde(with = "crate::serde_base64")]
    pub salt: Vec<u8>,
}

impl SealedKeyPair {
    /// Derive the sealing key from `passphrase` and recover the private half.
    pub fn unseal(&self, passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let key = derive_key(passphrase, &self.salt, AEAD_KEY_LEN);
        unseal_private(&self.encrypted_private, &key, &self.iv, &self.tag)
    }
}

/// Generate a fresh key pair for `role` and seal its private half under `passphrase`.
pub fn generate_asymmetric(role: KeyRole, passphrase: &[u8]) -> Result<SealedKeyPair> {
    let mut rng = OsRng;
    let (public_key, private_key) = match role {
        KeyRole::Encryption => {
            let private = RsaPrivateKey::new(&mut rng, RSA_BITS)
                .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
            let public = private
                .to_public_key()
                .to_public_key_der()
                .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
            let private = private
                .to_pkcs8_der()
                .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
            (
                public.as_bytes().to_vec(),
                Zeroizing::new(private.as_bytes().to_vec()),
            )
        }
        KeyRole::Signing => {
            let private = SigningKey::random(&mut rng);
            let public = private
                .verifying_key()
                .to_public_key_der()
                .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
            let private = private
                .to_pkcs8_der()
                .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
            (
                public.as_bytes().to_vec(),
                Zeroizing::new(private.as_bytes().to_vec()),
            )
        }
    };

    let mut salt = vec![0u8; SALT_LEN];
    rng.try_fill_bytes(&mut salt)
        .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
    let key = derive_key(passphrase, &salt, AEAD_KEY_LEN);
    let sealed =
        aead::seal(&key, &private_key).map_err(|e| CryptoError::KeyGen(e.to_string()))?;

    Ok(SealedKeyPair {
        role,
        public_key,
        encrypted_private: sealed.ciphertext,
        iv: sealed.iv,
        tag: sealed.tag,
        salt,
    })
}

/// AEAD-decrypt a sealed private key. A tag that does not verify is a hard
/// [`CryptoError::AuthenticationFailed`].
pub fn unseal_private(
    encrypted_private: &[u8],
    derived_key: &[u8],
    iv: &[u8],
    tag: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    aead::open(derived_key, encrypted_private, iv, tag)
}

/// An election public key, used to encrypt ballot choices.
#[derive(Debug, Clone)]
pub struct EncryptionKey(RsaPublicKey);

impl EncryptionKey {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        RsaPublicKey::from_public_key_der(der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.0
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }
}

/// An election private key, used only while tallying.
pub struct DecryptionKey(RsaPrivateKey);

impl DecryptionKey {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.0
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::Decryption)
    }
}

/// A voter's private signing key.
pub struct SignatureKey(SigningKey);

impl SignatureKey {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        SigningKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

/// ECDSA P-256 / SHA-256 signature over `data`, DER encoded.
pub fn sign(data: &[u8], private_key: &SignatureKey) -> Vec<u8> {
    let signature: Signature = private_key.0.sign(data);
    signature.to_der().as_bytes().to_vec()
}

/// Check a DER signature against an SPKI DER public key.
///
/// Never errors: malformed keys or signatures simply do not verify.
pub fn verify(data: &[u8], public_key: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_public_key_der(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(signature) else {
        return false;
    };
    key.verify(data, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signing_pair(passphrase: &[u8]) -> (SealedKeyPair, SignatureKey) {
        let sealed = generate_asymmetric(KeyRole::Signing, passphrase).unwrap();
        let der = sealed.unseal(passphrase).unwrap();
        let key = SignatureKey::from_der(&der).unwrap();
        (sealed, key)
    }

    #[test]
    fn signatures_verify_against_their_own_public_key() {
        let (sealed, key) = signing_pair(b"voter passphrase");
        for data in [&b""[..], b"blank", b"64b7f0c2a1d3e4f5a6b7c8d9"] {
            let signature = sign(data, &key);
            assert!(verify(data, &sealed.public_key, &signature));
        }
    }

    #[test]
    fn signatures_from_another_key_do_not_verify() {
        let (sealed, _) = signing_pair(b"first");
        let (_, other_key) = signing_pair(b"second");
        let signature = sign(b"candidate", &other_key);
        assert!(!verify(b"candidate", &sealed.public_key, &signature));
    }

    #[test]
    fn verify_is_false_for_garbage() {
        let (sealed, key) = signing_pair(b"pass");
        let signature = sign(b"candidate", &key);
        assert!(!verify(b"candidate2", &sealed.public_key, &signature));
        assert!(!verify(b"candidate", &sealed.public_key, b"not a signature"));
        assert!(!verify(b"candidate", b"not a key", &signature));
    }

    #[test]
    fn wrong_passphrase_is_an_authentication_failure() {
        let sealed = generate_asymmetric(KeyRole::Signing, b"correct").unwrap();
        assert!(matches!(
            sealed.unseal(b"incorrect"),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn tampered_private_half_is_an_authentication_failure() {
        let mut sealed = generate_asymmetric(KeyRole::Signing, b"correct").unwrap();
        let last = sealed.encrypted_private.len() - 1;
        sealed.encrypted_private[last] ^= 0x80;
        assert!(matches!(
            sealed.unseal(b"correct"),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn election_keys_encrypt_and_decrypt_choices() {
        let sealed = generate_asymmetric(KeyRole::Encryption, b"tally key").unwrap();
        assert_eq!(sealed.role, KeyRole::Encryption);
        let public = EncryptionKey::from_der(&sealed.public_key).unwrap();
        let private = DecryptionKey::from_der(&sealed.unseal(b"tally key").unwrap()).unwrap();

        let a = public.encrypt(b"blank").unwrap();
        let b = public.encrypt(b"blank").unwrap();
        assert_ne!(a, b, "OAEP is randomised");
        assert_eq!(private.decrypt(&a).unwrap().as_slice(), b"blank");
        assert_eq!(private.decrypt(&b).unwrap().as_slice(), b"blank");
        assert!(matches!(
            private.decrypt(b"garbage"),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn sealed_pairs_survive_serialisation() {
        let sealed = generate_asymmetric(KeyRole::Signing, b"pass").unwrap();
        let json = serde_json::to_string(&sealed).unwrap();
        assert!(json.contains("\"role\":\"signing\""));
        let back: SealedKeyPair = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sealed);
        assert!(back.unseal(b"pass").is_ok());
    }
}
