use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub type HmacSha256 = Hmac<Sha256>;

/// PBKDF2 round count. Not a parameter of [`derive_key`], so callers cannot
/// weaken it.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Stretch `secret` into a key of `length` bytes with PBKDF2-HMAC-SHA256.
pub fn derive_key(secret: &[u8], salt: &[u8], length: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; length]);
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// HMAC-SHA256 of `data` under `secret`.
pub fn hmac(data: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison of `expected` against the HMAC of `data`.
pub fn verify_hmac(data: &[u8], secret: &[u8], expected: &[u8]) -> bool {
    hmac(data, secret).ct_eq(expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_are_deterministic_and_salted() {
        let a = derive_key(b"hunter2", b"salt-one", 32);
        let b = derive_key(b"hunter2", b"salt-one", 32);
        let c = derive_key(b"hunter2", b"salt-two", 32);
        assert_eq!(a.len(), 32);
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn hmac_detects_any_change() {
        let tag = hmac(b"candidate-1", b"vote secret");
        assert!(verify_hmac(b"candidate-1", b"vote secret", &tag));
        assert!(!verify_hmac(b"candidate-2", b"vote secret", &tag));
        assert!(!verify_hmac(b"candidate-1", b"other secret", &tag));
        assert!(!verify_hmac(b"candidate-1", b"vote secret", &tag[..16]));
    }
}
