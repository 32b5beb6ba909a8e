//! Serialise byte buffers as standard base64 strings.
//!
//! Use with `#[serde(with = "evote_crypto::serde_base64")]`.

use data_encoding::BASE64;
use serde::{de::Error, Deserialize, Deserializer, Serializer};

pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&BASE64.encode(bytes))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    BASE64.decode(encoded.as_bytes()).map_err(D::Error::custom)
}
