use std::time::Duration;

use data_encoding::BASE64;
use evote_crypto::{EphemeralExchange, SealedKeyPair};
use log::{debug, warn};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::Id;

use super::{Envelope, KeyKind, KeyService, PublicKeyRecord};

/// Header carrying the static credential for the KMS.
pub const ACCESS_TOKEN_HEADER: &str = "access-token";
/// Header carrying the caller's ephemeral public key, base64 encoded.
pub const PUBLIC_KEY_HEADER: &str = "public-key";

/// The KMS's ephemeral key for wrapping an upload.
#[derive(Deserialize)]
struct Communication {
    id: String,
    #[serde(with = "evote_crypto::serde_base64")]
    public_key: Vec<u8>,
}

#[derive(Serialize)]
struct KeyUpload {
    communication_id: String,
    owner: String,
    envelope: Envelope,
}

/// HTTP client for the external KMS. Every call is bounded by the configured
/// timeout.
#[derive(Clone)]
pub struct KmsClient {
    http: Client,
    base_uri: String,
    token: String,
}

impl KmsClient {
    pub fn new(base_uri: &str, token: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(unavailable)?;
        Ok(Self {
            http,
            base_uri: base_uri.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{path}", self.base_uri))
            .header(ACCESS_TOKEN_HEADER, &self.token)
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(unavailable)?;
        check_status(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        response.json().await.map_err(|e| {
            Error::ServiceUnavailable(format!("unreadable response from key service: {e}"))
        })
    }

    /// Fetch an envelope-wrapped record addressed to a fresh exchange.
    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let exchange = EphemeralExchange::new();
        let request = self
            .request(Method::GET, path)
            .header(PUBLIC_KEY_HEADER, BASE64.encode(&exchange.public_key()));
        let envelope: Envelope = Self::decode(Self::send(request).await?).await?;
        envelope.open_json(&exchange)
    }

    /// Wrap `keys` for the KMS's current communication key and upload them.
    async fn upload(&self, method: Method, path: &str, owner: Id, keys: &SealedKeyPair) -> Result<()> {
        let channel: Communication =
            Self::decode(Self::send(self.request(Method::GET, "keys/communication")).await?)
                .await?;

        let exchange = EphemeralExchange::new();
        let body = KeyUpload {
            communication_id: channel.id,
            owner: owner.to_string(),
            envelope: Envelope::seal_json(&exchange, &channel.public_key, keys)?,
        };
        let request = self
            .request(method, path)
            .header(PUBLIC_KEY_HEADER, BASE64.encode(&exchange.public_key()))
            .json(&body);
        Self::send(request).await?;
        Ok(())
    }
}

#[rocket::async_trait]
impl KeyService for KmsClient {
    async fn probe(&self) -> bool {
        match self.request(Method::GET, "keys/").send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("Key service probe returned {}", response.status());
                false
            }
            Err(e) => {
                warn!("Key service unreachable: {e}");
                false
            }
        }
    }

    async fn store_keys(&self, kind: KeyKind, owner: Id, keys: &SealedKeyPair) -> Result<()> {
        debug!("Storing {kind} keys for {owner}");
        self.upload(Method::POST, &format!("keys/{kind}"), owner, keys)
            .await
    }

    async fn rotate_keys(&self, kind: KeyKind, owner: Id, keys: &SealedKeyPair) -> Result<()> {
        debug!("Rotating {kind} keys for {owner}");
        self.upload(Method::PATCH, &format!("keys/{kind}/{owner}"), owner, keys)
            .await
    }

    async fn public_key(&self, kind: KeyKind, owner: Id) -> Result<Vec<u8>> {
        let record: PublicKeyRecord = self.fetch(&format!("keys/{kind}/public/{owner}")).await?;
        Ok(record.public_key)
    }

    async fn private_key(&self, kind: KeyKind, owner: Id) -> Result<SealedKeyPair> {
        self.fetch(&format!("keys/{kind}/private/{owner}")).await
    }

    async fn delete_keys(&self, kind: KeyKind, owner: Id) -> Result<()> {
        debug!("Deleting {kind} keys for {owner}");
        Self::send(self.request(Method::DELETE, &format!("keys/{kind}/{owner}"))).await?;
        Ok(())
    }
}

fn unavailable(err: reqwest::Error) -> Error {
    Error::ServiceUnavailable(err.to_string())
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status == StatusCode::NOT_FOUND {
        Err(Error::not_found(format!(
            "Key service resource {}",
            response.url().path()
        )))
    } else if status.is_server_error() {
        Err(Error::ServiceUnavailable(format!(
            "key service responded {status}"
        )))
    } else {
        Err(Error::BadRequest(format!(
            "key service rejected request with {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Nothing listens on the discard port in the test environment.
    fn unreachable_client() -> KmsClient {
        KmsClient::new(
            "http://127.0.0.1:9/",
            "token".to_string(),
            Duration::from_millis(500),
        )
        .unwrap()
    }

    #[test]
    fn base_uri_is_normalised() {
        let client = unreachable_client();
        assert_eq!(client.base_uri, "http://127.0.0.1:9");
    }

    #[rocket::async_test]
    async fn probe_reports_unreachable_service() {
        assert!(!unreachable_client().probe().await);
    }

    #[rocket::async_test]
    async fn fetch_from_unreachable_service_is_unavailable() {
        let result = unreachable_client()
            .public_key(KeyKind::User, Id::new())
            .await;
        assert!(matches!(result, Err(Error::ServiceUnavailable(_))));
    }
}
