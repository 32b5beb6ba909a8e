use std::sync::Arc;

use chrono::Duration;
use data_encoding::BASE64;
use log::{error, info};
use mongodb::{options::ClientOptions, Client as MongoClient, Database};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::audit::{AuditLog, MongoAuditSink};
use crate::ballot::{BallotProtocol, ProtocolSecrets};
use crate::keys::KeyCustody;
use crate::kms::KmsClient;
use crate::model::mongodb::ensure_indexes_exist;
use crate::store::{MongoStore, TimeoutStore};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    // secrets
    jwt_secret: String,
    vote_secret: String,
    internal_key: String,
}

impl Config {
    /// Valid lifetime of auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Secret key used to sign JWTs. Shared with the login service.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Secret key clients use to HMAC their ballot choice.
    pub fn vote_secret(&self) -> &[u8] {
        self.vote_secret.as_bytes()
    }

    /// Key under which election results are encrypted at rest.
    pub fn results_key(&self) -> Result<Zeroizing<Vec<u8>>, String> {
        let key = BASE64
            .decode(self.internal_key.as_bytes())
            .map_err(|e| format!("internal_key is not base64: {e}"))?;
        if key.len() != evote_crypto::AEAD_KEY_LEN {
            return Err(format!(
                "internal_key must decode to {} bytes, got {}",
                evote_crypto::AEAD_KEY_LEN,
                key.len()
            ));
        }
        Ok(Zeroizing::new(key))
    }
}

#[cfg(test)]
impl Config {
    pub fn example() -> Self {
        Self {
            auth_ttl: 3600,
            jwt_secret: "jwt secret".to_string(),
            vote_secret: "vote secret".to_string(),
            internal_key: BASE64.encode(&[42; 32]),
        }
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// Written out rather than `AdHoc::config` for symmetry with the other
/// fairings and control over error messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if let Err(e) = config.results_key() {
            error!("Invalid application config: {e}");
            return Err(rocket);
        }

        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    /// Seconds to wait for any one database operation.
    #[serde(default = "default_db_timeout")]
    db_timeout: u64,
    // secrets
    db_uri: String,
}

fn default_db_timeout() -> u64 {
    10
}

/// The store the rest of the application works against.
pub type AppStore = TimeoutStore<MongoStore>;

/// A fairing that loads the MongoDB config, connects to the database, ensures
/// indexes exist, and places a `Client`, a `Database` and an [`AppStore`] into
/// managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        let timeout = std::time::Duration::from_secs(config.db_timeout);
        let mut options = match ClientOptions::parse(&config.db_uri).await {
            Ok(options) => options,
            Err(e) => {
                error!("Invalid database URI: {e}");
                return Err(rocket);
            }
        };
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);
        let client = match MongoClient::with_options(options) {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database("evote");

        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        let store: AppStore = TimeoutStore::new(MongoStore::new(client.clone(), &db), timeout);
        rocket = rocket.manage(client).manage(db).manage(store);
        Ok(rocket)
    }
}

/// Configuration for the key management service.
#[derive(Deserialize)]
struct KmsConfig {
    kms_uri: String,
    #[serde(default = "default_kms_timeout")]
    kms_timeout: u64,
    // secrets
    kms_token: String,
}

fn default_kms_timeout() -> u64 {
    10
}

/// A fairing that loads the KMS config and places a `KmsClient` into managed
/// state. The service is not contacted until first use.
pub struct KmsFairing;

#[rocket::async_trait]
impl Fairing for KmsFairing {
    fn info(&self) -> Info {
        Info {
            name: "Key management service",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<KmsConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load KMS config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let timeout = std::time::Duration::from_secs(config.kms_timeout);
        let client = match KmsClient::new(&config.kms_uri, config.kms_token, timeout) {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to build KMS client: {e}");
                return Err(rocket);
            }
        };
        info!("Loaded KMS config for {}", config.kms_uri);

        rocket = rocket.manage(client);
        Ok(rocket)
    }
}

/// A fairing that wires the managed store, KMS client and config into the
/// ballot protocol and key custody services, and manages those along with the
/// audit log. Must be attached after the config, database and KMS fairings.
pub struct ProtocolFairing;

#[rocket::async_trait]
impl Fairing for ProtocolFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ballot protocol",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (Some(config), Some(db), Some(store), Some(kms)) = (
            rocket.state::<Config>(),
            rocket.state::<Database>(),
            rocket.state::<AppStore>(),
            rocket.state::<KmsClient>(),
        ) else {
            error!("Protocol dependencies were not in managed state");
            return Err(rocket);
        };

        let secrets = match config
            .results_key()
            .map_err(|e| e.to_string())
            .and_then(|key| {
                ProtocolSecrets::new(config.vote_secret(), &key).map_err(|e| e.to_string())
            }) {
            Ok(secrets) => secrets,
            Err(e) => {
                error!("Invalid protocol secrets: {e}");
                return Err(rocket);
            }
        };

        let store = Arc::new(store.clone());
        let kms = Arc::new(kms.clone());
        let audit = AuditLog::new(Arc::new(MongoAuditSink::new(db)));
        let protocol = BallotProtocol::new(
            store.clone(),
            store.clone(),
            kms.clone(),
            audit.clone(),
            secrets,
        );
        let custody = KeyCustody::new(store, kms, audit.clone());

        rocket = rocket.manage(audit).manage(protocol).manage(custody);
        Ok(rocket)
    }
}
