//! Secure ballot protocol and key custody for an electronic voting backend.
//!
//! Voters submit hashed and signed choices, which are checked and then stored
//! encrypted to the election's key. Managers count them using a key held by an
//! external key management service. A periodic monitor watches closed
//! elections for tampering, and every security-relevant decision is audited.

#[macro_use]
extern crate rocket;

use rocket::{Build, Rocket};

pub mod api;
pub mod audit;
pub mod ballot;
pub mod config;
pub mod error;
pub mod integrity;
pub mod keys;
pub mod kms;
pub mod logging;
pub mod model;
pub mod periodic_task;
pub mod store;

use config::{ConfigFairing, DatabaseFairing, KmsFairing, ProtocolFairing};
use integrity::IntegrityFairing;
use logging::LoggerFairing;

/// The server, with every fairing attached in dependency order.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(KmsFairing)
        .attach(ProtocolFairing)
        .attach(IntegrityFairing)
        .attach(LoggerFairing)
}
