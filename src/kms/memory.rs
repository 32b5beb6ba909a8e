//! In-process KMS for tests. Every record it hands out travels through a real
//! [`Envelope`], so the unwrap path is the same as against the HTTP service.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use evote_crypto::{EphemeralExchange, SealedKeyPair};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::Id;

use super::{Envelope, KeyKind, KeyService, PublicKeyRecord};

pub struct MemoryKms {
    records: Mutex<HashMap<(KeyKind, Id), SealedKeyPair>>,
    available: AtomicBool,
    tamper: AtomicBool,
    private_fetches: AtomicUsize,
}

impl Default for MemoryKms {
    fn default() -> Self {
        Self {
            records: Mutex::default(),
            available: AtomicBool::new(true),
            tamper: AtomicBool::new(false),
            private_fetches: AtomicUsize::new(0),
        }
    }
}

impl MemoryKms {
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Corrupt every envelope from now on, as a meddling intermediary would.
    pub fn tamper_responses(&self) {
        self.tamper.store(true, Ordering::SeqCst);
    }

    pub fn private_fetches(&self) -> usize {
        self.private_fetches.load(Ordering::SeqCst)
    }

    pub fn contains(&self, kind: KeyKind, owner: Id) -> bool {
        self.records.lock().unwrap().contains_key(&(kind, owner))
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ServiceUnavailable("key service is down".to_string()))
        }
    }

    fn record(&self, kind: KeyKind, owner: Id) -> Result<SealedKeyPair> {
        self.records
            .lock()
            .unwrap()
            .get(&(kind, owner))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{kind} keys for {owner}")))
    }

    /// Carry `record` across a fresh ECDH channel, the way the service does.
    fn deliver<T: Serialize + DeserializeOwned>(&self, record: &T) -> Result<T> {
        let caller = EphemeralExchange::new();
        let service = EphemeralExchange::new();
        let mut envelope = Envelope::seal_json(&service, &caller.public_key(), record)?;
        if self.tamper.load(Ordering::SeqCst) {
            envelope.tag[0] ^= 0xff;
        }
        envelope.open_json(&caller)
    }

    /// Accept an upload across a fresh ECDH channel.
    fn receive(&self, keys: &SealedKeyPair) -> Result<SealedKeyPair> {
        let service = EphemeralExchange::new();
        let caller = EphemeralExchange::new();
        let envelope = Envelope::seal_json(&caller, &service.public_key(), keys)?;
        envelope.open_json(&service)
    }
}

#[rocket::async_trait]
impl KeyService for MemoryKms {
    async fn probe(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn store_keys(&self, kind: KeyKind, owner: Id, keys: &SealedKeyPair) -> Result<()> {
        self.ensure_available()?;
        let keys = self.receive(keys)?;
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&(kind, owner)) {
            return Err(Error::BadRequest(format!("{kind} keys for {owner} exist")));
        }
        records.insert((kind, owner), keys);
        Ok(())
    }

    async fn rotate_keys(&self, kind: KeyKind, owner: Id, keys: &SealedKeyPair) -> Result<()> {
        self.ensure_available()?;
        let keys = self.receive(keys)?;
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&(kind, owner)) {
            Some(record) => {
                *record = keys;
                Ok(())
            }
            None => Err(Error::not_found(format!("{kind} keys for {owner}"))),
        }
    }

    async fn public_key(&self, kind: KeyKind, owner: Id) -> Result<Vec<u8>> {
        self.ensure_available()?;
        let record = PublicKeyRecord {
            public_key: self.record(kind, owner)?.public_key,
        };
        Ok(self.deliver(&record)?.public_key)
    }

    async fn private_key(&self, kind: KeyKind, owner: Id) -> Result<SealedKeyPair> {
        self.ensure_available()?;
        self.private_fetches.fetch_add(1, Ordering::SeqCst);
        let record = self.record(kind, owner)?;
        self.deliver(&record)
    }

    async fn delete_keys(&self, kind: KeyKind, owner: Id) -> Result<()> {
        self.ensure_available()?;
        self.records
            .lock()
            .unwrap()
            .remove(&(kind, owner))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("{kind} keys for {owner}")))
    }
}
