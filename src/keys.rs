//! Generation, rotation and use of key pairs held by the KMS.

use std::sync::Arc;

use chrono::Utc;
use evote_crypto::{
    generate_asymmetric, sign, CryptoError, KeyRole, SealedKeyPair, SignatureKey,
};
use rocket::tokio::task::spawn_blocking;
use zeroize::Zeroizing;

use crate::audit::{AuditEntry, AuditKind, AuditLog, Severity};
use crate::error::{Error, Result};
use crate::kms::{KeyKind, KeyService};
use crate::model::{
    election::{Election, ElectionId, ElectionPhase},
    voter::UserId,
};
use crate::store::ElectionStore;

pub struct KeyCustody {
    elections: Arc<dyn ElectionStore>,
    kms: Arc<dyn KeyService>,
    audit: AuditLog,
}

impl KeyCustody {
    pub fn new(
        elections: Arc<dyn ElectionStore>,
        kms: Arc<dyn KeyService>,
        audit: AuditLog,
    ) -> Self {
        Self {
            elections,
            kms,
            audit,
        }
    }

    async fn require_kms(&self) -> Result<()> {
        if self.kms.probe().await {
            Ok(())
        } else {
            Err(Error::ServiceUnavailable(
                "key service did not answer probe".to_string(),
            ))
        }
    }

    /// An election whose keys may still change.
    async fn upcoming_election(&self, election_id: ElectionId) -> Result<Election> {
        let election = self
            .elections
            .election(election_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))?;
        if election.phase(Utc::now()) != ElectionPhase::Upcoming {
            return Err(Error::BadRequest(format!(
                "keys of election {election_id} are fixed once voting starts"
            )));
        }
        Ok(election)
    }

    pub async fn provision_election_keys(
        &self,
        election_id: ElectionId,
        passphrase: &[u8],
        manager_id: UserId,
    ) -> Result<()> {
        self.upcoming_election(election_id).await?;
        self.require_kms().await?;
        let keys = generate(KeyRole::Encryption, passphrase).await?;
        self.kms
            .store_keys(KeyKind::Election, election_id, &keys)
            .await?;
        self.audit
            .record(
                AuditEntry::new(
                    AuditKind::KeysProvisioned,
                    Severity::None,
                    format!("Manager {manager_id} created election keys"),
                )
                .election(election_id)
                .subject(manager_id),
            )
            .await;
        Ok(())
    }

    /// Replace the election's key pair, e.g. after a lost tally passphrase.
    pub async fn rotate_election_keys(
        &self,
        election_id: ElectionId,
        passphrase: &[u8],
        manager_id: UserId,
    ) -> Result<()> {
        self.upcoming_election(election_id).await?;
        self.require_kms().await?;
        let keys = generate(KeyRole::Encryption, passphrase).await?;
        self.kms
            .rotate_keys(KeyKind::Election, election_id, &keys)
            .await?;
        self.audit
            .record(
                AuditEntry::new(
                    AuditKind::KeysRotated,
                    Severity::None,
                    format!("Manager {manager_id} regenerated election keys"),
                )
                .election(election_id)
                .subject(manager_id),
            )
            .await;
        Ok(())
    }

    /// Destroy the election's keys, making its ballots permanently unreadable.
    /// Part of deleting an election, so only allowed while it may change.
    pub async fn destroy_election_keys(
        &self,
        election_id: ElectionId,
        manager_id: UserId,
    ) -> Result<()> {
        if let Some(election) = self.elections.election(election_id).await? {
            if !election.is_mutable(Utc::now()) {
                return Err(Error::BadRequest(format!(
                    "election {election_id} can no longer be deleted"
                )));
            }
        }
        self.require_kms().await?;
        self.kms.delete_keys(KeyKind::Election, election_id).await?;
        self.audit
            .record(
                AuditEntry::new(
                    AuditKind::KeysDestroyed,
                    Severity::None,
                    format!("Manager {manager_id} destroyed election keys"),
                )
                .election(election_id)
                .subject(manager_id),
            )
            .await;
        Ok(())
    }

    pub async fn provision_user_keys(&self, user_id: UserId, passphrase: &[u8]) -> Result<()> {
        self.require_kms().await?;
        let keys = generate(KeyRole::Signing, passphrase).await?;
        self.kms.store_keys(KeyKind::User, user_id, &keys).await?;
        self.audit
            .record(
                AuditEntry::new(
                    AuditKind::KeysProvisioned,
                    Severity::None,
                    format!("User {user_id} created signing keys"),
                )
                .subject(user_id),
            )
            .await;
        Ok(())
    }

    /// Sign `data` with the user's own key, unsealed with their passphrase.
    pub async fn sign_for_user(
        &self,
        user_id: UserId,
        passphrase: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>> {
        self.require_kms().await?;
        let sealed = self.kms.private_key(KeyKind::User, user_id).await?;
        let private = match sealed.unseal(passphrase) {
            Ok(private) => private,
            Err(CryptoError::AuthenticationFailed) => {
                self.audit
                    .record(
                        AuditEntry::new(
                            AuditKind::SignatureRejected,
                            Severity::High,
                            format!("User {user_id} supplied a wrong signing passphrase"),
                        )
                        .subject(user_id),
                    )
                    .await;
                return Err(Error::AuthenticationFailed);
            }
            Err(e) => return Err(e.into()),
        };
        let signature = sign(data, &SignatureKey::from_der(&private)?);
        self.audit
            .record(
                AuditEntry::new(
                    AuditKind::SignatureIssued,
                    Severity::None,
                    format!("Signed on behalf of user {user_id}"),
                )
                .subject(user_id),
            )
            .await;
        Ok(signature)
    }
}

/// Key generation is CPU-bound, so keep it off the async workers.
async fn generate(role: KeyRole, passphrase: &[u8]) -> Result<SealedKeyPair> {
    let passphrase = Zeroizing::new(passphrase.to_vec());
    Ok(spawn_blocking(move || generate_asymmetric(role, &passphrase)).await??)
}

#[cfg(test)]
mod tests {
    use evote_crypto::{verify, DecryptionKey};

    use super::*;
    use crate::audit::memory::MemoryAuditSink;
    use crate::kms::memory::MemoryKms;
    use crate::model::mongodb::Id;
    use crate::store::memory::MemoryStore;

    struct Custody {
        store: Arc<MemoryStore>,
        kms: Arc<MemoryKms>,
        sink: Arc<MemoryAuditSink>,
        custody: KeyCustody,
    }

    fn custody() -> Custody {
        let store = Arc::new(MemoryStore::default());
        let kms = Arc::new(MemoryKms::default());
        let sink = Arc::new(MemoryAuditSink::default());
        let custody = KeyCustody::new(store.clone(), kms.clone(), AuditLog::new(sink.clone()));
        Custody {
            store,
            kms,
            sink,
            custody,
        }
    }

    #[rocket::async_test]
    async fn election_keys_rotate_before_start() {
        let c = custody();
        let election = Election::upcoming_example();
        let manager = Id::new();
        c.store.insert_election(election.clone());

        c.custody
            .provision_election_keys(election.id, b"first", manager)
            .await
            .unwrap();
        c.custody
            .rotate_election_keys(election.id, b"second", manager)
            .await
            .unwrap();

        let sealed = c
            .kms
            .private_key(KeyKind::Election, election.id)
            .await
            .unwrap();
        assert!(sealed.unseal(b"first").is_err());
        DecryptionKey::from_der(&sealed.unseal(b"second").unwrap()).unwrap();
        assert_eq!(c.sink.of_kind(AuditKind::KeysRotated).len(), 1);
    }

    #[rocket::async_test]
    async fn election_keys_are_fixed_once_voting_starts() {
        let c = custody();
        let election = Election::open_example();
        c.store.insert_election(election.clone());

        let result = c
            .custody
            .rotate_election_keys(election.id, b"late", Id::new())
            .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));

        let result = c
            .custody
            .destroy_election_keys(election.id, Id::new())
            .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[rocket::async_test]
    async fn keys_of_a_counted_election_are_kept() {
        let c = custody();
        let mut election = Election::closed_example();
        election.results = Some(evote_crypto::seal(&[1; 32], b"{}").unwrap());
        c.store.insert_election(election.clone());

        let result = c
            .custody
            .destroy_election_keys(election.id, Id::new())
            .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
        assert!(c.sink.of_kind(AuditKind::KeysDestroyed).is_empty());
    }

    #[rocket::async_test]
    async fn destroyed_keys_are_gone() {
        let c = custody();
        let election = Election::upcoming_example();
        c.store.insert_election(election.clone());
        c.custody
            .provision_election_keys(election.id, b"key", Id::new())
            .await
            .unwrap();

        c.custody
            .destroy_election_keys(election.id, Id::new())
            .await
            .unwrap();
        assert!(!c.kms.contains(KeyKind::Election, election.id));
    }

    #[rocket::async_test]
    async fn user_signature_verifies_against_stored_public_key() {
        let c = custody();
        let user = Id::new();
        c.custody
            .provision_user_keys(user, b"my passphrase")
            .await
            .unwrap();

        let signature = c
            .custody
            .sign_for_user(user, b"my passphrase", b"alice")
            .await
            .unwrap();
        let public = c.kms.public_key(KeyKind::User, user).await.unwrap();
        assert!(verify(b"alice", &public, &signature));
        assert!(!verify(b"bob", &public, &signature));

    }

    #[rocket::async_test]
    async fn wrong_signing_passphrase_is_audited() {
        let c = custody();
        let user = Id::new();
        c.custody.provision_user_keys(user, b"right").await.unwrap();

        let result = c.custody.sign_for_user(user, b"wrong", b"alice").await;
        assert!(matches!(result, Err(Error::AuthenticationFailed)));

        let rejected = c.sink.of_kind(AuditKind::SignatureRejected);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].severity, Severity::High);
        assert_eq!(rejected[0].subject, Some(user));
        assert!(c.sink.of_kind(AuditKind::SignatureIssued).is_empty());
    }

    #[rocket::async_test]
    async fn nothing_happens_while_kms_is_down() {
        let c = custody();
        c.kms.set_available(false);
        let user = Id::new();
        let result = c.custody.provision_user_keys(user, b"pass").await;
        assert!(matches!(result, Err(Error::ServiceUnavailable(_))));
        assert!(c.sink.entries().is_empty());
    }
}
