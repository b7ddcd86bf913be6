//! Pull path: recovering secret material from the external store.
//!
//! Every replica or share is treated as untrusted. Items that fail to
//! parse, verify or decrypt are discarded and the next one is tried; only
//! exhausting all of them is an error.

use std::sync::Arc;

use ephemera_core::{
    attribute_name_short, recover_data_key, to_secret_share, AttributeEnvelope,
    CiphertextExpiration, DataType, Ed25519PublicKey, ItemKey, SecretSeed, SecretShare,
    ShareEnvelope, SymmetricKey,
};
use ephemera_dht::ExternalStore;

use crate::config::EngineConfig;
use crate::error::Result;

/// What the external store holds for an attribute.
#[derive(Clone, PartialEq, Eq)]
pub enum PulledComponent {
    /// A live component.
    Component {
        bytes: Vec<u8>,
        serialized_version: u8,
        /// False when no public key was available to check the signature.
        verified: bool,
    },
    /// Only signed deletion markers were found.
    Revoked,
    /// Nothing usable was found.
    Unavailable,
}

impl std::fmt::Debug for PulledComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Component {
                bytes,
                serialized_version,
                verified,
            } => f
                .debug_struct("Component")
                .field("len", &bytes.len())
                .field("serialized_version", serialized_version)
                .field("verified", verified)
                .finish(),
            Self::Revoked => f.write_str("Revoked"),
            Self::Unavailable => f.write_str("Unavailable"),
        }
    }
}

/// Client-side retrieval of attribute components and file bag keys.
pub struct Puller<D: ExternalStore> {
    dht: Arc<D>,
    /// Authority signing key; `None` accepts unverified items with a warning.
    public_key: Option<Ed25519PublicKey>,
    replication_factor: u8,
    location_size: usize,
}

impl<D: ExternalStore> Puller<D> {
    pub fn new(dht: Arc<D>, public_key: Option<Ed25519PublicKey>, config: &EngineConfig) -> Self {
        Self {
            dht,
            public_key,
            replication_factor: config.replication_factor,
            location_size: config.location_size_bytes,
        }
    }

    /// Fetch the component for `attribute_name` under a user's seed.
    ///
    /// Tries all replicas; the first that verifies and decrypts wins.
    pub async fn fetch_attribute_component(
        &self,
        seed: &SecretSeed,
        attribute_name: &str,
    ) -> Result<PulledComponent> {
        let store_id = self.dht.identifier();
        let name_short = attribute_name_short(attribute_name);
        let item_key = ItemKey::derive(seed, name_short, store_id);
        let locations = item_key.locations(self.replication_factor as usize, self.location_size);

        let values = self.dht.get_bulk(&locations).await?;
        let mut revoked = false;

        for (replica, value) in values.into_iter().enumerate() {
            let Some(bytes) = value else { continue };

            let envelope = match AttributeEnvelope::from_bytes(&bytes) {
                Ok(env) => env,
                Err(e) => {
                    tracing::debug!(replica, error = %e, "discarding malformed replica");
                    continue;
                }
            };

            let verified = match &self.public_key {
                Some(pk) => match envelope.verify(pk, store_id, name_short) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(replica, error = %e, "discarding replica with bad signature");
                        continue;
                    }
                },
                None => {
                    tracing::warn!(replica, "no authority key; accepting unverified replica");
                    false
                }
            };

            if envelope.data_type == DataType::Deletion {
                revoked = true;
                continue;
            }

            match envelope.open(&item_key) {
                Ok(bytes) => {
                    let serialized_version = envelope
                        .payload
                        .as_ref()
                        .map_or(0, |p| p.serialized_version);
                    return Ok(PulledComponent::Component {
                        bytes,
                        serialized_version,
                        verified,
                    });
                }
                Err(e) => {
                    tracing::debug!(replica, error = %e, "discarding undecryptable replica");
                }
            }
        }

        Ok(if revoked {
            PulledComponent::Revoked
        } else {
            PulledComponent::Unavailable
        })
    }

    /// Fetch the shares a ciphertext header points at and recombine its
    /// data key.
    ///
    /// Fails with `InsufficientShares` when too few shares survive.
    pub async fn recover_data_key(&self, header: &CiphertextExpiration) -> Result<SymmetricKey> {
        let shares = self.fetch_shares(header).await?;
        Ok(recover_data_key(header, &shares)?)
    }

    /// Fetch and verify every share a header points at.
    pub async fn fetch_shares(&self, header: &CiphertextExpiration) -> Result<Vec<SecretShare>> {
        let values = self.dht.get_bulk(&header.locations).await?;
        let mut shares = Vec::new();

        for (j, value) in values.into_iter().enumerate() {
            let index = j as u32 + 1;
            let Some(bytes) = value else { continue };

            let envelope = match ShareEnvelope::from_bytes(&bytes) {
                Ok(env) => env,
                Err(e) => {
                    tracing::debug!(index, error = %e, "discarding malformed share");
                    continue;
                }
            };

            match &self.public_key {
                Some(pk) => {
                    if let Err(e) = envelope.verify(pk, index) {
                        tracing::warn!(index, error = %e, "discarding share with bad signature");
                        continue;
                    }
                }
                None => tracing::warn!(index, "no authority key; accepting unverified share"),
            }

            let Some(share) = envelope.share else { continue };
            match to_secret_share(index, &share) {
                Ok(s) => shares.push(s),
                Err(e) => tracing::debug!(index, error = %e, "discarding share"),
            }
        }

        Ok(shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{PushOutcome, UpdateExecutor};
    use crate::plan::Action;
    use crate::EngineError;
    use ephemera_core::{
        seal_data_key, AttributeGrant, CoreError, ExpirableRecord, FileBagShare, Keypair,
        TimeSpan,
    };
    use ephemera_dht::{DhtError, MemoryDht};

    const SEED: [u8; 32] = [3; 32];

    struct Fixture {
        dht: Arc<MemoryDht>,
        keypair: Arc<Keypair>,
        exec: UpdateExecutor<MemoryDht>,
    }

    impl Fixture {
        fn new() -> Self {
            let dht = Arc::new(MemoryDht::new());
            let keypair = Arc::new(Keypair::from_seed(&[8; 32]));
            let exec =
                UpdateExecutor::new(dht.clone(), keypair.clone(), EngineConfig::default()).unwrap();
            Self { dht, keypair, exec }
        }

        fn puller(&self) -> Puller<MemoryDht> {
            Puller::new(
                self.dht.clone(),
                Some(self.keypair.public_key()),
                &EngineConfig::default(),
            )
        }

        fn locations(&self) -> Vec<ephemera_core::Location> {
            ItemKey::derive(&SecretSeed::from_bytes(SEED), "role", "MemoryDHT").locations(7, 20)
        }

        async fn push_attribute(&self, action: Action) {
            let grant = AttributeGrant {
                user_id: "u".into(),
                name: "role = admin".into(),
                secret_seed: SecretSeed::from_bytes(SEED),
                component: b"abe-component".to_vec(),
                serialized_version: 4,
            };
            let record = ExpirableRecord::attribute(grant, vec![TimeSpan::open(0)]);
            let outcome = self.exec.execute(&record, action).await.unwrap();
            assert_eq!(outcome, PushOutcome::Pushed);
        }
    }

    #[tokio::test]
    async fn test_fetch_component_roundtrip() {
        let fx = Fixture::new();
        fx.push_attribute(Action::Start).await;

        let pulled = fx
            .puller()
            .fetch_attribute_component(&SecretSeed::from_bytes(SEED), "role=admin")
            .await
            .unwrap();
        assert_eq!(
            pulled,
            PulledComponent::Component {
                bytes: b"abe-component".to_vec(),
                serialized_version: 4,
                verified: true,
            }
        );
    }

    #[tokio::test]
    async fn test_tampered_replicas_fall_through() {
        let fx = Fixture::new();
        fx.push_attribute(Action::Start).await;

        let locations = fx.locations();
        for loc in &locations[..6] {
            fx.dht
                .tamper(loc, |v| {
                    let i = v.len() - 70;
                    v[i] ^= 0x01;
                })
                .await;
        }

        let pulled = fx
            .puller()
            .fetch_attribute_component(&SecretSeed::from_bytes(SEED), "role")
            .await
            .unwrap();
        assert!(matches!(pulled, PulledComponent::Component { verified: true, .. }));
    }

    #[tokio::test]
    async fn test_all_replicas_tampered_is_unavailable() {
        let fx = Fixture::new();
        fx.push_attribute(Action::Start).await;
        for loc in &fx.locations() {
            fx.dht.tamper(loc, |v| v[1] ^= 0x01).await;
        }

        let pulled = fx
            .puller()
            .fetch_attribute_component(&SecretSeed::from_bytes(SEED), "role")
            .await
            .unwrap();
        assert_eq!(pulled, PulledComponent::Unavailable);
    }

    #[tokio::test]
    async fn test_deletion_marker_is_revoked() {
        let fx = Fixture::new();
        fx.push_attribute(Action::Start).await;
        fx.push_attribute(Action::Stop).await;

        let pulled = fx
            .puller()
            .fetch_attribute_component(&SecretSeed::from_bytes(SEED), "role")
            .await
            .unwrap();
        assert_eq!(pulled, PulledComponent::Revoked);
    }

    #[tokio::test]
    async fn test_never_written_is_unavailable() {
        let fx = Fixture::new();
        let pulled = fx
            .puller()
            .fetch_attribute_component(&SecretSeed::from_bytes(SEED), "role")
            .await
            .unwrap();
        assert_eq!(pulled, PulledComponent::Unavailable);
    }

    #[tokio::test]
    async fn test_forged_envelope_rejected_without_matching_key() {
        let fx = Fixture::new();
        fx.push_attribute(Action::Start).await;

        let other = Puller::new(
            fx.dht.clone(),
            Some(Keypair::from_seed(&[1; 32]).public_key()),
            &EngineConfig::default(),
        );
        let pulled = other
            .fetch_attribute_component(&SecretSeed::from_bytes(SEED), "role")
            .await
            .unwrap();
        assert_eq!(pulled, PulledComponent::Unavailable);
    }

    #[tokio::test]
    async fn test_unverified_without_public_key() {
        let fx = Fixture::new();
        fx.push_attribute(Action::Start).await;

        let puller = Puller::new(fx.dht.clone(), None, &EngineConfig::default());
        let pulled = puller
            .fetch_attribute_component(&SecretSeed::from_bytes(SEED), "role")
            .await
            .unwrap();
        assert!(matches!(pulled, PulledComponent::Component { verified: false, .. }));
    }

    #[tokio::test]
    async fn test_store_outage_is_an_error() {
        let fx = Fixture::new();
        fx.dht.set_offline(true);
        let err = fx
            .puller()
            .fetch_attribute_component(&SecretSeed::from_bytes(SEED), "role")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Dht(DhtError::Unavailable(_))));
    }

    async fn push_file_bag(fx: &Fixture, dek: &SymmetricKey, threshold: usize, count: usize) -> CiphertextExpiration {
        let (header, set) = seal_data_key(dek, threshold, count, 20).unwrap();
        let bag = FileBagShare {
            container_id: "bag".into(),
            filenames: vec!["f".into()],
            expiration_data: set.to_bytes(),
        };
        let record = ExpirableRecord::file_bag(bag, vec![TimeSpan::open(0)]);
        assert_eq!(
            fx.exec.execute(&record, Action::Start).await.unwrap(),
            PushOutcome::Pushed
        );
        header
    }

    #[tokio::test]
    async fn test_recover_data_key() {
        let fx = Fixture::new();
        let dek = SymmetricKey::from_bytes([0x77; 32]);
        let header = push_file_bag(&fx, &dek, 3, 5).await;

        let key = fx.puller().recover_data_key(&header).await.unwrap();
        assert_eq!(key.as_bytes(), dek.as_bytes());
    }

    #[tokio::test]
    async fn test_recover_survives_tampered_and_lost_shares() {
        let fx = Fixture::new();
        let dek = SymmetricKey::from_bytes([0x77; 32]);
        let header = push_file_bag(&fx, &dek, 3, 5).await;

        fx.dht.forget(&header.locations[0]).await;
        fx.dht.tamper(&header.locations[1], |v| v[5] ^= 0x10).await;

        let key = fx.puller().recover_data_key(&header).await.unwrap();
        assert_eq!(key.as_bytes(), dek.as_bytes());
    }

    #[tokio::test]
    async fn test_recover_with_too_few_shares_fails() {
        let fx = Fixture::new();
        let dek = SymmetricKey::from_bytes([0x77; 32]);
        let header = push_file_bag(&fx, &dek, 3, 5).await;

        for loc in &header.locations[..3] {
            fx.dht.forget(loc).await;
        }

        let err = fx.puller().recover_data_key(&header).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::InsufficientShares { have: 2, need: 3 })
        ));
    }

    #[tokio::test]
    async fn test_deleted_shares_are_not_used() {
        let fx = Fixture::new();
        let dek = SymmetricKey::from_bytes([0x77; 32]);
        let (header, set) = seal_data_key(&dek, 2, 3, 20).unwrap();
        let bag = FileBagShare {
            container_id: "bag".into(),
            filenames: vec![],
            expiration_data: set.to_bytes(),
        };
        let record = ExpirableRecord::file_bag(bag, vec![TimeSpan::open(0)]);
        fx.exec.execute(&record, Action::Start).await.unwrap();
        fx.exec.execute(&record, Action::Stop).await.unwrap();

        let shares = fx.puller().fetch_shares(&header).await.unwrap();
        assert!(shares.is_empty());
        assert!(fx.puller().recover_data_key(&header).await.is_err());
    }
}
