//! Update Executor: pushes a record's envelopes to the external store.
//!
//! Type1 attribute records replicate one envelope to every derived
//! location. Type2 file bags push one share envelope per stored share, each
//! to its own location. A bulk push is retried up to the configured count
//! and succeeds only if every item was accepted.

use std::sync::Arc;

use ephemera_core::{
    AttributeEnvelope, AttributeGrant, DataType, ExpirableRecord, ExpirationType, FileBagShare,
    ItemKey, Keypair, Location, RecordBody, ShareEnvelope, ShareSet,
};
use ephemera_dht::ExternalStore;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::plan::Action;

/// Result of executing one record's update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Every item was accepted.
    Pushed,
    /// All attempts were refused or errored.
    Failed,
    /// Nothing to push for this record.
    Skipped,
}

/// Builds and pushes envelopes for due records.
pub struct UpdateExecutor<D: ExternalStore> {
    dht: Arc<D>,
    keypair: Arc<Keypair>,
    config: EngineConfig,
}

impl<D: ExternalStore> UpdateExecutor<D> {
    /// Create an executor. The configured location size must match the
    /// external store's.
    pub fn new(dht: Arc<D>, keypair: Arc<Keypair>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        if dht.item_identifier_size() != config.location_size_bytes {
            return Err(EngineError::Config(format!(
                "location_size_bytes {} does not match {} item size {}",
                config.location_size_bytes,
                dht.identifier(),
                dht.item_identifier_size()
            )));
        }
        Ok(Self {
            dht,
            keypair,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Push the envelopes `action` calls for.
    ///
    /// A record pending deletion always pushes deletion markers.
    pub async fn execute(&self, record: &ExpirableRecord, action: Action) -> Result<PushOutcome> {
        let data_type = if record.delete || action == Action::Stop {
            DataType::Deletion
        } else {
            DataType::Refresh
        };

        let (locations, values) = match (&record.body, record.expiration_type) {
            (_, ExpirationType::None) => {
                tracing::debug!(record = %record.id, "no expiration data; skipping");
                return Ok(PushOutcome::Skipped);
            }
            (RecordBody::Attribute(grant), ExpirationType::Type1) => {
                self.attribute_items(grant, data_type)?
            }
            (RecordBody::FileBag(bag), ExpirationType::Type2) => {
                self.file_bag_items(bag, data_type)?
            }
            (body, expiration_type) => {
                let err = EngineError::UnknownExpirationType {
                    record: record.id,
                    kind: body.kind(),
                    expiration_type,
                };
                tracing::warn!(error = %err, "skipping record");
                return Ok(PushOutcome::Skipped);
            }
        };

        if locations.is_empty() {
            tracing::debug!(record = %record.id, "no locations; skipping");
            return Ok(PushOutcome::Skipped);
        }

        Ok(self
            .push_with_retry(record, &locations, &values, data_type)
            .await)
    }

    fn attribute_items(
        &self,
        grant: &AttributeGrant,
        data_type: DataType,
    ) -> Result<(Vec<Location>, Vec<Vec<u8>>)> {
        let store_id = self.dht.identifier();
        let name_short = grant.name_short();
        let n = self.config.replication_factor;

        let item_key = ItemKey::derive(&grant.secret_seed, name_short, store_id);
        let locations = item_key.locations(n as usize, self.config.location_size_bytes);

        let envelope = match data_type {
            DataType::Refresh => AttributeEnvelope::seal_refresh(
                &self.keypair,
                &item_key,
                store_id,
                name_short,
                n,
                &grant.component,
                grant.serialized_version,
            )?,
            DataType::Deletion => {
                AttributeEnvelope::seal_deletion(&self.keypair, store_id, name_short, n)
            }
        };

        let bytes = envelope.to_bytes();
        let values = vec![bytes; locations.len()];
        Ok((locations, values))
    }

    fn file_bag_items(
        &self,
        bag: &FileBagShare,
        data_type: DataType,
    ) -> Result<(Vec<Location>, Vec<Vec<u8>>)> {
        let set = ShareSet::from_bytes(&bag.expiration_data)?;

        let mut locations = Vec::with_capacity(set.shares.len());
        let mut values = Vec::with_capacity(set.shares.len());
        for stored in &set.shares {
            let envelope = match data_type {
                DataType::Refresh => ShareEnvelope::seal(&self.keypair, stored.index, &stored.share)?,
                DataType::Deletion => ShareEnvelope::seal_deletion(&self.keypair, stored.index),
            };
            locations.push(stored.location.clone());
            values.push(envelope.to_bytes());
        }
        Ok((locations, values))
    }

    async fn push_with_retry(
        &self,
        record: &ExpirableRecord,
        locations: &[Location],
        values: &[Vec<u8>],
        data_type: DataType,
    ) -> PushOutcome {
        let attempts = self.config.push_retry_count;
        for attempt in 1..=attempts {
            match self.dht.push_bulk(locations, values).await {
                Ok(true) => {
                    tracing::info!(
                        record = %record.id,
                        ?data_type,
                        items = locations.len(),
                        attempt,
                        "pushed"
                    );
                    return PushOutcome::Pushed;
                }
                Ok(false) => {
                    tracing::debug!(record = %record.id, attempt, "push refused");
                }
                Err(e) => {
                    tracing::warn!(record = %record.id, attempt, error = %e, "push errored");
                }
            }
        }

        let err = EngineError::PushFailed {
            record: record.id,
            attempts,
        };
        tracing::warn!(error = %err, "giving up for this cycle");
        PushOutcome::Failed
    }
}
