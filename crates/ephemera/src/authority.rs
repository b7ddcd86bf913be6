//! The Authority: the request-facing side of the expiration engine.
//!
//! Every mutation writes the document store first and then enqueues the
//! record for reevaluation; the scheduler decides what to push and when.

use std::sync::Arc;

use ephemera_core::{
    seal_data_key, AttributeGrant, CiphertextExpiration, Ed25519PublicKey, ExpirableRecord,
    FileBagShare, Keypair, RecordId, RecordKind, SecretSeed, SymmetricKey, TimeSpan,
};
use ephemera_dht::ExternalStore;
use ephemera_engine::{
    Clock, EngineConfig, JobTimer, Puller, Scheduler, SystemClock, TokioTimer,
};
use ephemera_store::{DocumentStore, DocumentStoreExt, StoreError};
use tokio::task::JoinHandle;

use crate::error::{AuthorityError, Result};

/// Grants, revokes and registers expirable material.
pub struct Authority<S: DocumentStore, D: ExternalStore> {
    store: Arc<S>,
    dht: Arc<D>,
    public_key: Ed25519PublicKey,
    clock: Arc<dyn Clock>,
    scheduler: Arc<Scheduler<S, D>>,
    config: EngineConfig,
}

impl<S, D> Authority<S, D>
where
    S: DocumentStore + 'static,
    D: ExternalStore + 'static,
{
    /// Create an authority with explicit time sources. Nothing runs until
    /// [`start`](Self::start) is called and the timer's jobs are delivered.
    pub fn new(
        store: Arc<S>,
        dht: Arc<D>,
        keypair: Keypair,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn JobTimer>,
        config: EngineConfig,
    ) -> Result<Self> {
        let public_key = keypair.public_key();
        let scheduler = Scheduler::new(
            store.clone(),
            dht.clone(),
            Arc::new(keypair),
            clock.clone(),
            timer,
            config.clone(),
        )?;
        Ok(Self {
            store,
            dht,
            public_key,
            clock,
            scheduler: Arc::new(scheduler),
            config,
        })
    }

    /// Create an authority on the system clock and start its scheduler on
    /// the current tokio runtime.
    pub fn launch(
        store: Arc<S>,
        dht: Arc<D>,
        keypair: Keypair,
        config: EngineConfig,
    ) -> Result<(Self, JoinHandle<()>)> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (timer, jobs) = TokioTimer::new(clock.clone());
        let authority = Self::new(store, dht, keypair, clock, Arc::new(timer), config)?;
        authority.start();
        let handle = authority.scheduler.spawn(jobs);
        Ok((authority, handle))
    }

    /// Arm the first main event.
    pub fn start(&self) {
        tracing::info!(
            store = self.dht.identifier(),
            authority = %self.public_key.to_hex(),
            "starting expiration engine"
        );
        self.scheduler.start();
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.public_key
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler<S, D>> {
        &self.scheduler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A reader for material this authority pushes.
    pub fn puller(&self) -> Puller<D> {
        Puller::new(self.dht.clone(), Some(self.public_key), &self.config)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attribute Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant `name` to `user_id` for the given spans.
    ///
    /// An empty span list grants from now with no end.
    pub async fn grant_attribute(
        &self,
        user_id: &str,
        name: &str,
        seed: &[u8],
        component: &[u8],
        serialized_version: u8,
        timespans: Vec<TimeSpan>,
    ) -> Result<RecordId> {
        let grant = AttributeGrant {
            user_id: user_id.to_string(),
            name: name.to_string(),
            secret_seed: SecretSeed::from_slice(seed),
            component: component.to_vec(),
            serialized_version,
        };
        let record = ExpirableRecord::attribute(grant, self.checked_spans(timespans)?);
        let id = self.store.insert_record(&record).await?;

        tracing::info!(record = %id, user = user_id, "granted attribute");
        self.scheduler.enqueue_for_reevaluation(id);
        Ok(id)
    }

    /// Revoke a grant. Deletion markers are pushed by the next drain and
    /// the record is purged once they are accepted.
    pub async fn revoke_attribute(&self, id: RecordId) -> Result<()> {
        self.mark_for_deletion(id, RecordKind::Attribute).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // File Bags
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a file bag whose ciphertexts are encrypted under `data_key`.
    ///
    /// The key is split into one share per replica, `threshold` of which
    /// recover it. The returned header travels with the ciphertexts.
    pub async fn register_file_bag(
        &self,
        container_id: &str,
        filenames: Vec<String>,
        data_key: &SymmetricKey,
        threshold: usize,
        timespans: Vec<TimeSpan>,
    ) -> Result<(RecordId, CiphertextExpiration)> {
        let timespans = self.checked_spans(timespans)?;
        let (header, shares) = seal_data_key(
            data_key,
            threshold,
            self.config.replication_factor as usize,
            self.config.location_size_bytes,
        )?;

        let bag = FileBagShare {
            container_id: container_id.to_string(),
            filenames,
            expiration_data: shares.to_bytes(),
        };
        let id = self
            .store
            .insert_record(&ExpirableRecord::file_bag(bag, timespans))
            .await?;

        tracing::info!(record = %id, container = container_id, threshold, "registered file bag");
        self.scheduler.enqueue_for_reevaluation(id);
        Ok((id, header))
    }

    /// Delete a file bag. Its shares are overwritten with deletion markers.
    pub async fn delete_file_bag(&self, id: RecordId) -> Result<()> {
        self.mark_for_deletion(id, RecordKind::FileBag).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shared
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace a record's time spans.
    pub async fn update_timespans(&self, id: RecordId, timespans: Vec<TimeSpan>) -> Result<()> {
        let mut record = self
            .store
            .load_record(id)
            .await?
            .ok_or(AuthorityError::RecordNotFound(id))?;

        let mut timespans = self.checked_spans(timespans)?;
        timespans.sort();
        timespans.dedup();
        record.timespans = timespans;
        self.store.save_record(&record).await?;

        tracing::debug!(record = %id, spans = record.timespans.len(), "updated time spans");
        self.scheduler.enqueue_for_reevaluation(id);
        Ok(())
    }

    pub async fn record(&self, id: RecordId) -> Result<Option<ExpirableRecord>> {
        Ok(self.store.load_record(id).await?)
    }

    async fn mark_for_deletion(&self, id: RecordId, kind: RecordKind) -> Result<()> {
        match self.store.load_record(id).await? {
            Some(record) if record.kind() == kind => {}
            _ => return Err(AuthorityError::RecordNotFound(id)),
        }

        self.store.mark_for_deletion(id).await.map_err(|e| match e {
            StoreError::NotFound(_) => AuthorityError::RecordNotFound(id),
            other => other.into(),
        })?;

        tracing::info!(record = %id, ?kind, "marked for deletion");
        self.scheduler.enqueue_for_reevaluation(id);
        Ok(())
    }

    fn checked_spans(&self, timespans: Vec<TimeSpan>) -> Result<Vec<TimeSpan>> {
        if timespans.is_empty() {
            return Ok(vec![TimeSpan::open(self.clock.now_millis())]);
        }
        for span in &timespans {
            TimeSpan::new(span.start, span.end, span.strict)
                .map_err(|e| AuthorityError::InvalidTimeSpan(e.to_string()))?;
        }
        Ok(timespans)
    }
}
