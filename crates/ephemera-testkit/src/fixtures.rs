//! Test fixtures and helpers.
//!
//! Common setup code for scheduling and pull-path tests.

use std::sync::Arc;

use ephemera::Authority;
use ephemera_core::{
    seal_data_key, AttributeGrant, CiphertextExpiration, ExpirableRecord, FileBagShare, Keypair,
    SecretSeed, ShareSet, SymmetricKey, TimeSpan,
};
use ephemera_dht::{ExternalStore, MemoryDht};
use ephemera_engine::{Clock, EngineConfig, ManualClock, ManualTimer, Puller, UpdateReport};
use ephemera_store::{DocumentStore, MemoryStore};

pub const MINUTE: i64 = 60_000;
pub const HOUR: i64 = 60 * MINUTE;

/// Start of fixture time: 2024-01-01T00:00:00Z.
pub const BASE_TIME: i64 = 1_704_067_200_000;

/// A started authority on manual time, in-memory stores by default.
pub struct TestAuthority<S: DocumentStore = MemoryStore, D: ExternalStore = MemoryDht> {
    pub authority: Authority<S, D>,
    pub dht: Arc<D>,
    pub clock: Arc<ManualClock>,
    pub timer: Arc<ManualTimer>,
}

impl TestAuthority {
    /// A started authority with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        TestAuthority::build(MemoryStore::new(), MemoryDht::new(), config)
    }
}

impl<S, D> TestAuthority<S, D>
where
    S: DocumentStore + 'static,
    D: ExternalStore + 'static,
{
    /// A started authority over the given backends.
    pub fn with_stores(store: S, dht: D) -> Self {
        Self::build(store, dht, EngineConfig::default())
    }

    fn build(store: S, dht: D, config: EngineConfig) -> Self {
        init_tracing();
        let dht = Arc::new(dht);
        let clock = Arc::new(ManualClock::new(BASE_TIME));
        let timer = Arc::new(ManualTimer::new());
        let authority = Authority::new(
            Arc::new(store),
            dht.clone(),
            Keypair::from_seed(&[7; 32]),
            clock.clone(),
            timer.clone(),
            config,
        )
        .expect("fixture config is valid");
        authority.start();

        Self {
            authority,
            dht,
            clock,
            timer,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Run every job due at the current time, including jobs they schedule
    /// for the same instant.
    pub async fn run_due(&self) -> Vec<UpdateReport> {
        let mut reports = Vec::new();
        loop {
            let jobs = self.timer.take_due(self.clock.now_millis());
            if jobs.is_empty() {
                return reports;
            }
            for job in jobs {
                let report = self
                    .authority
                    .scheduler()
                    .handle(job)
                    .await
                    .expect("job failed");
                reports.push(report);
            }
        }
    }

    /// Step the clock to `target`, stopping at each scheduled job on the way.
    pub async fn advance_to(&self, target: i64) -> Vec<UpdateReport> {
        let mut reports = Vec::new();
        while let Some(at) = self.timer.next_due().filter(|at| *at <= target) {
            if at > self.clock.now_millis() {
                self.clock.set(at);
            }
            reports.extend(self.run_due().await);
        }
        self.clock.set(target);
        reports
    }

    /// Move time forward by `ms`.
    pub async fn advance(&self, ms: i64) -> Vec<UpdateReport> {
        self.advance_to(self.clock.now_millis() + ms).await
    }

    /// A puller holding this authority's public key.
    pub fn puller(&self) -> Puller<D> {
        self.authority.puller()
    }
}

impl Default for TestAuthority {
    fn default() -> Self {
        Self::new()
    }
}

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// An unstored Type1 record.
pub fn attribute_record(seed: [u8; 32], name: &str, spans: Vec<TimeSpan>) -> ExpirableRecord {
    let grant = AttributeGrant {
        user_id: "user".into(),
        name: name.into(),
        secret_seed: SecretSeed::from_bytes(seed),
        component: format!("component:{name}").into_bytes(),
        serialized_version: 1,
    };
    ExpirableRecord::attribute(grant, spans)
}

/// An unstored Type2 record, its header and the share set it carries.
pub fn file_bag_record(
    data_key: &SymmetricKey,
    threshold: usize,
    count: usize,
    spans: Vec<TimeSpan>,
) -> (ExpirableRecord, CiphertextExpiration, ShareSet) {
    let (header, set) =
        seal_data_key(data_key, threshold, count, 20).expect("valid threshold parameters");
    let bag = FileBagShare {
        container_id: "container".into(),
        filenames: vec!["file.enc".into()],
        expiration_data: set.to_bytes(),
    };
    (ExpirableRecord::file_bag(bag, spans), header, set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephemera_core::RecordKind;
    use ephemera_engine::Job;

    #[test]
    fn test_fixture_arms_first_main_event() {
        let fx = TestAuthority::new();
        assert_eq!(fx.timer.scheduled(), vec![(BASE_TIME + 5_000, Job::MainEvent)]);
    }

    #[tokio::test]
    async fn test_advance_runs_jobs_in_order() {
        let fx = TestAuthority::new();
        fx.authority
            .grant_attribute("u", "role", b"seed", b"c", 1, vec![])
            .await
            .unwrap();

        let reports = fx.advance(10_000).await;
        // Drain and main event both land at +5s.
        assert_eq!(reports.len(), 2);
        assert_eq!(reports.iter().map(|r| r.pushed.len()).sum::<usize>(), 2);
        assert_eq!(fx.now(), BASE_TIME + 10_000);
    }

    #[tokio::test]
    async fn test_advance_to_stops_at_each_job() {
        let fx = TestAuthority::with_stores(MemoryStore::new(), MemoryDht::new());
        let span = TimeSpan::new(BASE_TIME + 30 * MINUTE, Some(BASE_TIME + HOUR), true).unwrap();
        fx.authority
            .grant_attribute("u", "role", b"seed", b"c", 1, vec![span])
            .await
            .unwrap();

        // Drain and main event at +5s, then start and stop buckets.
        let reports = fx.advance_to(BASE_TIME + 2 * HOUR).await;
        assert_eq!(reports.iter().map(|r| r.pushed.len()).sum::<usize>(), 2);
        assert_eq!(fx.dht.push_calls(), 2);
        assert_eq!(fx.now(), BASE_TIME + 2 * HOUR);
    }

    #[test]
    fn test_record_builders() {
        let r = attribute_record([1; 32], "a=b", vec![TimeSpan::open(0)]);
        assert_eq!(r.kind(), RecordKind::Attribute);

        let (bag, header, set) = file_bag_record(&SymmetricKey::from_bytes([2; 32]), 2, 5, vec![]);
        assert_eq!(bag.kind(), RecordKind::FileBag);
        assert_eq!(header.locations.len(), 5);
        assert_eq!(set.shares.len(), 5);
    }
}
