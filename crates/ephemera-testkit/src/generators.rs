//! Proptest generators for property-based testing.

use proptest::prelude::*;

use ephemera_core::{
    AttributeGrant, ExpirableRecord, Keypair, SecretSeed, SymmetricKey, TimeSpan,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random secret seed.
pub fn secret_seed() -> impl Strategy<Value = SecretSeed> {
    any::<[u8; 32]>().prop_map(SecretSeed::from_bytes)
}

/// Generate a random data-encryption key.
pub fn data_key() -> impl Strategy<Value = SymmetricKey> {
    any::<[u8; 32]>().prop_map(SymmetricKey::from_bytes)
}

/// Generate an attribute name, sometimes with a `=value` suffix.
pub fn attribute_name() -> impl Strategy<Value = String> {
    ("[a-z][a-z0-9_]{0,15}", proptest::option::of("[a-z0-9]{1,8}")).prop_map(|(name, value)| {
        match value {
            Some(v) => format!("{name}={v}"),
            None => name,
        }
    })
}

/// Generate a well-formed span starting within 8 hours of `base`.
pub fn timespan(base: i64) -> impl Strategy<Value = TimeSpan> {
    const HOUR: i64 = 3_600_000;
    (
        -8 * HOUR..8 * HOUR,
        proptest::option::of(1i64..12 * HOUR),
        any::<bool>(),
    )
        .prop_map(move |(offset, len, strict)| TimeSpan {
            start: base + offset,
            end: len.map(|l| base + offset + l),
            strict,
        })
}

/// Generate between `1` and `max` spans around `base`.
pub fn timespans(base: i64, max: usize) -> impl Strategy<Value = Vec<TimeSpan>> {
    prop::collection::vec(timespan(base), 1..=max.max(1))
}

/// Parameters for generating an attribute record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub seed: [u8; 32],
    pub name: String,
    pub component: Vec<u8>,
    pub timespans: Vec<TimeSpan>,
    pub delete: bool,
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            attribute_name(),
            prop::collection::vec(any::<u8>(), 1..=256),
            timespans(0, 4),
            any::<bool>(),
        )
            .prop_map(|(seed, name, component, timespans, delete)| RecordParams {
                seed,
                name,
                component,
                timespans,
                delete,
            })
            .boxed()
    }
}

/// Build an unstored attribute record from parameters.
pub fn record_params(params: &RecordParams) -> ExpirableRecord {
    let grant = AttributeGrant {
        user_id: "user".into(),
        name: params.name.clone(),
        secret_seed: SecretSeed::from_bytes(params.seed),
        component: params.component.clone(),
        serialized_version: 1,
    };
    let mut record = ExpirableRecord::attribute(grant, params.timespans.clone());
    record.delete = params.delete;
    record
}
