//! Deterministic derivation of storage locations and payload keys.
//!
//! ```text
//! base     = HMAC(seed, item_name || store_identifier)
//! h[-1]    = ""
//! h[k]     = HMAC(base, h[k-1] || "location" || k)
//! loc[k]   = h[k] truncated or zero-padded to the location size
//! enc_key  = HMAC(base, data_type || "encryption")
//! ```
//!
//! Locations are unlinkable without the seed and reproducible with it.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{hmac_sha256, SymmetricKey};
use crate::envelope::DataType;
use crate::types::Location;

const LOCATION_LABEL: &[u8] = b"location";
const ENCRYPTION_LABEL: &[u8] = b"encryption";

/// A per-user 32-byte secret from which item keys are derived.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSeed([u8; 32]);

impl SecretSeed {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build a seed from arbitrary bytes: longer input is truncated,
    /// shorter input is zero-padded.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut seed = [0u8; 32];
        let n = bytes.len().min(32);
        seed[..n].copy_from_slice(&bytes[..n]);
        Self(seed)
    }

    /// A fresh random seed.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self(seed)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SecretSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretSeed(..)")
    }
}

/// The keyed base for one item in one external store.
#[derive(Clone)]
pub struct ItemKey {
    base: [u8; 32],
}

impl ItemKey {
    /// Derive the item base from a seed, the item name and the external
    /// store's identifier.
    pub fn derive(seed: &SecretSeed, item_name: &str, store_identifier: &str) -> Self {
        let base = hmac_sha256(
            seed.as_bytes(),
            &[item_name.as_bytes(), store_identifier.as_bytes()],
        );
        Self { base }
    }

    /// The first `count` locations of the chain, each `size` bytes long.
    pub fn locations(&self, count: usize, size: usize) -> Vec<Location> {
        let mut out = Vec::with_capacity(count);
        let mut prev: Vec<u8> = Vec::new();
        for k in 0..count {
            let h = hmac_sha256(&self.base, &[&prev, LOCATION_LABEL, &[k as u8]]);
            out.push(fit(&h, size));
            prev = h.to_vec();
        }
        out
    }

    /// The payload encryption key for envelopes of `data_type`.
    pub fn encryption_key(&self, data_type: DataType) -> SymmetricKey {
        SymmetricKey::from_bytes(hmac_sha256(
            &self.base,
            &[&[data_type.as_u8()], ENCRYPTION_LABEL],
        ))
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ItemKey(..)")
    }
}

/// Derive `count` locations of `size` bytes for an item.
pub fn derive_locations(
    seed: &SecretSeed,
    item_name: &str,
    store_identifier: &str,
    count: usize,
    size: usize,
) -> Vec<Location> {
    ItemKey::derive(seed, item_name, store_identifier).locations(count, size)
}

fn fit(hash: &[u8; 32], size: usize) -> Location {
    let mut bytes = vec![0u8; size];
    let n = size.min(hash.len());
    bytes[..n].copy_from_slice(&hash[..n]);
    Location::from_vec(bytes)
}
