//! Ciphertext-level (Type2) expiration.
//!
//! A file bag's data encryption key is masked with a pad derived from a
//! random scalar that is Shamir-split across random external-store locations. The ciphertext
//! header keeps the mask and the locations; the authority keeps the shares
//! and pushes or deletes them on schedule. Once enough shares disappear the
//! data key is unrecoverable.

use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::crypto::SymmetricKey;
use crate::error::{CoreError, Result};
use crate::threshold::{self, SecretShare};
use crate::types::Location;

const KEY_CHECK_CONTEXT: &str = "ephemera 2024 ciphertext expiration key check";
const KEY_MASK_CONTEXT: &str = "ephemera 2024 ciphertext expiration key mask";

/// Upper bound on share subsets tried while recovering a data key.
const MAX_RECOVERY_SUBSETS: usize = 256;

/// One share as kept by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredShare {
    /// 1-based share index.
    pub index: u32,
    pub location: Location,
    pub share: Vec<u8>,
}

/// All shares of one file bag, stored as the record's expiration data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShareSet {
    pub shares: Vec<StoredShare>,
}

impl ShareSet {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("CBOR serialization failed");
        buf
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::Parse(e.to_string()))
    }
}

/// Expiration header embedded in a Type2 ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextExpiration {
    pub threshold: u32,
    /// `data_key XOR pad(secret)`.
    pub key_mask: [u8; 32],
    /// Share `j + 1` lives at `locations[j]`.
    pub locations: Vec<Location>,
    /// Keyed digest of the data key.
    pub key_check: [u8; 32],
}

impl CiphertextExpiration {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("CBOR serialization failed");
        buf
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::Parse(e.to_string()))
    }
}

fn key_check(data_key: &SymmetricKey) -> [u8; 32] {
    blake3::derive_key(KEY_CHECK_CONTEXT, data_key.as_bytes())
}

// Canonical scalars sit below 2^253, so the pad is hashed to cover all 256 bits.
fn mask_pad(secret: &Scalar) -> [u8; 32] {
    blake3::derive_key(KEY_MASK_CONTEXT, &secret.to_bytes())
}

fn xor(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b)) {
        *o = x ^ y;
    }
    out
}

/// Mask `data_key` and split the mask secret into `count` shares at random
/// locations of `location_size` bytes.
pub fn seal_data_key(
    data_key: &SymmetricKey,
    threshold: usize,
    count: usize,
    location_size: usize,
) -> Result<(CiphertextExpiration, ShareSet)> {
    let mut rng = OsRng;
    let secret = threshold::random_scalar(&mut rng);
    let shares = threshold::split(&secret, threshold, count, &mut rng)?;

    let stored: Vec<StoredShare> = shares
        .iter()
        .map(|s| StoredShare {
            index: s.index,
            location: Location::random(location_size),
            share: s.value.to_vec(),
        })
        .collect();

    let header = CiphertextExpiration {
        threshold: threshold as u32,
        key_mask: xor(data_key.as_bytes(), &mask_pad(&secret)),
        locations: stored.iter().map(|s| s.location.clone()).collect(),
        key_check: key_check(data_key),
    };

    Ok((header, ShareSet { shares: stored }))
}

/// Recombine retrieved shares into the data key.
///
/// When more than `threshold` shares are given, other subsets are tried
/// until one passes the key check, so a wrong share among unverified ones
/// does not hide the key.
///
/// Fails with `InsufficientShares` when fewer than `threshold` distinct
/// shares are given, and with `KeyCheckFailed` when no subset recombines to
/// a key matching the header.
pub fn recover_data_key(
    header: &CiphertextExpiration,
    shares: &[SecretShare],
) -> Result<SymmetricKey> {
    let unmask = |secret: &Scalar| SymmetricKey::from_bytes(xor(&header.key_mask, &mask_pad(secret)));
    let secret = threshold::reconstruct_checked(
        shares,
        header.threshold as usize,
        MAX_RECOVERY_SUBSETS,
        |secret| key_check(&unmask(secret)) == header.key_check,
    )?;
    secret.map(|s| unmask(&s)).ok_or(CoreError::KeyCheckFailed)
}

/// Convert a raw share into a [`SecretShare`].
pub fn to_secret_share(index: u32, share: &[u8]) -> Result<SecretShare> {
    let value: [u8; 32] = share.try_into().map_err(|_| CoreError::InvalidShare(index))?;
    Ok(SecretShare { index, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares_of(set: &ShareSet) -> Vec<SecretShare> {
        set.shares
            .iter()
            .map(|s| to_secret_share(s.index, &s.share).unwrap())
            .collect()
    }

    #[test]
    fn test_seal_recover() {
        let dek = SymmetricKey::from_bytes([0x3c; 32]);
        let (header, set) = seal_data_key(&dek, 3, 7, 20).unwrap();

        assert_eq!(header.locations.len(), 7);
        assert_eq!(set.shares.len(), 7);
        for (j, share) in set.shares.iter().enumerate() {
            assert_eq!(share.index, j as u32 + 1);
            assert_eq!(header.locations[j], share.location);
            assert_eq!(share.location.len(), 20);
        }
        assert_ne!(header.key_mask, [0x3c; 32]);

        let shares = shares_of(&set);
        let recovered = recover_data_key(&header, &shares[2..5]).unwrap();
        assert_eq!(recovered.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn test_recover_with_too_few_shares() {
        let dek = SymmetricKey::from_bytes([0x3c; 32]);
        let (header, set) = seal_data_key(&dek, 4, 7, 20).unwrap();
        let shares = shares_of(&set);

        let err = recover_data_key(&header, &shares[..3]).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientShares { have: 3, need: 4 }));
    }

    #[test]
    fn test_corrupted_share_fails_key_check() {
        let dek = SymmetricKey::from_bytes([0x3c; 32]);
        let (header, set) = seal_data_key(&dek, 2, 3, 20).unwrap();
        let mut shares = shares_of(&set);
        // Swap the values of two shares: both stay canonical, the result is wrong.
        let v0 = shares[0].value;
        shares[0].value = shares[1].value;
        shares[1].value = v0;

        let err = recover_data_key(&header, &shares[..2]).unwrap_err();
        assert!(matches!(err, CoreError::KeyCheckFailed));
    }

    #[test]
    fn test_wrong_share_among_extras_is_outvoted() {
        let dek = SymmetricKey::from_bytes([0x3c; 32]);
        let (header, set) = seal_data_key(&dek, 3, 5, 20).unwrap();
        let (_, other) = seal_data_key(&dek, 3, 5, 20).unwrap();
        let mut shares = shares_of(&set);
        // Same index, value from an unrelated split.
        shares[0].value = shares_of(&other)[0].value;

        let recovered = recover_data_key(&header, &shares).unwrap();
        assert_eq!(recovered.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn test_key_mask_hides_key_bits() {
        let dek = SymmetricKey::from_bytes([0xe7; 32]);
        let top_bits: std::collections::HashSet<u8> = (0..64)
            .map(|_| seal_data_key(&dek, 1, 1, 20).unwrap().0.key_mask[31] >> 5)
            .collect();
        assert!(top_bits.len() > 1);
    }

    #[test]
    fn test_share_set_cbor() {
        let dek = SymmetricKey::from_bytes([1; 32]);
        let (header, set) = seal_data_key(&dek, 2, 4, 20).unwrap();

        let decoded = ShareSet::from_bytes(&set.to_bytes()).unwrap();
        assert_eq!(decoded, set);
        let decoded = CiphertextExpiration::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);

        assert!(matches!(ShareSet::from_bytes(&[0xff, 0x00]), Err(CoreError::Parse(_))));
    }

    #[test]
    fn test_to_secret_share_rejects_wrong_length() {
        assert!(matches!(to_secret_share(2, &[0; 31]), Err(CoreError::InvalidShare(2))));
    }
}
