//! # Ephemera Core
//!
//! Pure primitives for the Ephemera attribute authority: the expirable
//! record model, location derivation, signed envelopes and threshold
//! sharing of ciphertext keys.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`ExpirableRecord`] - An attribute grant or file bag with time spans
//! - [`ItemKey`] - Keyed base from which locations and payload keys derive
//! - [`AttributeEnvelope`] - Signed, encrypted Type1 component envelope
//! - [`ShareEnvelope`] - Signed Type2 share envelope
//! - [`CiphertextExpiration`] - Type2 header carried by a ciphertext
//!
//! ## Wire Formats
//!
//! Envelopes use a fixed big-endian binary layout, see [`envelope`].
//! Share sets and ciphertext headers are CBOR.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod expiration;
pub mod location;
pub mod threshold;
pub mod types;

pub use crypto::{hmac_sha256, Ed25519PublicKey, Ed25519Signature, Iv, Keypair, SymmetricKey};
pub use envelope::{AttributeEnvelope, DataType, EncryptedComponent, ShareEnvelope};
pub use error::{CoreError, Result};
pub use expiration::{
    recover_data_key, seal_data_key, to_secret_share, CiphertextExpiration, ShareSet, StoredShare,
};
pub use location::{derive_locations, ItemKey, SecretSeed};
pub use threshold::SecretShare;
pub use types::{
    attribute_name_short, AttributeGrant, ExpirableRecord, ExpirationType, FileBagShare,
    Location, RecordBody, RecordId, RecordKind, TimeSpan,
};
