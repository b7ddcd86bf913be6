//! Record model for expirable secret material.
//!
//! Records are owned by the document store; the engine only ever holds
//! copies it reloads before acting on them.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::location::SecretSeed;

/// Document-store identity of an expirable record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Placeholder id for records not yet inserted.
    pub const UNASSIGNED: Self = Self(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which kind of record this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordKind {
    Attribute = 1,
    FileBag = 2,
}

impl RecordKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Attribute),
            2 => Some(Self::FileBag),
            _ => None,
        }
    }
}

/// How a record's external secret material expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExpirationType {
    /// No external material; the engine ignores the record.
    None = 0,
    /// A single refreshable attribute component replicated to N locations.
    Type1 = 1,
    /// A threshold share set protecting a ciphertext's data key.
    Type2 = 2,
}

impl ExpirationType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a stored discriminant. Unknown values return `None` so callers
    /// can log and skip them.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Type1),
            2 => Some(Self::Type2),
            _ => None,
        }
    }
}

/// An interval during which access is granted.
///
/// Times are Unix milliseconds. An absent `end` means the grant never
/// auto-stops. A `strict` end schedules a hard revocation at `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: i64,
    pub end: Option<i64>,
    pub strict: bool,
}

impl TimeSpan {
    /// Create a span, rejecting `end <= start`.
    pub fn new(start: i64, end: Option<i64>, strict: bool) -> Result<Self> {
        if let Some(end) = end {
            if end <= start {
                return Err(CoreError::InvalidParameter(format!(
                    "time span end {} is not after start {}",
                    end, start
                )));
            }
        }
        Ok(Self { start, end, strict })
    }

    /// An open-ended span starting at `start`.
    pub const fn open(start: i64) -> Self {
        Self {
            start,
            end: None,
            strict: false,
        }
    }

    /// True if `now` lies in `[start, end)`, or `[start, ∞)` when open-ended.
    pub fn contains(&self, now: i64) -> bool {
        now >= self.start && self.end.map_or(true, |end| now < end)
    }
}

/// A time-limited association of one attribute with one user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeGrant {
    pub user_id: String,
    /// Full attribute name, possibly `name=value`.
    pub name: String,
    /// Per-user secret seed feeding location derivation.
    pub secret_seed: SecretSeed,
    /// Opaque attribute secret-key component from the ABE issuer.
    pub component: Vec<u8>,
    pub serialized_version: u8,
}

impl AttributeGrant {
    /// The attribute name without its value, as used for derivation and signing.
    pub fn name_short(&self) -> &str {
        attribute_name_short(&self.name)
    }
}

impl fmt::Debug for AttributeGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeGrant")
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("component_len", &self.component.len())
            .field("serialized_version", &self.serialized_version)
            .finish_non_exhaustive()
    }
}

/// Strip a `=value` suffix from an attribute name and trim whitespace.
pub fn attribute_name_short(name: &str) -> &str {
    name.split('=').next().unwrap_or(name).trim()
}

/// A group of ciphertexts sharing one expiration schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBagShare {
    pub container_id: String,
    pub filenames: Vec<String>,
    /// CBOR-encoded [`ShareSet`](crate::expiration::ShareSet).
    pub expiration_data: Vec<u8>,
}

/// Kind-specific record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordBody {
    Attribute(AttributeGrant),
    FileBag(FileBagShare),
}

impl RecordBody {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Attribute(_) => RecordKind::Attribute,
            Self::FileBag(_) => RecordKind::FileBag,
        }
    }
}

/// A record whose external secret material the engine keeps in sync with
/// its time spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirableRecord {
    pub id: RecordId,
    pub expiration_type: ExpirationType,
    /// Sorted by `(start, end, strict)`.
    pub timespans: Vec<TimeSpan>,
    /// Pending deletion; the record is purged once a deletion push succeeds.
    pub delete: bool,
    pub body: RecordBody,
}

impl ExpirableRecord {
    /// A new, not yet stored, Type1 attribute record.
    pub fn attribute(grant: AttributeGrant, timespans: Vec<TimeSpan>) -> Self {
        Self::new(ExpirationType::Type1, RecordBody::Attribute(grant), timespans)
    }

    /// A new, not yet stored, Type2 file bag record.
    pub fn file_bag(share: FileBagShare, timespans: Vec<TimeSpan>) -> Self {
        Self::new(ExpirationType::Type2, RecordBody::FileBag(share), timespans)
    }

    fn new(expiration_type: ExpirationType, body: RecordBody, mut timespans: Vec<TimeSpan>) -> Self {
        timespans.sort();
        timespans.dedup();
        Self {
            id: RecordId::UNASSIGNED,
            expiration_type,
            timespans,
            delete: false,
            body,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.body.kind()
    }

    /// True if the engine has anything to do with this record.
    pub fn has_expiration(&self) -> bool {
        self.expiration_type != ExpirationType::None
    }
}

/// An opaque fixed-length key in the external store.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location(pub Vec<u8>);

impl Location {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// A uniformly random location of `size` bytes.
    pub fn random(size: usize) -> Self {
        let mut bytes = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Location({})", &hex[..hex.len().min(16)])
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        f.write_str(&hex[..hex.len().min(16)])
    }
}

impl AsRef<[u8]> for Location {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespan_rejects_inverted_interval() {
        assert!(TimeSpan::new(10, Some(10), false).is_err());
        assert!(TimeSpan::new(10, Some(5), true).is_err());
        assert!(TimeSpan::new(10, Some(11), true).is_ok());
        assert!(TimeSpan::new(10, None, false).is_ok());
    }

    #[test]
    fn test_timespan_contains_is_half_open() {
        let span = TimeSpan::new(100, Some(200), true).unwrap();
        assert!(!span.contains(99));
        assert!(span.contains(100));
        assert!(span.contains(199));
        assert!(!span.contains(200));

        let open = TimeSpan::open(100);
        assert!(open.contains(i64::MAX));
        assert!(!open.contains(0));
    }

    #[test]
    fn test_attribute_name_short() {
        assert_eq!(attribute_name_short("clearance = secret"), "clearance");
        assert_eq!(attribute_name_short("  dept "), "dept");
        assert_eq!(attribute_name_short("a=b=c"), "a");
        assert_eq!(attribute_name_short(""), "");
    }

    #[test]
    fn test_record_sorts_and_dedups_spans() {
        let grant = AttributeGrant {
            user_id: "alice".into(),
            name: "dept=eng".into(),
            secret_seed: SecretSeed::from_bytes([1; 32]),
            component: vec![1, 2, 3],
            serialized_version: 1,
        };
        let late = TimeSpan::new(500, Some(900), false).unwrap();
        let early = TimeSpan::open(100);
        let record = ExpirableRecord::attribute(grant, vec![late, early, late]);

        assert_eq!(record.timespans, vec![early, late]);
        assert_eq!(record.kind(), RecordKind::Attribute);
        assert_eq!(record.expiration_type, ExpirationType::Type1);
        assert_eq!(record.id, RecordId::UNASSIGNED);
        assert!(!record.delete);
    }

    #[test]
    fn test_expiration_type_unknown_discriminant() {
        assert_eq!(ExpirationType::from_u8(2), Some(ExpirationType::Type2));
        assert_eq!(ExpirationType::from_u8(9), None);
    }

    #[test]
    fn test_location_debug_is_truncated() {
        let loc = Location::from_vec(vec![0xab; 20]);
        assert_eq!(format!("{:?}", loc), "Location(abababababababab)");
        assert_eq!(Location::random(20).len(), 20);
    }

    #[test]
    fn test_grant_debug_hides_secrets() {
        let grant = AttributeGrant {
            user_id: "bob".into(),
            name: "role".into(),
            secret_seed: SecretSeed::from_bytes([9; 32]),
            component: vec![0xde, 0xad],
            serialized_version: 2,
        };
        let debug = format!("{:?}", grant);
        assert!(!debug.contains("dead"));
        assert!(debug.contains("component_len"));
    }
}
