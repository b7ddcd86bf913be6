//! Signed binary envelopes placed in the external store.
//!
//! Both envelope kinds start with a [`DataType`] byte.
//!
//! Attribute component envelope (Type1):
//!
//! ```text
//! type:1 | replicate_n:1 | [version:1 | iv:16 | len:4 BE | ciphertext:len] | sig_len:1 | sig
//! signed: store_id || type || replicate_n || name_short [|| iv || len || ciphertext]
//! ```
//!
//! Share envelope (Type2), one per share index:
//!
//! ```text
//! type:1 | [share_len:1 | share] | sig_len:1 | sig
//! signed: type || index:4 BE || [share]
//! ```
//!
//! Bracketed groups are present only for [`DataType::Refresh`].

use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Iv, Keypair, IV_LEN, SIGNATURE_LEN};
use crate::error::{CoreError, Result};
use crate::location::ItemKey;

/// Smallest share accepted from the external store.
pub const MIN_SHARE_LEN: usize = 8;

/// First byte of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    /// Signed deletion marker; carries no payload.
    Deletion = 0,
    /// Signed refresh carrying live secret material.
    Refresh = 1,
}

impl DataType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Deletion),
            1 => Some(Self::Refresh),
            _ => None,
        }
    }
}

/// Encrypted attribute component carried by a refresh envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedComponent {
    pub serialized_version: u8,
    pub iv: Iv,
    pub ciphertext: Vec<u8>,
}

/// Envelope replicated to every derived location of an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeEnvelope {
    pub data_type: DataType,
    pub replicate_n: u8,
    pub payload: Option<EncryptedComponent>,
    pub signature: Ed25519Signature,
}

impl AttributeEnvelope {
    /// Encrypt and sign a live component.
    pub fn seal_refresh(
        keypair: &Keypair,
        item_key: &ItemKey,
        store_identifier: &str,
        name_short: &str,
        replicate_n: u8,
        component: &[u8],
        serialized_version: u8,
    ) -> Result<Self> {
        let iv = Iv::generate();
        let ciphertext = item_key
            .encryption_key(DataType::Refresh)
            .encrypt(component, &iv)?;
        if u32::try_from(ciphertext.len()).is_err() {
            return Err(CoreError::InvalidParameter("component too large".into()));
        }

        let payload = EncryptedComponent {
            serialized_version,
            iv,
            ciphertext,
        };
        let message = Self::signed_message(
            store_identifier,
            DataType::Refresh,
            replicate_n,
            name_short,
            Some(&payload),
        );
        Ok(Self {
            data_type: DataType::Refresh,
            replicate_n,
            payload: Some(payload),
            signature: keypair.sign(&message),
        })
    }

    /// Sign a deletion marker.
    pub fn seal_deletion(
        keypair: &Keypair,
        store_identifier: &str,
        name_short: &str,
        replicate_n: u8,
    ) -> Self {
        let message = Self::signed_message(
            store_identifier,
            DataType::Deletion,
            replicate_n,
            name_short,
            None,
        );
        Self {
            data_type: DataType::Deletion,
            replicate_n,
            payload: None,
            signature: keypair.sign(&message),
        }
    }

    /// Bytes covered by the signature.
    pub fn signed_message(
        store_identifier: &str,
        data_type: DataType,
        replicate_n: u8,
        name_short: &str,
        payload: Option<&EncryptedComponent>,
    ) -> Vec<u8> {
        let mut msg = Vec::with_capacity(
            store_identifier.len() + 2 + name_short.len() + payload.map_or(0, |p| IV_LEN + 4 + p.ciphertext.len()),
        );
        msg.extend_from_slice(store_identifier.as_bytes());
        msg.push(data_type.as_u8());
        msg.push(replicate_n);
        msg.extend_from_slice(name_short.as_bytes());
        if let Some(p) = payload {
            msg.extend_from_slice(p.iv.as_bytes());
            msg.extend_from_slice(&(p.ciphertext.len() as u32).to_be_bytes());
            msg.extend_from_slice(&p.ciphertext);
        }
        msg
    }

    /// Verify the signature against the authority's public key.
    pub fn verify(
        &self,
        public_key: &Ed25519PublicKey,
        store_identifier: &str,
        name_short: &str,
    ) -> Result<()> {
        let message = Self::signed_message(
            store_identifier,
            self.data_type,
            self.replicate_n,
            name_short,
            self.payload.as_ref(),
        );
        public_key.verify(&message, &self.signature)
    }

    /// Decrypt the carried component. Fails on deletion markers.
    pub fn open(&self, item_key: &ItemKey) -> Result<Vec<u8>> {
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| CoreError::DecryptionFailed("deletion marker carries no payload".into()))?;
        item_key
            .encryption_key(self.data_type)
            .decrypt(&payload.ciphertext, &payload.iv)
    }

    /// Encode to the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.data_type.as_u8());
        buf.push(self.replicate_n);
        if let Some(p) = &self.payload {
            buf.push(p.serialized_version);
            buf.extend_from_slice(p.iv.as_bytes());
            buf.extend_from_slice(&(p.ciphertext.len() as u32).to_be_bytes());
            buf.extend_from_slice(&p.ciphertext);
        }
        push_signature(&mut buf, &self.signature);
        buf
    }

    /// Decode from the wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let data_type = r.data_type()?;
        let replicate_n = r.u8("replicate_n")?;

        let payload = match data_type {
            DataType::Deletion => None,
            DataType::Refresh => {
                let serialized_version = r.u8("serialized_version")?;
                let mut iv = [0u8; IV_LEN];
                iv.copy_from_slice(r.take(IV_LEN, "iv")?);
                let len = r.u32_be("ciphertext length")? as usize;
                let ciphertext = r.take(len, "ciphertext")?.to_vec();
                Some(EncryptedComponent {
                    serialized_version,
                    iv: Iv::from_bytes(iv),
                    ciphertext,
                })
            }
        };

        let signature = r.signature()?;
        r.finish()?;

        Ok(Self {
            data_type,
            replicate_n,
            payload,
            signature,
        })
    }
}

/// Envelope carrying one threshold share at its own location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEnvelope {
    pub data_type: DataType,
    pub share: Option<Vec<u8>>,
    pub signature: Ed25519Signature,
}

impl ShareEnvelope {
    /// Sign a live share for 1-based `index`.
    pub fn seal(keypair: &Keypair, index: u32, share: &[u8]) -> Result<Self> {
        if share.len() < MIN_SHARE_LEN || share.len() > u8::MAX as usize {
            return Err(CoreError::InvalidParameter(format!(
                "share length {} out of range",
                share.len()
            )));
        }
        let message = Self::signed_message(DataType::Refresh, index, Some(share));
        Ok(Self {
            data_type: DataType::Refresh,
            share: Some(share.to_vec()),
            signature: keypair.sign(&message),
        })
    }

    /// Sign a deletion marker for 1-based `index`.
    pub fn seal_deletion(keypair: &Keypair, index: u32) -> Self {
        let message = Self::signed_message(DataType::Deletion, index, None);
        Self {
            data_type: DataType::Deletion,
            share: None,
            signature: keypair.sign(&message),
        }
    }

    /// Bytes covered by the signature.
    pub fn signed_message(data_type: DataType, index: u32, share: Option<&[u8]>) -> Vec<u8> {
        let mut msg = Vec::with_capacity(5 + share.map_or(0, <[u8]>::len));
        msg.push(data_type.as_u8());
        msg.extend_from_slice(&index.to_be_bytes());
        if let Some(share) = share {
            msg.extend_from_slice(share);
        }
        msg
    }

    /// Verify the signature for the share's 1-based `index`.
    pub fn verify(&self, public_key: &Ed25519PublicKey, index: u32) -> Result<()> {
        let message = Self::signed_message(self.data_type, index, self.share.as_deref());
        public_key.verify(&message, &self.signature)
    }

    /// Encode to the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.data_type.as_u8());
        if let Some(share) = &self.share {
            buf.push(share.len() as u8);
            buf.extend_from_slice(share);
        }
        push_signature(&mut buf, &self.signature);
        buf
    }

    /// Decode from the wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let data_type = r.data_type()?;

        let share = match data_type {
            DataType::Deletion => None,
            DataType::Refresh => {
                let len = r.u8("share length")? as usize;
                if len < MIN_SHARE_LEN {
                    return Err(CoreError::Parse(format!("share length {} too short", len)));
                }
                Some(r.take(len, "share")?.to_vec())
            }
        };

        let signature = r.signature()?;
        r.finish()?;

        Ok(Self {
            data_type,
            share,
            signature,
        })
    }
}

fn push_signature(buf: &mut Vec<u8>, signature: &Ed25519Signature) {
    buf.push(SIGNATURE_LEN as u8);
    buf.extend_from_slice(signature.as_bytes());
}

/// Bounds-checked cursor over an envelope.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| CoreError::Parse(format!("truncated {}", what)))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u32_be(&mut self, what: &str) -> Result<u32> {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(self.take(4, what)?);
        Ok(u32::from_be_bytes(arr))
    }

    fn data_type(&mut self) -> Result<DataType> {
        let v = self.u8("data type")?;
        DataType::from_u8(v).ok_or_else(|| CoreError::Parse(format!("unknown data type {}", v)))
    }

    fn signature(&mut self) -> Result<Ed25519Signature> {
        let len = self.u8("signature length")? as usize;
        if len != SIGNATURE_LEN {
            return Err(CoreError::Parse(format!("signature length {}", len)));
        }
        let sig = self.take(len, "signature")?;
        Ed25519Signature::try_from(sig)
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(CoreError::Parse(format!(
                "{} trailing bytes",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}
