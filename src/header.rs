//! The fixed 80-byte header record and its identity hash.
use bitcoin::{
    block::{Header as RawHeader, Version},
    consensus::encode,
    BlockHash, CompactTarget, TxMerkleNode,
};

use crate::error::HeaderError;

/// Size of one serialized header record.
pub const HEADER_SIZE: usize = 80;

/// A decoded block header plus the height it was read or received at.
///
/// `height` is positional: it comes from where the record sits in a chain, not
/// from the 80 bytes, and does not take part in [`Header::block_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Block version (signed, little-endian on the wire).
    pub version: i32,
    /// Hash of the previous header.
    pub prev_blockhash: BlockHash,
    /// Merkle root of the block's transactions.
    pub merkle_root: TxMerkleNode,
    /// Block timestamp, seconds since the epoch.
    pub time: u32,
    /// Compact target.
    pub bits: u32,
    /// Nonce.
    pub nonce: u32,
    /// Height this header sits at.
    pub height: u32,
}

impl Header {
    /// Decode one record. Fails only if `bytes` is not exactly [`HEADER_SIZE`] long.
    pub fn decode(bytes: &[u8], height: u32) -> Result<Self, HeaderError> {
        if bytes.len() != HEADER_SIZE {
            return Err(HeaderError::WrongSize { len: bytes.len() });
        }
        // Every 80-byte buffer is a valid consensus header.
        let raw: RawHeader =
            encode::deserialize(bytes).map_err(|_| HeaderError::WrongSize { len: bytes.len() })?;
        Ok(Self::from_raw(raw, height))
    }

    /// Decode a hex-encoded record.
    pub fn from_hex(s: &str, height: u32) -> Result<Self, HeaderError> {
        let bytes = hex::decode(s)?;
        Self::decode(&bytes, height)
    }

    /// Consensus serialization; exact inverse of [`Header::decode`].
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&encode::serialize(&self.to_raw()));
        out
    }

    /// Double-SHA256 identity hash. Independent of `height`.
    pub fn block_hash(&self) -> BlockHash {
        self.to_raw().block_hash()
    }

    /// Wrap a `bitcoin` header at a given height.
    pub fn from_raw(raw: RawHeader, height: u32) -> Self {
        Self {
            version: raw.version.to_consensus(),
            prev_blockhash: raw.prev_blockhash,
            merkle_root: raw.merkle_root,
            time: raw.time,
            bits: raw.bits.to_consensus(),
            nonce: raw.nonce,
            height,
        }
    }

    /// The same header as a `bitcoin` consensus type.
    pub fn to_raw(&self) -> RawHeader {
        RawHeader {
            version: Version::from_consensus(self.version),
            prev_blockhash: self.prev_blockhash,
            merkle_root: self.merkle_root,
            time: self.time,
            bits: CompactTarget::from_consensus(self.bits),
            nonce: self.nonce,
        }
    }
}

/// Hash of the first record in `bytes`, used when records are moved between files.
pub(crate) fn hash_of_record(bytes: &[u8]) -> Result<BlockHash, HeaderError> {
    let end = HEADER_SIZE.min(bytes.len());
    Header::decode(&bytes[..end], 0).map(|h| h.block_hash())
}
