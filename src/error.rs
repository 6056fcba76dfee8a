//! Error taxonomy shared by the codec, target math, header store and registry.
//!
//! Validation verdicts on a single header are *values* ([`InvalidReason`] inside
//! [`ConnectOutcome`](crate::registry::ConnectOutcome)); the enums here with an `Error`
//! suffix are returned as `Err` and mean the operation itself could not proceed.
use std::{convert::Infallible, path::PathBuf};

use bitcoin::BlockHash;
use thiserror::Error;

use crate::{chain::ChainId, header::HEADER_SIZE, pow::Target};

/// A raw header buffer could not be turned into a [`Header`](crate::header::Header).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeaderError {
    /// Input was not exactly one header record long.
    #[error("malformed header: expected {HEADER_SIZE} bytes, got {len}")]
    WrongSize {
        /// Length of the rejected buffer.
        len: usize,
    },
    /// Hex-encoded header (checkpoint constants) did not decode.
    #[error("malformed header hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Compact `bits` that do not describe a usable target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TargetError {
    /// Sign bit of the mantissa set on a non-zero target.
    #[error("compact target {bits:#010x} is negative")]
    Negative {
        /// Offending compact encoding.
        bits: u32,
    },
    /// Exponent/mantissa combination exceeds 256 bits.
    #[error("compact target {bits:#010x} overflows 256 bits")]
    Overflow {
        /// Offending compact encoding.
        bits: u32,
    },
}

/// Failures of the per-chain header file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying file operation failed.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// File being operated on.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
    /// Append was not the immediate successor of the current tip.
    #[error("out-of-order header: expected height {expected}, got {got}")]
    OutOfOrder {
        /// Height the store would accept next.
        expected: u32,
        /// Height that was offered.
        got: u32,
    },
    /// File contents cannot be interpreted as header records.
    #[error("corrupt header file {}: {reason}", path.display())]
    Corrupt {
        /// File being read.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a header was refused by a chain. Returned as a value, never as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidReason {
    /// `prev_blockhash` does not name the chain's header at `height - 1`.
    #[error("previous hash mismatch: expected {expected}, got {got}")]
    Linkage {
        /// Hash held by the chain at `height - 1`.
        expected: BlockHash,
        /// Hash the header points at.
        got: BlockHash,
    },
    /// Height-0 header is not the network genesis.
    #[error("genesis mismatch: got {got}")]
    GenesisMismatch {
        /// Hash of the offered header.
        got: BlockHash,
    },
    /// Header's own `bits` cannot be decoded.
    #[error(transparent)]
    BadBits(#[from] TargetError),
    /// Header claims an easier target than the height allows.
    #[error("target at height {height} too easy: required {required}, got {got}")]
    TargetTooEasy {
        /// Height of the header.
        height: u32,
        /// Hardest-permitted target for that height.
        required: Target,
        /// Target encoded in the header.
        got: Target,
    },
    /// Header's own target exceeds the network limit.
    #[error("target {got} above proof-of-work limit")]
    AboveProofOfWorkLimit {
        /// Target encoded in the header.
        got: Target,
    },
    /// Hash does not meet the header's own target.
    #[error("insufficient proof of work: {hash} vs target {target}")]
    InsufficientProofOfWork {
        /// Header hash.
        hash: BlockHash,
        /// Target it had to meet.
        target: Target,
    },
    /// A checkpoint pins a different hash at this height.
    #[error("checkpoint mismatch at height {height}: expected {expected}, got {got}")]
    CheckpointMismatch {
        /// Checkpoint height.
        height: u32,
        /// Pinned hash.
        expected: BlockHash,
        /// Offered hash.
        got: BlockHash,
    },
    /// Not enough local data to know the required target.
    #[error("required target at height {height} cannot be determined")]
    TargetUnknown {
        /// Height of the header.
        height: u32,
    },
}

/// Failures of registry operations.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Raw bytes were not a header.
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// Storage failed; the operation did not complete.
    #[error(transparent)]
    Storage(#[from] StoreError),
    /// Header height is not the chain's next height.
    #[error("out-of-order header for chain {chain}: expected height {expected}, got {got}")]
    OutOfOrder {
        /// Chain addressed.
        chain: ChainId,
        /// Next height the chain accepts.
        expected: u32,
        /// Height offered.
        got: u32,
    },
    /// Chain id does not (or no longer) refer to a registered chain.
    #[error("unknown chain {0}")]
    UnknownChain(ChainId),
    /// Fork header failed validation against its parent.
    #[error("fork header rejected: {0}")]
    Rejected(InvalidReason),
    /// Fork header is already part of the parent chain.
    #[error("header {hash} is already at height {height} of chain {chain}")]
    AlreadyKnown {
        /// Chain that holds it.
        chain: ChainId,
        /// Height.
        height: u32,
        /// Header hash.
        hash: BlockHash,
    },
    /// Fork height is not strictly inside the parent chain.
    #[error("cannot fork chain {chain} at height {height}: parent tip is {tip:?}")]
    NotADivergence {
        /// Parent chain.
        chain: ChainId,
        /// Requested forkpoint.
        height: u32,
        /// Parent tip height.
        tip: Option<u32>,
    },
    /// Forks at or below the last checkpoint are not tracked.
    #[error("cannot fork at height {height}: at or below checkpoint {checkpoint}")]
    BelowCheckpoint {
        /// Requested forkpoint.
        height: u32,
        /// Highest checkpoint height.
        checkpoint: u32,
    },
    /// Fork header's parent was not found near the chain tip.
    #[error("previous header {prev} not found within {depth} headers of chain {chain} tip")]
    ParentNotFound {
        /// Chain searched.
        chain: ChainId,
        /// Hash searched for.
        prev: BlockHash,
        /// Search depth.
        depth: u32,
    },
    /// Reorganization did not settle.
    #[error("swap cascade did not settle after {0} steps")]
    SwapLimit(usize),
}

impl From<Infallible> for ChainError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}
