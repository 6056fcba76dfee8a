//! On-disk persistence of chains: one flat file of 80-byte records per chain.
//!
//! The best chain always lives in [`HEADERS_FILE`](crate::config::HEADERS_FILE); every
//! other chain lives under [`FORKS_DIR`](crate::config::FORKS_DIR) in a file whose name
//! carries enough to re-attach it after a restart (see [`ForkFileName`]).
use std::{fmt, str::FromStr};

use bitcoin::BlockHash;

pub mod file_store;
pub use file_store::HeaderFile;

/// Identity of a fork file: `fork_<forkpoint>_<prev hash>_<first hash>`.
///
/// Hashes are written in their usual display (byte-reversed) hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForkFileName {
    /// Height of the first record in the file.
    pub forkpoint: u32,
    /// Hash of the parent's header at `forkpoint - 1`.
    pub prev_hash: BlockHash,
    /// Hash of the first record in the file.
    pub first_hash: BlockHash,
}

impl ForkFileName {
    /// Parse a file name, `None` for anything that is not a fork file.
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.split('_');
        if parts.next()? != "fork" {
            return None;
        }
        let forkpoint = parts.next()?.parse().ok()?;
        let prev_hash = BlockHash::from_str(parts.next()?).ok()?;
        let first_hash = BlockHash::from_str(parts.next()?).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            forkpoint,
            prev_hash,
            first_hash,
        })
    }
}

impl fmt::Display for ForkFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fork_{}_{}_{}",
            self.forkpoint, self.prev_hash, self.first_hash
        )
    }
}
