#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! headerchain: header-chain verification and fork choice for proof-of-work light clients.
//!
//! ## What it keeps
//! - Every header chain a client has been shown, as a tree of forks rooted at genesis.
//! - One flat file of 80-byte records per chain: the best chain in the main headers
//!   file, every other chain in a fork file that can be re-attached after a restart.
//!
//! ## What it checks
//! - Linkage: each header names its predecessor's hash.
//! - Difficulty: the header's target is no easier than the height allows
//!   ([`target_for_height`]), and its hash meets that target.
//! - Checkpoints: trusted retarget-boundary headers pin history and bound forking.
//!
//! ## What it decides
//! - The best chain is the one with the most cumulative work; it is always the root.
//!   When a fork overtakes its parent the two swap storage, cascading up the tree.
//!
//! ## Minimal usage
//! ```rust,no_run
//! use headerchain::prelude::*;
//!
//! fn run(raw: &[u8]) -> Result<(), ChainError> {
//!     let mut registry = Registry::open(Config::new("/var/lib/client", Network::Mainnet))?;
//!     let best = registry.best_chain();
//!     match registry.connect_header(best, raw)? {
//!         ConnectOutcome::Connected => {}
//!         ConnectOutcome::Orphan => { /* ask the server for earlier headers */ }
//!         ConnectOutcome::Invalid(reason) => eprintln!("peer sent a bad header: {reason}"),
//!     }
//!     Ok(())
//! }
//! ```

/// Identifiers and the per-chain record of a fork tree node.
pub mod chain;

/// Data directory, network and fork limits.
pub mod config;

/// Required target per height: legacy checkpoint reads and the moving-average rule.
pub mod difficulty;

/// Error types.
pub mod error;

/// The 80-byte header record.
pub mod header;

/// Per-network consensus constants and checkpoints.
pub mod params;

/// Compact targets and proof-of-work arithmetic.
pub mod pow;

/// Chain registry, validation and reorganization.
pub mod registry;

/// Header files on disk.
pub mod store;

/// Async header download driver.
#[cfg(feature = "runtime")]
pub mod sync;

// Public re-exports
pub use chain::{Chain, ChainId};
pub use config::Config;
pub use difficulty::{target_for_height, HeaderLookup, Overlay, RequiredTarget};
pub use error::{ChainError, HeaderError, InvalidReason, StoreError, TargetError};
pub use header::{Header, HEADER_SIZE};
pub use params::{Network, Params};
pub use pow::{Target, Work};
pub use registry::{ConnectOutcome, Registry, SharedRegistry};
pub use store::HeaderFile;
#[cfg(feature = "runtime")]
pub use sync::{HeaderSource, Synchronizer};

/// Convenience prelude for end users.
pub mod prelude {
    pub use crate::{
        ChainError, ChainId, Config, ConnectOutcome, Header, InvalidReason, Network, Registry,
        RequiredTarget, SharedRegistry, Target, Work,
    };
    #[cfg(feature = "runtime")]
    pub use crate::{HeaderSource, Synchronizer};
}
