//! Runtime configuration for a [`Registry`](crate::registry::Registry).
use std::path::{Path, PathBuf};

use crate::params::{Network, Params};

/// File holding the best chain's headers, relative to the data directory.
pub const HEADERS_FILE: &str = "blockchain_headers";
/// Directory holding fork files, relative to the data directory.
pub const FORKS_DIR: &str = "forks";

/// How far back from a chain tip `fork_at` searches for a header's parent.
pub const DEFAULT_MAX_FORK_DEPTH: u32 = 2_016;

/// Where chain files live and how forks are bounded.
#[derive(Debug, Clone)]
pub struct Config {
    data_dir: PathBuf,
    params: Params,
    max_fork_depth: u32,
    prune_depth: Option<u32>,
}

impl Config {
    /// Configuration for `network` storing headers under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>, network: Network) -> Self {
        Self {
            data_dir: data_dir.into(),
            params: network.params(),
            max_fork_depth: DEFAULT_MAX_FORK_DEPTH,
            prune_depth: None,
        }
    }

    /// Bound the backwards search for a fork's parent (and the sync driver's rewind).
    pub fn with_max_fork_depth(mut self, depth: u32) -> Self {
        self.max_fork_depth = depth;
        self
    }

    /// Use custom consensus parameters instead of the network's built-in ones.
    ///
    /// `params.network` is reported by [`network`](Self::network).
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Drop leaf forks whose tip trails the best tip by more than `depth` after each reorg.
    pub fn with_prune_depth(mut self, depth: u32) -> Self {
        self.prune_depth = Some(depth);
        self
    }

    /// Data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Selected network.
    pub fn network(&self) -> Network {
        self.params.network
    }

    /// Consensus parameters in force.
    pub fn params(&self) -> Params {
        self.params
    }

    /// Fork search depth.
    pub fn max_fork_depth(&self) -> u32 {
        self.max_fork_depth
    }

    /// Pruning depth, if enabled.
    pub fn prune_depth(&self) -> Option<u32> {
        self.prune_depth
    }

    /// Path of the best chain's file.
    pub fn headers_path(&self) -> PathBuf {
        self.data_dir.join(HEADERS_FILE)
    }

    /// Directory of fork files.
    pub fn forks_dir(&self) -> PathBuf {
        self.data_dir.join(FORKS_DIR)
    }
}
