//! The fork tree: every known chain, header validation, and best-chain maintenance.
//!
//! Chains live in an arena addressed by [`ChainId`]. The root is always the best chain
//! and owns the main headers file; every other chain is a fork file resting on its
//! parent. After any change, each parent has at least as much cumulative work as each
//! of its children; when a child overtakes its parent the two swap places, repeated up
//! the tree until the order holds again.
use std::{
    collections::BTreeMap,
    fs, mem,
    path::{Path, PathBuf},
    sync::Arc,
};

use bitcoin::{hashes::Hash, BlockHash};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{
    chain::{Chain, ChainId, WorkIndex},
    config::Config,
    difficulty::{target_for_height, HeaderLookup, Overlay, RequiredTarget},
    error::{ChainError, InvalidReason, StoreError},
    header::{hash_of_record, Header},
    params::Params,
    pow::{Target, Work},
    store::{ForkFileName, HeaderFile},
};

/// A registry shared between tasks: many readers or one writer.
///
/// The lock covers every chain at once rather than one chain at a time. A swap rewrites
/// a child and its parent together, and a cascade can reach the root, so writers to
/// different chains are serialized as well.
pub type SharedRegistry = Arc<RwLock<Registry>>;

/// Tip older than this many seconds is considered stale.
const STALE_TIP_SECS: u64 = 8 * 60 * 60;

/// Result of offering a header to a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Validated and appended.
    Connected,
    /// Its parent is not known at `height - 1` on any chain.
    Orphan,
    /// Rejected; the chain is unchanged.
    Invalid(InvalidReason),
}

enum Verdict {
    Valid,
    Orphan,
    Invalid(InvalidReason),
}

/// Headers of one chain as seen from its tip, below a height bound.
#[derive(Debug, Clone, Copy)]
pub struct ChainView<'a> {
    registry: &'a Registry,
    chain: ChainId,
    end: u32,
}

impl HeaderLookup for ChainView<'_> {
    type Error = ChainError;

    fn header_at(&self, height: u32) -> Result<Option<Header>, ChainError> {
        if height >= self.end {
            return Ok(None);
        }
        self.registry.header_at(self.chain, height)
    }
}

/// All known chains for one network, rooted at its genesis.
#[derive(Debug)]
pub struct Registry {
    config: Config,
    params: Params,
    checkpoints: BTreeMap<u32, Header>,
    chains: Vec<Option<Chain>>,
    root: ChainId,
}

impl Registry {
    /// Open the data directory, creating it if needed, and re-attach every fork file.
    ///
    /// A main file that does not start with the network genesis is emptied. Fork files
    /// that cannot be attached, that are already contained in their parent or that sit
    /// at or below the last checkpoint are deleted; forks that only extend their
    /// parent's tip are folded back into it.
    pub fn open(config: Config) -> Result<Self, ChainError> {
        let forks_dir = config.forks_dir();
        fs::create_dir_all(&forks_dir).map_err(|e| StoreError::io(&forks_dir, e))?;

        let params = config.params();
        let checkpoints = params
            .checkpoint_headers()?
            .into_iter()
            .map(|h| (h.height, h))
            .collect();

        let mut main = HeaderFile::open(config.headers_path(), 0)?;
        if let Some(first) = main.read(0)? {
            if first.block_hash() != params.genesis {
                warn!(
                    path = %main.path().display(),
                    got = %first.block_hash(),
                    "main headers file does not start at genesis, discarding"
                );
                main.truncate_from(0)?;
            }
        }
        let root = ChainId(0);
        let chain = Chain::new(root, None, params.genesis, BlockHash::all_zeros(), main)?;

        let mut registry = Self {
            config,
            params,
            checkpoints,
            chains: vec![Some(chain)],
            root,
        };
        registry.load_forks()?;
        info!(
            chains = registry.chains().len(),
            tip = ?registry.tip_height(root)?,
            "header registry opened"
        );
        Ok(registry)
    }

    /// Wrap in the shared read/write handle.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Configuration the registry was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Network parameters in force.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The chain with the most cumulative work (first seen wins ties).
    pub fn best_chain(&self) -> ChainId {
        self.root
    }

    /// Every live chain, in creation order.
    pub fn chains(&self) -> Vec<ChainId> {
        self.chains.iter().flatten().map(|c| c.id).collect()
    }

    /// Borrow a chain.
    pub fn chain(&self, id: ChainId) -> Result<&Chain, ChainError> {
        self.chains
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(ChainError::UnknownChain(id))
    }

    fn chain_mut(&mut self, id: ChainId) -> Result<&mut Chain, ChainError> {
        self.chains
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ChainError::UnknownChain(id))
    }

    /// Parent of `id`, `None` for the best chain.
    pub fn parent(&self, id: ChainId) -> Result<Option<ChainId>, ChainError> {
        Ok(self.chain(id)?.parent)
    }

    /// Chains forking directly off `id`.
    pub fn children(&self, id: ChainId) -> Vec<ChainId> {
        self.chains
            .iter()
            .flatten()
            .filter(|c| c.parent == Some(id))
            .map(|c| c.id)
            .collect()
    }

    /// Highest height of `id`.
    pub fn tip_height(&self, id: ChainId) -> Result<Option<u32>, ChainError> {
        Ok(self.chain(id)?.tip_height())
    }

    /// Number of headers `id` stores itself.
    pub fn branch_size(&self, id: ChainId) -> Result<u32, ChainError> {
        Ok(self.chain(id)?.branch_size())
    }

    /// Header at `height` as seen from `id`'s tip, reading parents below its forkpoint.
    pub fn header_at(&self, id: ChainId, height: u32) -> Result<Option<Header>, ChainError> {
        let mut chain = self.chain(id)?;
        while height < chain.forkpoint {
            match chain.parent {
                Some(parent) => chain = self.chain(parent)?,
                None => return Ok(None),
            }
        }
        Ok(chain.store.read(height)?)
    }

    /// Hash of [`header_at`](Self::header_at).
    pub fn hash_at(&self, id: ChainId, height: u32) -> Result<Option<BlockHash>, ChainError> {
        Ok(self.header_at(id, height)?.map(|h| h.block_hash()))
    }

    /// Whether `id` has the header `hash` at `height`.
    pub fn contains(&self, id: ChainId, height: u32, hash: BlockHash) -> Result<bool, ChainError> {
        Ok(self.hash_at(id, height)? == Some(hash))
    }

    /// `id`'s headers as a [`HeaderLookup`].
    pub fn view(&self, id: ChainId) -> ChainView<'_> {
        ChainView {
            registry: self,
            chain: id,
            end: u32::MAX,
        }
    }

    fn view_below(&self, id: ChainId, end: u32) -> ChainView<'_> {
        ChainView {
            registry: self,
            chain: id,
            end,
        }
    }

    /// Cumulative work from genesis through `id`'s tip.
    pub fn chainwork(&self, id: ChainId) -> Result<Work, ChainError> {
        self.chainwork_through(id, u32::MAX)
    }

    /// Cumulative work from genesis through `height` on `id`.
    pub fn chainwork_through(&self, id: ChainId, height: u32) -> Result<Work, ChainError> {
        let mut chain = self.chain(id)?;
        let mut total = Work::ZERO;
        let mut height = height;
        loop {
            if height >= chain.forkpoint {
                total += chain.own_work_through(height)?;
                if chain.forkpoint == 0 {
                    return Ok(total);
                }
                height = chain.forkpoint - 1;
            }
            match chain.parent {
                Some(parent) => chain = self.chain(parent)?,
                None => return Ok(total),
            }
        }
    }

    /// Chains holding `hash` at `height`, most work first.
    pub fn chains_containing(
        &self,
        height: u32,
        hash: BlockHash,
    ) -> Result<Vec<ChainId>, ChainError> {
        let mut found = Vec::new();
        for id in self.chains() {
            if self.contains(id, height, hash)? {
                found.push((self.chainwork(id)?, id));
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }

    /// Best chain already holding `header`.
    pub fn chain_containing(&self, header: &Header) -> Result<Option<ChainId>, ChainError> {
        Ok(self
            .chains_containing(header.height, header.block_hash())?
            .into_iter()
            .next())
    }

    /// Chain whose tip `header` would extend.
    pub fn find_connectable(&self, header: &Header) -> Result<Option<ChainId>, ChainError> {
        for id in self.chains() {
            let chain = self.chain(id)?;
            if chain.next_height() != header.height {
                continue;
            }
            if header.height == 0 {
                return Ok(Some(id));
            }
            if self.contains(id, header.height - 1, header.prev_blockhash)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Short display name: leading-zero-stripped hash at the highest forkpoint among `id`
    /// and its children, 10 hex digits.
    pub fn name(&self, id: ChainId) -> Result<String, ChainError> {
        let chain = self.chain(id)?;
        let height = self
            .children(id)
            .into_iter()
            .filter_map(|c| self.chain(c).ok().map(|c| c.forkpoint))
            .fold(chain.forkpoint, u32::max);
        let hash = self
            .hash_at(id, height)?
            .map_or_else(String::new, |h| h.to_string());
        Ok(hash.trim_start_matches('0').chars().take(10).collect())
    }

    /// Whether `id`'s tip timestamp is more than 8 hours before `now` (unix seconds).
    pub fn is_tip_stale(&self, id: ChainId, now: u64) -> Result<bool, ChainError> {
        let Some(tip) = self.tip_height(id)? else {
            return Ok(true);
        };
        Ok(match self.header_at(id, tip)? {
            Some(h) => u64::from(h.time) + STALE_TIP_SECS < now,
            None => true,
        })
    }

    /// Required target for a header at `height` on top of `id`, using `id`'s headers
    /// below `height` and the network checkpoints.
    pub fn target_for_height(&self, id: ChainId, height: u32) -> Result<RequiredTarget, ChainError> {
        self.chain(id)?;
        let lookup = Overlay(self.view_below(id, height), &self.checkpoints);
        target_for_height(&self.params, height, &lookup)
    }

    /// Decode `raw` at `id`'s next height and [`connect`](Self::connect) it.
    pub fn connect_header(&mut self, id: ChainId, raw: &[u8]) -> Result<ConnectOutcome, ChainError> {
        let height = self.chain(id)?.next_height();
        let header = Header::decode(raw, height)?;
        self.connect(id, header)
    }

    /// Validate `header` against `id` and append it.
    ///
    /// `header.height` must be the chain's next height. Validation failures come back as
    /// [`ConnectOutcome`] values and leave the registry untouched; `Err` means the call
    /// itself was wrong or storage failed.
    pub fn connect(&mut self, id: ChainId, header: Header) -> Result<ConnectOutcome, ChainError> {
        let outcome = self.extend(id, &header)?;
        if outcome == ConnectOutcome::Connected && self.settle(id)? > 0 {
            self.prune()?;
        }
        Ok(outcome)
    }

    fn extend(&mut self, id: ChainId, header: &Header) -> Result<ConnectOutcome, ChainError> {
        let expected = self.chain(id)?.next_height();
        if header.height != expected {
            return Err(ChainError::OutOfOrder {
                chain: id,
                expected,
                got: header.height,
            });
        }
        match self.verify(id, header)? {
            Verdict::Valid => {}
            Verdict::Orphan => return Ok(ConnectOutcome::Orphan),
            Verdict::Invalid(reason) => {
                debug!(chain = %id, height = header.height, %reason, "rejected header");
                return Ok(ConnectOutcome::Invalid(reason));
            }
        }
        self.chain_mut(id)?.append(header)?;
        Ok(ConnectOutcome::Connected)
    }

    /// Start a new chain at `header.height` from `parent`.
    ///
    /// `parent` must already hold a different header at that height; the new chain's
    /// file holds exactly `header`. The header is validated like [`connect`](Self::connect).
    pub fn fork(&mut self, parent: ChainId, header: Header) -> Result<ChainId, ChainError> {
        let height = header.height;
        let checkpoint = self.params.max_checkpoint_height();
        if height <= checkpoint {
            return Err(ChainError::BelowCheckpoint { height, checkpoint });
        }
        let tip = self.tip_height(parent)?;
        if tip.map_or(true, |t| height > t) {
            return Err(ChainError::NotADivergence {
                chain: parent,
                height,
                tip,
            });
        }

        let hash = header.block_hash();
        if let Some(holder) = self.chains_containing(height, hash)?.into_iter().next() {
            return Err(ChainError::AlreadyKnown {
                chain: holder,
                height,
                hash,
            });
        }

        // Attach to whichever ancestor actually stores `height`.
        let mut owner = parent;
        loop {
            let chain = self.chain(owner)?;
            match chain.parent {
                Some(p) if height <= chain.forkpoint => owner = p,
                _ => break,
            }
        }

        let prev_hash = match self.verify(owner, &header)? {
            Verdict::Valid => header.prev_blockhash,
            Verdict::Orphan | Verdict::Invalid(InvalidReason::Linkage { .. }) => {
                let expected = self.hash_at(owner, height - 1)?.unwrap_or_else(BlockHash::all_zeros);
                return Err(ChainError::Rejected(InvalidReason::Linkage {
                    expected,
                    got: header.prev_blockhash,
                }));
            }
            Verdict::Invalid(reason) => return Err(ChainError::Rejected(reason)),
        };

        let name = ForkFileName {
            forkpoint: height,
            prev_hash,
            first_hash: hash,
        };
        let store = HeaderFile::create_with(self.fork_path(&name), height, &header.encode())?;
        let id = ChainId(self.chains.len());
        self.chains
            .push(Some(Chain::new(id, Some(owner), hash, prev_hash, store)?));
        info!(chain = %id, parent = %owner, forkpoint = height, %hash, "created fork");

        if self.settle(id)? > 0 {
            self.prune()?;
        }
        Ok(id)
    }

    /// Fork `id` with the raw header `raw`, locating its parent by scanning back from
    /// the tip at most `max_fork_depth` headers.
    pub fn fork_at(&mut self, id: ChainId, raw: &[u8]) -> Result<ChainId, ChainError> {
        let mut header = Header::decode(raw, 0)?;
        let depth = self.config.max_fork_depth();
        let tip = self.tip_height(id)?;
        let not_found = ChainError::ParentNotFound {
            chain: id,
            prev: header.prev_blockhash,
            depth,
        };
        let Some(tip) = tip else {
            return Err(not_found);
        };
        let floor = tip.saturating_sub(depth);
        for height in (floor..=tip).rev() {
            if self.contains(id, height, header.prev_blockhash)? {
                header.height = height + 1;
                return self.fork(id, header);
            }
        }
        Err(not_found)
    }

    fn verify(&self, id: ChainId, header: &Header) -> Result<Verdict, ChainError> {
        let height = header.height;
        let hash = header.block_hash();
        if height == 0 {
            return Ok(if hash == self.params.genesis {
                Verdict::Valid
            } else {
                Verdict::Invalid(InvalidReason::GenesisMismatch { got: hash })
            });
        }

        match self.hash_at(id, height - 1)? {
            Some(prev) if prev == header.prev_blockhash => {}
            Some(prev) => {
                if self
                    .chains_containing(height - 1, header.prev_blockhash)?
                    .is_empty()
                {
                    return Ok(Verdict::Orphan);
                }
                return Ok(Verdict::Invalid(InvalidReason::Linkage {
                    expected: prev,
                    got: header.prev_blockhash,
                }));
            }
            None => return Ok(Verdict::Orphan),
        }

        Ok(match self.check_work(id, header, hash)? {
            Some(reason) => Verdict::Invalid(reason),
            None => Verdict::Valid,
        })
    }

    fn check_work(
        &self,
        id: ChainId,
        header: &Header,
        hash: BlockHash,
    ) -> Result<Option<InvalidReason>, ChainError> {
        let height = header.height;
        let own = match Target::from_compact(header.bits) {
            Ok(t) => t,
            Err(e) => return Ok(Some(InvalidReason::BadBits(e))),
        };

        match self.target_for_height(id, height)? {
            RequiredTarget::Known(required) => {
                if own > required {
                    return Ok(Some(InvalidReason::TargetTooEasy {
                        height,
                        required,
                        got: own,
                    }));
                }
            }
            RequiredTarget::Unknown => {
                if height > self.params.max_checkpoint_height() {
                    return Ok(Some(InvalidReason::TargetUnknown { height }));
                }
                if own > self.params.pow_limit {
                    return Ok(Some(InvalidReason::AboveProofOfWorkLimit { got: own }));
                }
            }
        }

        if !own.is_met_by(&hash) {
            return Ok(Some(InvalidReason::InsufficientProofOfWork { hash, target: own }));
        }
        if let Some(cp) = self.checkpoints.get(&height) {
            let expected = cp.block_hash();
            if expected != hash {
                return Ok(Some(InvalidReason::CheckpointMismatch {
                    height,
                    expected,
                    got: hash,
                }));
            }
        }
        Ok(None)
    }

    /// Swap `id` upwards while it has strictly more work than its parent.
    fn settle(&mut self, id: ChainId) -> Result<usize, ChainError> {
        let limit = self.chains().len();
        let mut swaps = 0;
        while let Some(parent) = self.chain(id)?.parent {
            if self.chainwork(id)? <= self.chainwork(parent)? {
                break;
            }
            if swaps >= limit {
                return Err(ChainError::SwapLimit(swaps));
            }
            self.swap_with_parent(id, parent)?;
            swaps += 1;
        }
        Ok(swaps)
    }

    /// Exchange the headers from `child`'s forkpoint on between `child` and `parent`.
    ///
    /// Disk order: the parent's tail is written to a new fork file, then the parent's
    /// file is cut at the forkpoint and receives the child's headers, and finally the
    /// child's old file is deleted. Reload repairs a crash between any two steps.
    fn swap_with_parent(&mut self, child: ChainId, parent: ChainId) -> Result<(), ChainError> {
        let (fp, child_prev, child_records) = {
            let c = self.chain(child)?;
            (c.forkpoint, c.prev_hash, c.store.read_raw_from(c.forkpoint)?)
        };
        let tail = self.chain(parent)?.store.read_raw_from(fp)?;
        if tail.is_empty() {
            let path = self.chain(parent)?.store.path().to_path_buf();
            return Err(StoreError::Corrupt {
                path,
                reason: format!("no headers at or above forkpoint {fp} of chain {child}"),
            }
            .into());
        }
        let tail_first = hash_of_record(&tail)?;

        let name = ForkFileName {
            forkpoint: fp,
            prev_hash: child_prev,
            first_hash: tail_first,
        };
        let demoted = HeaderFile::create_with(self.fork_path(&name), fp, &tail)?;
        if let Err(e) = self.rewrite_branch(parent, fp, &child_records, &tail) {
            if let Err(cleanup) = demoted.remove() {
                warn!(error = %cleanup, "could not remove unused fork file");
            }
            return Err(e);
        }

        // The parent's file now carries the child's branch; the fresh file takes the tail.
        let (grandparent, p_fp, p_fp_hash, p_prev, promoted, mut promoted_work) = {
            let p = self.chain_mut(parent)?;
            let promoted = mem::replace(&mut p.store, demoted);
            let promoted_work = mem::take(&mut p.work);
            (p.parent, p.forkpoint, p.forkpoint_hash, p.prev_hash, promoted, promoted_work)
        };
        promoted_work.rebuild_from(&promoted, fp)?;
        let demoted_work = WorkIndex::scan(&self.chain(parent)?.store)?;

        let old_child_store = {
            let c = self.chain_mut(child)?;
            c.parent = grandparent;
            c.forkpoint = p_fp;
            c.forkpoint_hash = p_fp_hash;
            c.prev_hash = p_prev;
            c.work = promoted_work;
            mem::replace(&mut c.store, promoted)
        };
        {
            let p = self.chain_mut(parent)?;
            p.parent = Some(child);
            p.forkpoint = fp;
            p.forkpoint_hash = tail_first;
            p.prev_hash = child_prev;
            p.work = demoted_work;
        }
        old_child_store.remove()?;
        if self.root == parent {
            self.root = child;
        }

        // Former siblings that branched at or below the child's forkpoint now rest on it.
        for sibling in self.children(parent) {
            let (s_fp, s_prev) = {
                let s = self.chain(sibling)?;
                (s.forkpoint, s.prev_hash)
            };
            if sibling != child && self.contains(child, s_fp - 1, s_prev)? {
                self.chain_mut(sibling)?.parent = Some(child);
            }
        }

        info!(
            promoted = %child,
            demoted = %parent,
            forkpoint = fp,
            "swapped chain with parent"
        );
        Ok(())
    }

    /// Replace `id`'s records from `fp` on with `records`.
    ///
    /// On failure the file is put back to `previous` so the chain and its children keep
    /// reading the headers they had; if even that fails the work index is rebuilt from
    /// whatever the file still holds.
    fn rewrite_branch(
        &mut self,
        id: ChainId,
        fp: u32,
        records: &[u8],
        previous: &[u8],
    ) -> Result<(), ChainError> {
        let chain = self.chain_mut(id)?;
        let written = chain
            .store
            .truncate_from(fp)
            .and_then(|_| chain.store.append_raw(records));
        let Err(e) = written else {
            return Ok(());
        };

        let restored = chain
            .store
            .truncate_from(fp)
            .and_then(|_| chain.store.append_raw(previous));
        match restored {
            Ok(()) => warn!(chain = %id, forkpoint = fp, error = %e, "swap aborted, branch restored"),
            Err(restore) => {
                warn!(chain = %id, forkpoint = fp, error = %restore, "could not restore branch after failed swap");
                chain.work.rebuild_from(&chain.store, fp)?;
            }
        }
        Err(e.into())
    }

    /// Drop leaf forks that trail the best tip by more than the configured depth.
    fn prune(&mut self) -> Result<usize, ChainError> {
        let Some(depth) = self.config.prune_depth() else {
            return Ok(0);
        };
        let Some(best_tip) = self.tip_height(self.root)? else {
            return Ok(0);
        };
        let mut removed = 0;
        loop {
            let stale: Vec<ChainId> = self
                .chains()
                .into_iter()
                .filter(|&id| id != self.root && self.children(id).is_empty())
                .filter(|&id| {
                    self.tip_height(id)
                        .ok()
                        .flatten()
                        .map_or(true, |tip| tip.saturating_add(depth) < best_tip)
                })
                .collect();
            if stale.is_empty() {
                return Ok(removed);
            }
            for id in stale {
                self.remove_chain(id)?;
                removed += 1;
                info!(chain = %id, best_tip, depth, "pruned stale fork");
            }
        }
    }

    fn remove_chain(&mut self, id: ChainId) -> Result<(), ChainError> {
        let chain = self
            .chains
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(ChainError::UnknownChain(id))?;
        chain.store.remove()?;
        Ok(())
    }

    fn fork_path(&self, name: &ForkFileName) -> PathBuf {
        self.config.forks_dir().join(name.to_string())
    }

    fn load_forks(&mut self) -> Result<(), ChainError> {
        let dir = self.config.forks_dir();
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.ends_with(".tmp") {
                debug!(path = %path.display(), "removing leftover temporary fork file");
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
                continue;
            }
            match ForkFileName::parse(file_name) {
                Some(name) => found.push((name, path)),
                None => debug!(path = %path.display(), "ignoring unrecognized file"),
            }
        }
        found.sort_by(|a, b| a.0.forkpoint.cmp(&b.0.forkpoint).then(a.1.cmp(&b.1)));

        for (name, path) in found {
            self.load_fork(name, &path)?;
        }

        let mut swaps = 0;
        for _ in 0..=self.chains.len() {
            let mut pass = 0;
            for id in self.chains() {
                pass += self.settle(id)?;
            }
            if pass == 0 {
                if swaps > 0 {
                    self.prune()?;
                }
                return Ok(());
            }
            swaps += pass;
        }
        Err(ChainError::SwapLimit(swaps))
    }

    fn load_fork(&mut self, name: ForkFileName, path: &Path) -> Result<(), ChainError> {
        let discard = |reason: &str| -> Result<(), ChainError> {
            warn!(path = %path.display(), reason, "discarding fork file");
            fs::remove_file(path).map_err(|e| StoreError::io(path, e).into())
        };

        if name.forkpoint <= self.params.max_checkpoint_height() {
            return discard("at or below last checkpoint");
        }
        let store = HeaderFile::open(path, name.forkpoint)?;
        let Some(first) = store.read(name.forkpoint)? else {
            drop(store);
            return discard("empty");
        };
        if first.block_hash() != name.first_hash {
            drop(store);
            return discard("first header does not match file name");
        }
        if let Some(tip) = store.read_tip()? {
            if !self.chains_containing(tip.height, tip.block_hash())?.is_empty() {
                store.remove()?;
                debug!(path = %path.display(), "removed fork already held by another chain");
                return Ok(());
            }
        }
        let Some(owner) = self.owner_of(name.forkpoint - 1, name.prev_hash)? else {
            drop(store);
            return discard("no chain holds its parent");
        };

        // First height where the fork disagrees with its parent.
        let mut split = name.forkpoint;
        while let Some(header) = store.read(split)? {
            if self.hash_at(owner, split)? != Some(header.block_hash()) {
                break;
            }
            split += 1;
        }
        if store.tip_height().map_or(true, |tip| split > tip) {
            store.remove()?;
            debug!(path = %path.display(), "removed fork already contained in parent");
            return Ok(());
        }

        if self.hash_at(owner, split)?.is_none() {
            // The parent stops where the fork continues: an interrupted swap.
            for height in split..store.next_height() {
                let Some(header) = store.read(height)? else {
                    break;
                };
                if self.extend(owner, &header)? != ConnectOutcome::Connected {
                    warn!(path = %path.display(), height, "stopped absorbing fork at invalid header");
                    break;
                }
            }
            info!(path = %path.display(), chain = %owner, "absorbed fork into parent");
            store.remove()?;
            return Ok(());
        }

        let store = if split > name.forkpoint {
            let records = store.read_raw_from(split)?;
            let renamed = ForkFileName {
                forkpoint: split,
                prev_hash: self.hash_at(owner, split - 1)?.unwrap_or(name.prev_hash),
                first_hash: hash_of_record(&records)?,
            };
            let moved = HeaderFile::create_with(self.fork_path(&renamed), split, &records)?;
            store.remove()?;
            moved
        } else {
            store
        };

        let Some(first) = store.read(split)? else {
            store.remove()?;
            return Ok(());
        };
        if !matches!(self.verify(owner, &first)?, Verdict::Valid) {
            let path = store.path().to_path_buf();
            store.remove()?;
            warn!(path = %path.display(), "discarded fork whose first header does not connect");
            return Ok(());
        }

        let id = ChainId(self.chains.len());
        let chain = Chain::new(id, Some(owner), first.block_hash(), first.prev_blockhash, store)?;
        debug!(chain = %id, parent = %owner, forkpoint = split, "loaded fork");
        self.chains.push(Some(chain));
        Ok(())
    }

    /// The chain whose own file stores `hash` at `height`.
    fn owner_of(&self, height: u32, hash: BlockHash) -> Result<Option<ChainId>, ChainError> {
        for chain in self.chains.iter().flatten() {
            if chain.store.contains_height(height)
                && chain.store.read(height)?.map(|h| h.block_hash()) == Some(hash)
            {
                return Ok(Some(chain.id));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::TxMerkleNode;
    use tempfile::TempDir;

    use super::*;
    use crate::params::Network;

    const GENESIS: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4adae5494dffff7f2002000000";

    fn mine(prev: BlockHash, height: u32, salt: u32) -> Header {
        let mut merkle = [0u8; 32];
        merkle[..4].copy_from_slice(&salt.to_le_bytes());
        let mut header = Header {
            version: 0x2000_0000,
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::from_byte_array(merkle),
            time: 1_600_000_000 + height * 90,
            bits: 0x207f_ffff,
            nonce: 0,
            height,
        };
        let target = Target::from_compact(header.bits).unwrap();
        while !target.is_met_by(&header.block_hash()) {
            header.nonce += 1;
        }
        header
    }

    /// Extend `id` with `n` fresh headers.
    fn grow(reg: &mut Registry, id: ChainId, n: u32, salt: u32) {
        for _ in 0..n {
            let tip = reg.tip_height(id).unwrap().unwrap();
            let prev = reg.hash_at(id, tip).unwrap().unwrap();
            let header = mine(prev, tip + 1, salt);
            assert_eq!(reg.connect(id, header).unwrap(), ConnectOutcome::Connected);
        }
    }

    #[test]
    fn failed_swap_leaves_chains_readable() {
        let dir = TempDir::new().unwrap();
        let mut reg = Registry::open(Config::new(dir.path(), Network::Regtest)).unwrap();
        let u = reg.best_chain();
        let genesis = Header::from_hex(GENESIS, 0).unwrap();
        assert_eq!(reg.connect(u, genesis).unwrap(), ConnectOutcome::Connected);
        grow(&mut reg, u, 9, 1);

        let prev = reg.hash_at(u, 8).unwrap().unwrap();
        let z = reg.fork(u, mine(prev, 9, 2)).unwrap();
        let prev = reg.hash_at(u, 5).unwrap().unwrap();
        let l = reg.fork(u, mine(prev, 6, 3)).unwrap();
        grow(&mut reg, l, 3, 3);
        assert_eq!(reg.best_chain(), u);

        let u_tip = reg.hash_at(u, 9).unwrap();
        let u_work = reg.chainwork(u).unwrap();
        let z_below = reg.hash_at(z, 8).unwrap();

        // The next header on l overtakes u, and writing l's branch into u's file fails.
        reg.chain_mut(u).unwrap().store.fail_next_append = true;
        let tip = reg.tip_height(l).unwrap().unwrap();
        let prev = reg.hash_at(l, tip).unwrap().unwrap();
        let err = reg.connect(l, mine(prev, tip + 1, 3)).unwrap_err();
        assert!(matches!(err, ChainError::Storage(StoreError::Io { .. })), "{err}");

        assert_eq!(reg.best_chain(), u);
        assert_eq!(reg.parent(l).unwrap(), Some(u));
        assert_eq!(reg.hash_at(u, 9).unwrap(), u_tip);
        assert_eq!(reg.chainwork(u).unwrap(), u_work);
        assert_eq!(reg.hash_at(z, 8).unwrap(), z_below);
        assert_eq!(
            WorkIndex::scan(&reg.chain(u).unwrap().store).unwrap().total(),
            reg.chain(u).unwrap().own_work()
        );
        // Only the two forks' files remain.
        assert_eq!(fs::read_dir(reg.config().forks_dir()).unwrap().count(), 2);

        // The next header retries the swap.
        grow(&mut reg, l, 1, 3);
        assert_eq!(reg.best_chain(), l);
        assert_eq!(reg.parent(u).unwrap(), Some(l));
        assert_eq!(reg.parent(z).unwrap(), Some(u));
        assert_eq!(reg.hash_at(z, 8).unwrap(), z_below);
    }
}
