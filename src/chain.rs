//! A single chain in the fork tree and the cumulative-work index over its own headers.
use std::fmt;

use bitcoin::BlockHash;

use crate::{
    error::StoreError,
    header::Header,
    pow::Work,
    store::HeaderFile,
};

/// Headers summed per work-index bucket.
const CHUNK: u32 = 2_016;

/// Stable handle of a chain inside a [`Registry`](crate::registry::Registry).
///
/// Ids survive reorganizations: a swap changes which file and forkpoint an id refers to,
/// never the id itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainId(pub(crate) usize);

impl ChainId {
    /// Arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A contiguous run of headers from `forkpoint` up, resting on `parent` below that.
///
/// The root chain (no parent) starts at height 0 and owns the main headers file.
#[derive(Debug)]
pub struct Chain {
    pub(crate) id: ChainId,
    pub(crate) parent: Option<ChainId>,
    pub(crate) forkpoint: u32,
    pub(crate) forkpoint_hash: BlockHash,
    pub(crate) prev_hash: BlockHash,
    pub(crate) store: HeaderFile,
    pub(crate) work: WorkIndex,
}

impl Chain {
    pub(crate) fn new(
        id: ChainId,
        parent: Option<ChainId>,
        forkpoint_hash: BlockHash,
        prev_hash: BlockHash,
        store: HeaderFile,
    ) -> Result<Self, StoreError> {
        let work = WorkIndex::scan(&store)?;
        Ok(Self {
            id,
            parent,
            forkpoint: store.forkpoint(),
            forkpoint_hash,
            prev_hash,
            store,
            work,
        })
    }

    /// This chain's id.
    pub fn id(&self) -> ChainId {
        self.id
    }

    /// Chain this one branches off, `None` for the root.
    pub fn parent(&self) -> Option<ChainId> {
        self.parent
    }

    /// Height of the first header this chain stores itself.
    pub fn forkpoint(&self) -> u32 {
        self.forkpoint
    }

    /// Hash of the header at `forkpoint`.
    pub fn forkpoint_hash(&self) -> BlockHash {
        self.forkpoint_hash
    }

    /// Hash of the parent's header at `forkpoint - 1`.
    pub fn prev_hash(&self) -> BlockHash {
        self.prev_hash
    }

    /// Highest height on this chain, `None` only for an empty root.
    pub fn tip_height(&self) -> Option<u32> {
        self.store.tip_height()
    }

    /// Height the next connected header must carry.
    pub fn next_height(&self) -> u32 {
        self.store.next_height()
    }

    /// Number of headers stored by this chain itself.
    pub fn branch_size(&self) -> u32 {
        self.store.len()
    }

    /// Backing file.
    pub fn store(&self) -> &HeaderFile {
        &self.store
    }

    /// Work of this chain's own headers.
    pub fn own_work(&self) -> Work {
        self.work.total()
    }

    pub(crate) fn append(&mut self, header: &Header) -> Result<(), StoreError> {
        self.store.append(header)?;
        self.work.push(header.height, Work::from_bits(header.bits));
        Ok(())
    }

    /// Own work of heights `forkpoint..=height`.
    pub(crate) fn own_work_through(&self, height: u32) -> Result<Work, StoreError> {
        self.work.through(&self.store, height)
    }
}

/// Per-chunk sums of header work for the heights a single file stores.
///
/// Buckets are aligned to absolute heights (`height / 2016`) so an index can be reused
/// below a truncation point when a file is rewritten from some height on.
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkIndex {
    first_chunk: u32,
    chunks: Vec<Work>,
    total: Work,
}

impl WorkIndex {
    pub(crate) fn scan(store: &HeaderFile) -> Result<Self, StoreError> {
        let mut index = WorkIndex {
            first_chunk: store.forkpoint() / CHUNK,
            ..Default::default()
        };
        for header in store.iter() {
            let header = header?;
            index.push(header.height, Work::from_bits(header.bits));
        }
        Ok(index)
    }

    pub(crate) fn total(&self) -> Work {
        self.total
    }

    pub(crate) fn push(&mut self, height: u32, work: Work) {
        let slot = (height / CHUNK - self.first_chunk) as usize;
        if self.chunks.len() <= slot {
            self.chunks.resize(slot + 1, Work::ZERO);
        }
        self.chunks[slot] += work;
        self.total += work;
    }

    /// Keep whole buckets below `height`'s bucket and rescan `store` from that bucket on.
    ///
    /// `store` must agree with the indexed headers below that bucket.
    pub(crate) fn rebuild_from(&mut self, store: &HeaderFile, height: u32) -> Result<(), StoreError> {
        self.first_chunk = store.forkpoint() / CHUNK;
        let keep = (height / CHUNK).saturating_sub(self.first_chunk) as usize;
        self.chunks.truncate(keep);
        self.total = self.chunks.iter().copied().sum();

        let start = ((self.first_chunk as usize + keep) as u32 * CHUNK).max(store.forkpoint());
        let end = store.next_height();
        for h in start..end {
            if let Some(header) = store.read(h)? {
                self.push(h, Work::from_bits(header.bits));
            }
        }
        Ok(())
    }

    /// Sum over `forkpoint..=height`, clamped to what the store holds.
    pub(crate) fn through(&self, store: &HeaderFile, height: u32) -> Result<Work, StoreError> {
        let Some(tip) = store.tip_height() else {
            return Ok(Work::ZERO);
        };
        if height < store.forkpoint() {
            return Ok(Work::ZERO);
        }
        if height >= tip {
            return Ok(self.total);
        }
        let bucket = (height / CHUNK - self.first_chunk) as usize;
        let mut sum: Work = self.chunks[..bucket].iter().copied().sum();
        let start = (height / CHUNK * CHUNK).max(store.forkpoint());
        for h in start..=height {
            if let Some(header) = store.read(h)? {
                sum += Work::from_bits(header.bits);
            }
        }
        Ok(sum)
    }
}
