//! Async driver that pulls raw headers from a server and feeds them to a [`Registry`].
//!
//! Registry work runs on the blocking pool; the async side only talks to the
//! [`HeaderSource`]. When the server's chain stops linking to ours the driver walks the
//! server's headers backwards to the last one we know, forks there and follows the
//! server's branch from then on.
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::task;
use tracing::{debug, info};

use crate::{
    chain::ChainId,
    error::InvalidReason,
    header::{Header, HEADER_SIZE},
    registry::{ConnectOutcome, Registry, SharedRegistry},
};

/// Headers requested per round trip.
const HEADERS_BATCH: u32 = 2_016;

/// Server-side view of a header chain.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Current best height.
    async fn tip_height(&self) -> anyhow::Result<u32>;

    /// Up to `count` concatenated 80-byte headers starting at `start`.
    async fn raw_headers(&self, start: u32, count: u32) -> anyhow::Result<Vec<u8>>;
}

/// Keeps one followed chain in step with a [`HeaderSource`].
pub struct Synchronizer<H> {
    registry: SharedRegistry,
    source: H,
    batch: u32,
    chain: Option<ChainId>,
}

impl<H> Synchronizer<H>
where
    H: HeaderSource + 'static,
{
    /// Follow the best chain of `registry` using `source`.
    pub fn new(registry: SharedRegistry, source: H) -> Self {
        Self {
            registry,
            source,
            batch: HEADERS_BATCH,
            chain: None,
        }
    }

    /// Request at most `n` headers per round trip.
    pub fn with_batch_size(mut self, n: u32) -> Self {
        self.batch = n.max(1);
        self
    }

    /// Chain the server was last seen on.
    pub fn following(&self) -> Option<ChainId> {
        self.chain
    }

    /// Download and connect headers until the followed chain reaches the server tip.
    ///
    /// # Errors
    /// Fails if the source fails, returns malformed data or a header that does not
    /// validate (the caller should drop that server), or if storage fails.
    pub async fn run_to_tip(&mut self) -> anyhow::Result<ChainId> {
        let remote_tip = self.source.tip_height().await.context("tip_height")?;
        let mut chain = match self.chain {
            Some(id) if self.registry.read().chain(id).is_ok() => id,
            _ => self.registry.read().best_chain(),
        };

        loop {
            let next = self.registry.read().chain(chain)?.next_height();
            if next > remote_tip {
                break;
            }
            let count = self.batch.min(remote_tip - next + 1);
            let raw = self
                .source
                .raw_headers(next, count)
                .await
                .with_context(|| format!("raw_headers(start={next}, count={count})"))?;
            if raw.is_empty() || raw.len() % HEADER_SIZE != 0 {
                bail!(
                    "server returned {} bytes for {count} headers at {next}",
                    raw.len()
                );
            }

            let (connected, stop) = self
                .with_registry(move |reg| connect_batch(reg, chain, next, &raw))
                .await
                .with_context(|| format!("connect headers @{next}"))?;
            debug!(chain = %chain, start = next, connected, "applied header batch");

            let Some((header, outcome)) = stop else {
                continue;
            };
            chain = match outcome {
                ConnectOutcome::Connected => chain,
                ConnectOutcome::Orphan => self.rewind(header.height).await?,
                ConnectOutcome::Invalid(InvalidReason::Linkage { .. }) => {
                    let other = self.registry.read().find_connectable(&header)?;
                    match other {
                        Some(other) => other,
                        None => self.rewind(header.height).await?,
                    }
                }
                ConnectOutcome::Invalid(reason) => {
                    bail!("server sent invalid header at height {}: {reason}", header.height)
                }
            };
        }

        info!(chain = %chain, tip = remote_tip, "headers synchronized");
        self.chain = Some(chain);
        Ok(chain)
    }

    /// Find the highest server header below `height` that a local chain holds, fork
    /// the server's next header off it and return the chain to follow.
    async fn rewind(&self, height: u32) -> anyhow::Result<ChainId> {
        let depth = self.registry.read().config().max_fork_depth();
        let floor = height.saturating_sub(depth);

        let mut cursor = height;
        while cursor > floor {
            cursor -= 1;
            let known = self.fetch(cursor).await?;
            let holders = self
                .registry
                .read()
                .chains_containing(cursor, known.block_hash())?;
            let Some(&holder) = holders.first() else {
                continue;
            };

            let branch = self.fetch(cursor + 1).await?;
            info!(height = cursor + 1, parent = %holder, "server is on another branch, forking");
            return self
                .with_registry(move |reg| {
                    if let Some(id) = reg.find_connectable(&branch)? {
                        return match reg.connect(id, branch)? {
                            ConnectOutcome::Connected => Ok(id),
                            other => bail!("header at {} rejected: {other:?}", branch.height),
                        };
                    }
                    Ok(reg.fork(holder, branch)?)
                })
                .await
                .with_context(|| format!("fork @{}", cursor + 1));
        }
        bail!("no common header with server within {depth} blocks below {height}")
    }

    async fn fetch(&self, height: u32) -> anyhow::Result<Header> {
        let raw = self
            .source
            .raw_headers(height, 1)
            .await
            .with_context(|| format!("raw_headers(start={height}, count=1)"))?;
        let bytes = raw.get(..HEADER_SIZE).unwrap_or(&raw);
        Ok(Header::decode(bytes, height)?)
    }

    async fn with_registry<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut Registry) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        task::spawn_blocking(move || f(&mut registry.write()))
            .await
            .context("registry task panicked")?
    }
}

/// Connect `raw` headers from `start`; stops at the first one that is not `Connected`.
fn connect_batch(
    reg: &mut Registry,
    chain: ChainId,
    start: u32,
    raw: &[u8],
) -> anyhow::Result<(u32, Option<(Header, ConnectOutcome)>)> {
    let mut connected = 0;
    for (i, record) in raw.chunks_exact(HEADER_SIZE).enumerate() {
        let header = Header::decode(record, start + i as u32)?;
        match reg.connect(chain, header)? {
            ConnectOutcome::Connected => connected += 1,
            other => return Ok((connected, Some((header, other)))),
        }
    }
    Ok((connected, None))
}
