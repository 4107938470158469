// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use super::BadBlockCache;
use super::network_context::{BlockFetcher, SyncNetworkContext};
use crate::blocks::{Block, FullTipset, Tipset, TipsetKey};
use crate::chain::{ChainStore, Error as ChainStoreError, HeadUpdate, Weight};
use crate::fil_cns::{self, FilecoinConsensus, FilecoinConsensusError};
use crate::shim::clock::ChainEpoch;
use crate::state_manager::Error as StateManagerError;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, instrument, warn};

const DEFAULT_FETCH_DEPTH: usize = 900;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BAD_BLOCK_CACHE_SIZE: NonZeroUsize = nonzero!(1usize << 15);

/// Syncer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of missing ancestor tipsets fetched for one announcement.
    pub fetch_depth: usize,
    /// Time allowed for a single block request to the network.
    pub fetch_timeout_ms: u64,
    /// Capacity of the bad block cache.
    pub bad_block_cache_size: NonZeroUsize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_depth: DEFAULT_FETCH_DEPTH,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            bad_block_cache_size: DEFAULT_BAD_BLOCK_CACHE_SIZE,
        }
    }
}

impl SyncConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Error)]
pub enum TipsetSyncerError {
    #[error("Fetching block {0} from the network failed: {1}")]
    Fetch(Cid, String),
    #[error("Fetching block {0} from the network timed out")]
    FetchTimeout(Cid),
    #[error("Ancestry of {0} is missing more than {1} tipsets")]
    ForkTooLong(TipsetKey, usize),
    #[error("Consensus error: {0}")]
    ConsensusError(#[from] FilecoinConsensusError),
    #[error("Chain store error: {0}")]
    ChainStore(#[from] ChainStoreError),
    #[error("StateManager error: {0}")]
    StateManager(#[from] StateManagerError),
    #[error("Processing error: {0}")]
    Calculation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<tokio::task::JoinError> for TipsetSyncerError {
    fn from(err: tokio::task::JoinError) -> Self {
        TipsetSyncerError::Calculation(format!("{err}"))
    }
}

/// What became of a tipset announced by the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The tipset was validated and is the new head.
    NewHead(Arc<Tipset>),
    /// The tipset was validated but is not heavier than the current head.
    StaleFork(Arc<Tipset>),
    /// The tipset or one of its ancestors is invalid. Its blocks are in the
    /// bad block cache where applicable.
    Rejected(String),
}

/// Turns block announcements into validated tipsets: fetches the announced
/// blocks and any missing ancestors, validates them, computes their state and
/// weight and offers the result to fork choice.
///
/// Announcements are processed one at a time.
pub struct Syncer<DB, F> {
    consensus: Arc<FilecoinConsensus<DB>>,
    network: SyncNetworkContext<DB, F>,
    bad_blocks: BadBlockCache,
    fetch_depth: usize,
    sync_lock: TokioMutex<()>,
}

impl<DB, F> Syncer<DB, F>
where
    DB: Blockstore + Send + Sync + 'static,
    F: BlockFetcher,
{
    pub fn new(consensus: Arc<FilecoinConsensus<DB>>, fetcher: Arc<F>, config: &SyncConfig) -> Self {
        let db = Arc::clone(&consensus.state_manager().chain_store().db);
        Self {
            network: SyncNetworkContext::new(fetcher, db, config.fetch_timeout()),
            consensus,
            bad_blocks: BadBlockCache::new(config.bad_block_cache_size),
            fetch_depth: config.fetch_depth,
            sync_lock: TokioMutex::new(()),
        }
    }

    pub fn chain_store(&self) -> &Arc<ChainStore<DB>> {
        self.consensus.state_manager().chain_store()
    }

    pub fn bad_blocks(&self) -> &BadBlockCache {
        &self.bad_blocks
    }

    /// Entry point for blocks gossiped at `epoch`. `cids` are the blocks of
    /// one tipset.
    #[instrument(skip_all, fields(epoch = epoch))]
    pub async fn handle_new_blocks_from_network(
        &self,
        cids: Vec<Cid>,
        epoch: ChainEpoch,
    ) -> Result<SyncOutcome, TipsetSyncerError> {
        let _guard = self.sync_lock.lock().await;

        if cids.is_empty() {
            return Ok(SyncOutcome::Rejected("empty announcement".into()));
        }
        if let Some(outcome) = self.known_bad(&cids) {
            return Ok(outcome);
        }

        let mut blocks = Vec::with_capacity(cids.len());
        for cid in &cids {
            blocks.push(self.network.fetch_block(*cid).await?);
        }
        if let Some(block) = blocks.iter().find(|b| b.header().epoch != epoch) {
            return Ok(SyncOutcome::Rejected(format!(
                "block {} is at epoch {}, announced at {epoch}",
                block.cid(),
                block.header().epoch
            )));
        }

        let tipset = match self.validate_and_store(blocks) {
            Ok(tipset) => tipset,
            Err(outcome) => return outcome,
        };
        let ancestors = match self.fetch_ancestors(&tipset).await? {
            Ok(ancestors) => ancestors,
            Err(outcome) => {
                self.mark_bad(tipset.cids(), "descends from a bad block");
                return Ok(outcome);
            }
        };

        let weight = match self.compute(&tipset).await? {
            Ok(weight) => weight,
            Err(outcome) => {
                self.mark_bad(tipset.cids(), "descends from a bad block");
                return Ok(outcome);
            }
        };

        let cs = self.chain_store();
        for ts in ancestors.into_iter().chain(std::iter::once(tipset.clone())) {
            for cid in ts.cids() {
                cs.mark_block_as_validated(cid);
            }
            cs.put_tipset(ts)?;
        }
        match cs.maybe_set_head(tipset.clone(), weight)? {
            HeadUpdate::NewHead => Ok(SyncOutcome::NewHead(tipset)),
            HeadUpdate::NotHeavier => {
                debug!("Tipset {} did not beat the current head", tipset.key());
                Ok(SyncOutcome::StaleFork(tipset))
            }
        }
    }

    fn known_bad(&self, cids: &[Cid]) -> Option<SyncOutcome> {
        cids.iter().find_map(|cid| {
            self.bad_blocks
                .peek(cid)
                .map(|reason| SyncOutcome::Rejected(format!("block {cid} is known bad: {reason}")))
        })
    }

    fn mark_bad(&self, cids: &[Cid], reason: &str) {
        for cid in cids {
            if self.bad_blocks.peek(cid).is_none() {
                self.bad_blocks.push(*cid, reason.to_string());
            }
        }
    }

    /// Records the offending block of a malformed-input error and turns it
    /// into a rejection.
    fn reject(&self, err: FilecoinConsensusError) -> SyncOutcome {
        if let FilecoinConsensusError::MalformedBlock(cid, _)
        | FilecoinConsensusError::InvalidSignature(cid, _) = &err
        {
            self.bad_blocks.push(*cid, err.to_string());
        }
        SyncOutcome::Rejected(err.to_string())
    }

    /// Structural validation, then persistence of the blocks. Fails with the
    /// outcome to report.
    fn validate_and_store(
        &self,
        blocks: Vec<Block>,
    ) -> Result<Arc<Tipset>, Result<SyncOutcome, TipsetSyncerError>> {
        let cs = self.chain_store();
        let tipset: FullTipset = match fil_cns::new_valid_tipset(cs.blockstore(), blocks) {
            Ok(tipset) => tipset,
            Err(e) if e.is_malformed() => return Err(Ok(self.reject(e))),
            Err(e) => return Err(Err(e.into())),
        };
        for block in tipset.blocks() {
            cs.put_block(block)
                .map_err(|e| Err(TipsetSyncerError::from(e)))?;
        }
        Ok(Arc::new(tipset.into_tipset()))
    }

    /// Fetches, validates and stores the ancestors of `tipset` down to the
    /// first tipset already accepted into the tip index. Blocks present in the
    /// store are not fetched again. Returns the ancestors found, newest first,
    /// or the outcome to report if the ancestry is unacceptable.
    async fn fetch_ancestors(
        &self,
        tipset: &Arc<Tipset>,
    ) -> Result<Result<Vec<Arc<Tipset>>, SyncOutcome>, TipsetSyncerError> {
        let cs = self.chain_store();
        let mut ancestors = vec![];
        let mut cursor = Arc::clone(tipset);
        loop {
            if cursor.parents().is_empty() {
                let genesis = cs.genesis_tipset()?;
                if cursor.key() != genesis.key() {
                    return Ok(Err(SyncOutcome::Rejected(format!(
                        "chain is rooted at {} instead of the local genesis {}",
                        cursor.key(),
                        genesis.key()
                    ))));
                }
                return Ok(Ok(ancestors));
            }
            if cs.tip_index().contains(cursor.parents()) {
                debug!(
                    "Ancestry of {} joins the local chain below epoch {}",
                    tipset.key(),
                    cursor.epoch()
                );
                return Ok(Ok(ancestors));
            }
            if ancestors.len() == self.fetch_depth {
                return Err(TipsetSyncerError::ForkTooLong(
                    tipset.key().clone(),
                    self.fetch_depth,
                ));
            }

            let parents = cursor.parents().cids().to_vec();
            if let Some(outcome) = self.known_bad(&parents) {
                return Ok(Err(outcome));
            }
            let mut blocks = Vec::with_capacity(parents.len());
            for cid in parents {
                blocks.push(self.network.fetch_block(cid).await?);
            }
            cursor = match self.validate_and_store(blocks) {
                Ok(parent) => parent,
                Err(Ok(outcome)) => return Ok(Err(outcome)),
                Err(Err(e)) => return Err(e),
            };
            ancestors.push(cursor.clone());
        }
    }

    /// Computes state and weight on the blocking pool. A block whose declared
    /// results do not match execution is recorded as bad.
    async fn compute(
        &self,
        tipset: &Arc<Tipset>,
    ) -> Result<Result<Weight, SyncOutcome>, TipsetSyncerError> {
        let consensus = Arc::clone(&self.consensus);
        let ts = Arc::clone(tipset);
        let res = tokio::task::spawn_blocking(move || {
            consensus.state_manager().tipset_state(&ts)?;
            consensus.weight(&ts)
        })
        .await?;
        match res {
            Ok(weight) => {
                info!(
                    "Validated tipset {} at epoch {} (weight {weight})",
                    tipset.key(),
                    tipset.epoch()
                );
                Ok(Ok(weight))
            }
            Err(FilecoinConsensusError::StateManager(e)) => match e.mismatched_block() {
                Some(block) => {
                    warn!("Rejecting tipset {}: {e}", tipset.key());
                    self.bad_blocks.push(block, e.to_string());
                    Ok(Err(SyncOutcome::Rejected(e.to_string())))
                }
                None => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }
}

