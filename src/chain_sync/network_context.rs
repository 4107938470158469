// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::time::Duration;

use super::TipsetSyncerError;
use crate::blocks::Block;
use async_trait::async_trait;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use tracing::{debug, trace};

/// Network collaborator of the syncer: retrieves full blocks from peers.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    async fn fetch_block(&self, cid: Cid) -> anyhow::Result<Block>;
}

/// Context used in chain sync to handle network requests.
/// Blocks already in the local [`Blockstore`] are served from there; anything
/// else goes to the [`BlockFetcher`], bounded by a timeout.
pub(in crate::chain_sync) struct SyncNetworkContext<DB, F> {
    fetcher: Arc<F>,
    db: Arc<DB>,
    timeout: Duration,
}

impl<DB, F> SyncNetworkContext<DB, F>
where
    DB: Blockstore,
    F: BlockFetcher,
{
    pub fn new(fetcher: Arc<F>, db: Arc<DB>, timeout: Duration) -> Self {
        Self {
            fetcher,
            db,
            timeout,
        }
    }

    pub async fn fetch_block(&self, cid: Cid) -> Result<Block, TipsetSyncerError> {
        if let Some(block) = Block::load(self.db.as_ref(), &cid)? {
            trace!("Block {cid} found locally");
            return Ok(block);
        }
        debug!("Fetching block {cid} from the network");
        let block = tokio::time::timeout(self.timeout, self.fetcher.fetch_block(cid))
            .await
            .map_err(|_| TipsetSyncerError::FetchTimeout(cid))?
            .map_err(|e| TipsetSyncerError::Fetch(cid, e.to_string()))?;
        if *block.cid() != cid {
            return Err(TipsetSyncerError::Fetch(
                cid,
                format!("peer returned block {}", block.cid()),
            ));
        }
        Ok(block)
    }
}
