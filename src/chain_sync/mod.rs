// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod bad_block_cache;
pub mod network_context;
mod tipset_syncer;

pub use self::{
    bad_block_cache::BadBlockCache,
    network_context::BlockFetcher,
    tipset_syncer::{SyncConfig, SyncOutcome, Syncer, TipsetSyncerError},
};

#[cfg(test)]
mod tests;
