// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Expected Consensus: block validation, chain weight and fork choice.

mod validation;
mod weight;

use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

use crate::blocks::{Tipset, TipsetKey};
use crate::chain::{Error as ChainStoreError, Weight};
use crate::state_manager::{Error as StateManagerError, StateManager};
use ahash::HashMap;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use num_traits::Zero as _;
use parking_lot::Mutex;
use thiserror::Error;

pub use self::validation::{new_valid_tipset, validate_block_structure};
pub use self::weight::{EcParams, weight_delta};

#[derive(Debug, Error)]
pub enum FilecoinConsensusError {
    #[error("Block {0} is malformed: {1}")]
    MalformedBlock(Cid, String),
    #[error("Block {0} carries a message with an invalid signature: {1}")]
    InvalidSignature(Cid, String),
    #[error("Invalid tipset: {0}")]
    BadTipset(String),
    #[error("Chain store error: {0}")]
    ChainStore(#[from] ChainStoreError),
    #[error("StateManager error: {0}")]
    StateManager(#[from] StateManagerError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FilecoinConsensusError {
    /// Whether the input itself is bad, as opposed to the node failing to
    /// process it. Bad input is never worth retrying.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedBlock(..) | Self::InvalidSignature(..) | Self::BadTipset(_)
        )
    }
}

/// Fork choice between two heads. `Greater` means `a` should replace `b`.
///
/// Heavier wins. On an exact weight tie the tipset with the lexicographically
/// smaller minimum ticket wins. A full tie is `Equal` and keeps the current head.
pub fn compare_heads(a: &Tipset, a_weight: &Weight, b: &Tipset, b_weight: &Weight) -> Ordering {
    a_weight
        .cmp(b_weight)
        .then_with(|| b.min_ticket().cmp(a.min_ticket()))
}

/// Expected Consensus over a [`StateManager`]. Computes and memoizes tipset
/// weights; power is read from the storage market actor in the state of each
/// tipset's parent.
pub struct FilecoinConsensus<DB> {
    state_manager: Arc<StateManager<DB>>,
    params: EcParams,
    weights: Mutex<HashMap<TipsetKey, Weight>>,
}

impl<DB> Debug for FilecoinConsensus<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilecoinConsensus")
            .field("params", &self.params)
            .field("weights", &self.weights.lock().len())
            .finish()
    }
}

impl<DB> FilecoinConsensus<DB>
where
    DB: Blockstore,
{
    pub fn new(state_manager: Arc<StateManager<DB>>, params: EcParams) -> Self {
        Self {
            state_manager,
            params,
            weights: Mutex::new(HashMap::default()),
        }
    }

    pub fn state_manager(&self) -> &Arc<StateManager<DB>> {
        &self.state_manager
    }

    pub fn params(&self) -> &EcParams {
        &self.params
    }

    /// Cumulative weight of `tipset`. Genesis weighs zero.
    ///
    /// Like state computation, ancestors are walked iteratively back to the
    /// nearest memoized weight before summing forward.
    #[tracing::instrument(skip_all, fields(epoch = tipset.epoch()))]
    pub fn weight(&self, tipset: &Arc<Tipset>) -> Result<Weight, FilecoinConsensusError> {
        if let Some(w) = self.weights.lock().get(tipset.key()) {
            return Ok(w.clone());
        }

        let cs = self.state_manager.chain_store();
        let mut pending = Vec::new();
        let mut current = Arc::clone(tipset);
        let mut weight = loop {
            if let Some(w) = self.weights.lock().get(current.key()) {
                break w.clone();
            }
            if current.is_genesis() {
                break Weight::zero();
            }
            let Some(parent) = cs.parents_of(&current)? else {
                return Err(FilecoinConsensusError::BadTipset(format!(
                    "tipset {} at epoch {} has no parents",
                    current.key(),
                    current.epoch()
                )));
            };
            pending.push(current);
            current = parent;
        };
        self.weights
            .lock()
            .insert(current.key().clone(), weight.clone());

        while let Some(ts) = pending.pop() {
            let parent_state = self.state_manager.state_tree(&current)?;
            weight += weight_delta(&parent_state, &ts, &self.params)?;
            self.weights.lock().insert(ts.key().clone(), weight.clone());
            current = ts;
        }
        Ok(weight)
    }
}
