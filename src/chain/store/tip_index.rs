// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use crate::blocks::{Tipset, TipsetKey};
use crate::shim::clock::ChainEpoch;
use ahash::HashMap;
use cid::Cid;
use parking_lot::RwLock;

/// Sibling key: tipsets at the same epoch built on the same parent set.
/// The parent set is keyed by its string form.
type SiblingKey = (ChainEpoch, String);

#[derive(Default)]
struct Indices {
    tipsets: HashMap<TipsetKey, Arc<Tipset>>,
    by_parents: HashMap<SiblingKey, Vec<TipsetKey>>,
    by_height: HashMap<ChainEpoch, Vec<TipsetKey>>,
    by_block: HashMap<Cid, Vec<TipsetKey>>,
}

impl Indices {
    fn resolve(&self, keys: Option<&Vec<TipsetKey>>) -> Vec<Arc<Tipset>> {
        keys.into_iter()
            .flatten()
            .filter_map(|key| self.tipsets.get(key).cloned())
            .collect()
    }
}

/// `TipIndex` tracks every tipset the node has accepted, by key, by epoch, by
/// member block and by `(epoch, parents)`.
#[derive(Default)]
pub struct TipIndex {
    indices: RwLock<Indices>,
}

impl TipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tipset to the index. Returns `false` if it was already known.
    pub fn put(&self, tipset: Arc<Tipset>) -> bool {
        let mut idx = self.indices.write();
        let key = tipset.key().clone();
        if idx.tipsets.contains_key(&key) {
            return false;
        }
        idx.by_parents
            .entry((tipset.epoch(), tipset.parents().to_string()))
            .or_default()
            .push(key.clone());
        idx.by_height
            .entry(tipset.epoch())
            .or_default()
            .push(key.clone());
        for cid in tipset.cids() {
            idx.by_block.entry(*cid).or_default().push(key.clone());
        }
        idx.tipsets.insert(key, tipset);
        true
    }

    pub fn get(&self, key: &TipsetKey) -> Option<Arc<Tipset>> {
        self.indices.read().tipsets.get(key).cloned()
    }

    pub fn contains(&self, key: &TipsetKey) -> bool {
        self.indices.read().tipsets.contains_key(key)
    }

    /// Every indexed tipset at `epoch`, in insertion order.
    pub fn tipsets_by_height(&self, epoch: ChainEpoch) -> Vec<Arc<Tipset>> {
        let idx = self.indices.read();
        idx.resolve(idx.by_height.get(&epoch))
    }

    /// Every indexed tipset containing the block `cid`.
    pub fn tipsets_by_block(&self, cid: &Cid) -> Vec<Arc<Tipset>> {
        let idx = self.indices.read();
        idx.resolve(idx.by_block.get(cid))
    }

    /// Tipsets at `epoch` whose parent set is `parents`.
    pub fn siblings(&self, parents: &TipsetKey, epoch: ChainEpoch) -> Vec<Arc<Tipset>> {
        let idx = self.indices.read();
        idx.resolve(idx.by_parents.get(&(epoch, parents.to_string())))
    }

    pub fn len(&self) -> usize {
        self.indices.read().tipsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
