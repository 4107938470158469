// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp::Ordering;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use super::{Error, TipIndex};
use crate::blocks::{Block, BlockHeader, Tipset, TipsetKey};
use crate::chain::Weight;
use crate::db::setting_keys::{GENESIS_KEY, HEAD_KEY};
use crate::db::{SettingsStore, SettingsStoreExt as _};
use crate::fil_cns::compare_heads;
use crate::shim::clock::ChainEpoch;
use ahash::HashSet;
use anyhow::Context as _;
use cid::Cid;
use futures::Stream;
use fvm_ipld_blockstore::Blockstore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Sender as Publisher, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound of the head change channel. Subscribers further behind lose
/// the oldest events.
pub const DEFAULT_HEAD_EVENT_CAPACITY: usize = 200;

/// `Enum` for `pubsub` channel that defines message type variant and data
/// contained in message type.
#[derive(Clone, Debug)]
pub enum HeadChange {
    Apply(Arc<Tipset>),
}

/// Outcome of [`ChainStore::maybe_set_head`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadUpdate {
    NewHead,
    /// The candidate lost fork choice against the current head. Not an error.
    NotHeavier,
}

/// The heaviest tipset known and its weight.
#[derive(Clone, Debug, PartialEq)]
pub struct Head {
    pub tipset: Arc<Tipset>,
    pub weight: Weight,
}

#[derive(Default)]
struct HeadState {
    head: Option<Head>,
    /// Latched by the first head ever set.
    genesis: Option<Cid>,
}

/// Head as persisted in the settings store.
#[derive(Serialize, Deserialize)]
struct PersistedHead {
    key: Vec<String>,
    weight: String,
}

/// Stores chain data such as the heaviest tipset and the index of every
/// accepted tipset. This structure is thread-safe: the head pointer, the tip
/// index and the validated block set each sit behind their own lock so that a
/// consistent `ChainStore` can be shared across tasks.
pub struct ChainStore<DB> {
    /// Publisher for head change events
    publisher: Publisher<HeadChange>,

    /// key-value `datastore`.
    pub db: Arc<DB>,

    /// Settings store
    settings: Arc<dyn SettingsStore + Sync + Send>,

    /// Held across the whole fork-choice compare-and-swap.
    head: Mutex<HeadState>,

    tip_index: TipIndex,

    /// validated blocks
    validated_blocks: Mutex<HashSet<Cid>>,
}

impl<DB> ChainStore<DB>
where
    DB: Blockstore,
{
    pub fn new(
        db: Arc<DB>,
        settings: Arc<dyn SettingsStore + Sync + Send>,
        head_event_capacity: usize,
    ) -> Self {
        let (publisher, _) = broadcast::channel(head_event_capacity.max(1));
        Self {
            publisher,
            db,
            settings,
            head: Mutex::new(HeadState::default()),
            tip_index: TipIndex::new(),
            validated_blocks: Mutex::new(HashSet::default()),
        }
    }

    /// Restores the genesis latch and the head persisted by a previous run.
    pub fn load(
        db: Arc<DB>,
        settings: Arc<dyn SettingsStore + Sync + Send>,
        head_event_capacity: usize,
    ) -> Result<Self, Error> {
        let cs = Self::new(db, settings, head_event_capacity);
        let genesis = cs
            .settings
            .read_obj::<String>(GENESIS_KEY)?
            .map(|s| Cid::try_from(s.as_str()))
            .transpose()
            .context("invalid genesis CID in settings")?;
        let head = match cs.settings.read_obj::<PersistedHead>(HEAD_KEY)? {
            Some(persisted) => {
                let key = TipsetKey::from_strings(&persisted.key)?;
                let tipset = Arc::new(Tipset::load_required(cs.db.as_ref(), &key)?);
                let weight = persisted
                    .weight
                    .parse::<Weight>()
                    .map_err(|e| anyhow::anyhow!("invalid head weight {}: {e}", persisted.weight))?;
                cs.tip_index.put(tipset.clone());
                info!("Loaded head {} (EPOCH = {})", tipset.key(), tipset.epoch());
                Some(Head { tipset, weight })
            }
            None => None,
        };
        *cs.head.lock() = HeadState { head, genesis };
        Ok(cs)
    }

    /// Returns key-value store instance.
    pub fn blockstore(&self) -> &DB {
        &self.db
    }

    /// Returns a reference to the publisher of head changes.
    pub fn publisher(&self) -> &Publisher<HeadChange> {
        &self.publisher
    }

    /// Subscribes to head changes. Events published before this call are not
    /// delivered.
    pub fn head_events(&self) -> HeadSubscription {
        HeadSubscription {
            receiver: self.publisher.subscribe(),
            skipped: 0,
        }
    }

    /// Persists a full block: its messages, their list and its header.
    pub fn put_block(&self, block: &Block) -> Result<(), Error> {
        block.persist(self.blockstore())?;
        Ok(())
    }

    pub fn get_block(&self, cid: &Cid) -> Result<Option<Block>, Error> {
        Ok(Block::load(self.blockstore(), cid)?)
    }

    pub fn has_block(&self, cid: &Cid) -> Result<bool, Error> {
        Ok(self.db.has(cid)?)
    }

    pub fn get_block_header(&self, cid: &Cid) -> Result<Option<BlockHeader>, Error> {
        Ok(BlockHeader::load(self.blockstore(), cid)?)
    }

    /// Writes the tipset headers to the store and records the tipset in the
    /// tip index.
    pub fn put_tipset(&self, ts: Arc<Tipset>) -> Result<(), Error> {
        for header in ts.blocks() {
            header.persist(self.blockstore())?;
        }
        if self.tip_index.put(ts.clone()) {
            debug!("Indexed tipset {} (EPOCH = {})", ts.key(), ts.epoch());
        }
        Ok(())
    }

    /// Returns Tipset from key-value store from provided CIDs
    #[tracing::instrument(skip_all)]
    pub fn tipset_from_keys(&self, tsk: &TipsetKey) -> Result<Arc<Tipset>, Error> {
        if tsk.is_empty() {
            return Err(Error::NotFound("empty tipset key".into()));
        }
        if let Some(ts) = self.tip_index.get(tsk) {
            return Ok(ts);
        }
        Tipset::load(self.blockstore(), tsk)?
            .map(Arc::new)
            .ok_or_else(|| Error::NotFound(format!("tipset {tsk}")))
    }

    /// Loads the parent tipset of `ts`. `None` for a genesis tipset.
    pub fn parents_of(&self, ts: &Tipset) -> Result<Option<Arc<Tipset>>, Error> {
        if ts.parents().is_empty() {
            return Ok(None);
        }
        self.tipset_from_keys(ts.parents()).map(Some)
    }

    /// Indexed tipsets containing the block `cid`.
    pub fn tipset_by_block(&self, cid: &Cid) -> Vec<Arc<Tipset>> {
        self.tip_index.tipsets_by_block(cid)
    }

    pub fn tipsets_by_height(&self, epoch: ChainEpoch) -> Vec<Arc<Tipset>> {
        self.tip_index.tipsets_by_height(epoch)
    }

    /// Indexed tipsets at `epoch` built on `parents`.
    pub fn siblings(&self, parents: &TipsetKey, epoch: ChainEpoch) -> Vec<Arc<Tipset>> {
        self.tip_index.siblings(parents, epoch)
    }

    pub fn tip_index(&self) -> &TipIndex {
        &self.tip_index
    }

    /// Returns the current head, `None` until the first [`ChainStore::set_head`].
    pub fn head(&self) -> Option<Head> {
        self.head.lock().head.clone()
    }

    /// Returns the currently tracked heaviest tipset.
    pub fn heaviest_tipset(&self) -> Result<Arc<Tipset>, Error> {
        self.head()
            .map(|head| head.tipset)
            .ok_or(Error::NoHead)
    }

    /// Returns the latched genesis block CID.
    pub fn genesis(&self) -> Option<Cid> {
        self.head.lock().genesis
    }

    pub fn genesis_tipset(&self) -> Result<Arc<Tipset>, Error> {
        let genesis = self.genesis().ok_or(Error::NoHead)?;
        self.tipset_from_keys(&TipsetKey::new([genesis]))
    }

    /// Replaces the head unconditionally. The first head set latches genesis and
    /// must be a single block.
    pub fn set_head(&self, ts: Arc<Tipset>, weight: Weight) -> Result<(), Error> {
        let mut state = self.head.lock();
        self.replace_head(&mut state, ts, weight)
    }

    /// Replaces the head if `ts` wins fork choice against it. The comparison
    /// and the replacement happen under the same lock.
    pub fn maybe_set_head(&self, ts: Arc<Tipset>, weight: Weight) -> Result<HeadUpdate, Error> {
        let mut state = self.head.lock();
        if let Some(current) = &state.head
            && compare_heads(&ts, &weight, &current.tipset, &current.weight) != Ordering::Greater
        {
            debug!(
                "Tipset {} (weight {weight}) is not heavier than head {} (weight {})",
                ts.key(),
                current.tipset.key(),
                current.weight
            );
            return Ok(HeadUpdate::NotHeavier);
        }
        self.replace_head(&mut state, ts, weight)?;
        Ok(HeadUpdate::NewHead)
    }

    fn replace_head(&self, state: &mut HeadState, ts: Arc<Tipset>, weight: Weight) -> Result<(), Error> {
        let new_genesis = match state.genesis {
            Some(_) => None,
            None if ts.len() == 1 => Some(*ts.min_ticket_block().cid()),
            None => return Err(Error::InvalidGenesis(ts.len())),
        };
        self.put_tipset(ts.clone())?;
        self.settings.write_obj(
            HEAD_KEY,
            &PersistedHead {
                key: ts.key().to_strings(),
                weight: weight.to_string(),
            },
        )?;
        if let Some(genesis) = new_genesis {
            self.settings.write_obj(GENESIS_KEY, &genesis.to_string())?;
            info!("Latched genesis {genesis}");
            state.genesis = Some(genesis);
        }
        info!("New heaviest tipset! {} (EPOCH = {})", ts.key(), ts.epoch());
        state.head = Some(Head {
            tipset: ts.clone(),
            weight,
        });
        if self.publisher.send(HeadChange::Apply(ts)).is_err() {
            debug!("did not publish head change, no active receivers");
        }
        Ok(())
    }

    /// Checks metadata file if block has already been validated.
    pub fn is_block_validated(&self, cid: &Cid) -> bool {
        let validated = self.validated_blocks.lock().contains(cid);
        if validated {
            debug!("Block {cid} was previously validated");
        }
        validated
    }

    /// Marks block as validated in the metadata file.
    pub fn mark_block_as_validated(&self, cid: &Cid) {
        self.validated_blocks.lock().insert(*cid);
    }

    /// Visits `from` and its ancestors down to genesis until `f` breaks.
    /// Returns the break value, or `None` if the walk reached genesis.
    pub fn walk_chain<B>(
        &self,
        from: Arc<Tipset>,
        mut f: impl FnMut(&Arc<Tipset>) -> ControlFlow<B>,
    ) -> Result<Option<B>, Error> {
        let mut current = from;
        loop {
            if let ControlFlow::Break(b) = f(&current) {
                return Ok(Some(b));
            }
            match self.parents_of(&current)? {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    /// Lazily yields the head and its ancestors down to genesis. A failure is
    /// the final element. The walk stops between tipsets once `cancel` fires.
    pub fn block_history(
        &self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Arc<Tipset>, Error>> + use<DB> {
        let start = match self.head() {
            Some(head) => Walk::Next(head.tipset),
            None => Walk::Failed(Error::NoHead),
        };
        let db = Arc::clone(&self.db);
        futures::stream::unfold(start, move |walk| {
            let db = Arc::clone(&db);
            let cancel = cancel.clone();
            async move {
                match walk {
                    Walk::Done => None,
                    Walk::Failed(e) => Some((Err(e), Walk::Done)),
                    Walk::Next(_) if cancel.is_cancelled() => {
                        Some((Err(Error::Cancelled), Walk::Done))
                    }
                    Walk::Next(ts) => {
                        let next = if ts.parents().is_empty() {
                            Walk::Done
                        } else {
                            match Tipset::load(db.as_ref(), ts.parents()) {
                                Ok(Some(parent)) => Walk::Next(Arc::new(parent)),
                                Ok(None) => Walk::Failed(Error::NotFound(format!(
                                    "parents {} of tipset {}",
                                    ts.parents(),
                                    ts.key()
                                ))),
                                Err(e) => Walk::Failed(e.into()),
                            }
                        };
                        Some((Ok(ts), next))
                    }
                }
            }
        })
    }
}

enum Walk {
    Next(Arc<Tipset>),
    Failed(Error),
    Done,
}

/// Receiving end of [`ChainStore::head_events`].
pub struct HeadSubscription {
    receiver: broadcast::Receiver<HeadChange>,
    skipped: u64,
}

impl HeadSubscription {
    /// Waits up to `timeout` for the next head change. `None` on timeout or
    /// once the store is gone.
    pub async fn next(&mut self, timeout: Duration) -> Option<HeadChange> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Waits for the next head change. Events lost because this subscriber
    /// lagged are skipped and counted.
    pub async fn recv(&mut self) -> Option<HeadChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(n)) => {
                    warn!("Head subscriber lagged, skipped {n} head changes");
                    self.skipped += n;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Number of head changes this subscriber missed.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Ends the subscription.
    pub fn unsubscribe(self) {}
}
