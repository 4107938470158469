// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod errors;
pub use self::errors::*;

use std::collections::hash_map::Entry;
use std::sync::Arc;

use crate::blocks::{Block, Tipset, TipsetKey, block_messages};
use crate::chain::{self, ChainStore, HeadChange};
use crate::interpreter::{Receipt, VM};
use crate::message::SignedMessage;
use crate::shim::{address::Address, clock::ChainEpoch};
use crate::state_tree::{ActorState, StateTree};
use ahash::HashMap;
use cid::Cid;
use futures::StreamExt as _;
use fvm_ipld_blockstore::Blockstore;
use parking_lot::Mutex as SyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Result of computing the state of a tipset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipsetOutput {
    pub state_root: Cid,
    /// Root of the AMT of receipts of the deduplicated message list.
    pub receipt_root: Cid,
    /// `(block, message)` pairs whose message already appeared in an earlier
    /// block of the same tipset and was not applied again.
    pub failures: Vec<(Cid, Cid)>,
}

impl TipsetOutput {
    pub fn is_failure(&self, block: &Cid, message: &Cid) -> bool {
        self.failures.iter().any(|(b, m)| b == block && m == message)
    }
}

/// State manager handles all interactions with the actor state of the chain:
/// computing the state of a tipset by replaying messages on its parent state,
/// and looking up receipts and actors in the result.
///
/// Computed states are memoized by tipset key. An entry is only added after a
/// successful computation and is never invalidated.
pub struct StateManager<DB> {
    /// Chain store
    cs: Arc<ChainStore<DB>>,

    cache: SyncMutex<HashMap<TipsetKey, TipsetOutput>>,
}

impl<DB> StateManager<DB>
where
    DB: Blockstore,
{
    pub fn new(cs: Arc<ChainStore<DB>>) -> Self {
        Self {
            cs,
            cache: SyncMutex::new(HashMap::default()),
        }
    }

    /// Returns the internal, protocol-level network chain from the state.
    pub fn chain_store(&self) -> &Arc<ChainStore<DB>> {
        &self.cs
    }

    pub fn blockstore(&self) -> &DB {
        self.cs.blockstore()
    }

    fn cached(&self, key: &TipsetKey) -> Option<TipsetOutput> {
        self.cache.lock().get(key).cloned()
    }

    /// Returns the state computed for `tipset`, executing its messages and
    /// those of any ancestor not computed yet.
    ///
    /// Ancestors are walked iteratively back to the nearest cached tipset (or
    /// genesis) and applied forward, so the depth of the chain does not matter.
    #[instrument(skip_all, fields(epoch = tipset.epoch()))]
    pub fn tipset_state(&self, tipset: &Arc<Tipset>) -> Result<TipsetOutput, Error> {
        if let Some(output) = self.cached(tipset.key()) {
            trace!("hit cache for tipset {}", tipset.key());
            return Ok(output);
        }

        let mut pending = Vec::new();
        let mut current = Arc::clone(tipset);
        let mut output = loop {
            if let Some(output) = self.cached(current.key()) {
                break output;
            }
            if current.is_genesis() {
                let output = self.genesis_output(&current);
                self.cache.lock().insert(current.key().clone(), output.clone());
                break output;
            }
            let parent = self.parent_tipset(&current)?;
            pending.push(current);
            current = parent;
        };

        debug!(
            "Computing state of {} tipsets on top of epoch {}",
            pending.len(),
            current.epoch()
        );
        while let Some(ts) = pending.pop() {
            output = self.apply_tipset(&ts, &output.state_root)?;
            self.cache.lock().insert(ts.key().clone(), output.clone());
        }
        Ok(output)
    }

    /// Loads the actor state tree of `tipset`.
    pub fn state_tree(&self, tipset: &Arc<Tipset>) -> Result<StateTree<&DB>, Error> {
        let output = self.tipset_state(tipset)?;
        Ok(StateTree::new_from_root(self.blockstore(), &output.state_root)?)
    }

    /// Returns the actor at `addr` in the state of `tipset`.
    pub fn get_actor(
        &self,
        addr: &Address,
        tipset: &Arc<Tipset>,
    ) -> Result<Option<ActorState>, Error> {
        Ok(self.state_tree(tipset)?.get_actor(addr)?)
    }

    /// The genesis state is declared, never executed.
    fn genesis_output(&self, genesis: &Tipset) -> TipsetOutput {
        let header = genesis.min_ticket_block();
        TipsetOutput {
            state_root: header.state_root,
            receipt_root: header.message_receipts,
            failures: Vec::new(),
        }
    }

    fn parent_tipset(&self, tipset: &Tipset) -> Result<Arc<Tipset>, Error> {
        if tipset.parents().is_empty() {
            return Err(Error::InvalidBase(format!(
                "tipset {} at epoch {} has no parents",
                tipset.key(),
                tipset.epoch()
            )));
        }
        self.cs
            .tipset_from_keys(tipset.parents())
            .map_err(|e| match e {
                chain::Error::NotFound(_) => Error::InvalidBase(format!(
                    "parents {} of tipset {} are unknown",
                    tipset.parents(),
                    tipset.key()
                )),
                e => e.into(),
            })
    }

    fn load_blocks(&self, tipset: &Tipset) -> Result<Vec<Block>, Error> {
        tipset
            .blocks()
            .iter()
            .map(|header| {
                Ok(Block {
                    header: header.clone(),
                    messages: block_messages(self.blockstore(), header)?,
                })
            })
            .collect()
    }

    /// Applies the messages of `tipset` on top of `base`.
    ///
    /// Every block is first checked on its own against `base`: its declared
    /// state and receipts roots must match. For a multi-block tipset the
    /// messages are then deduplicated in canonical block order and applied
    /// once more to produce the aggregate state.
    fn apply_tipset(&self, tipset: &Tipset, base: &Cid) -> Result<TipsetOutput, Error> {
        let epoch = tipset.epoch();
        let blocks = self.load_blocks(tipset)?;
        for block in &blocks {
            self.validate_block_transition(block, base, epoch)?;
        }
        if let [block] = blocks.as_slice() {
            return Ok(TipsetOutput {
                state_root: block.header.state_root,
                receipt_root: block.header.message_receipts,
                failures: Vec::new(),
            });
        }

        let (messages, failures) = dedup_messages(&blocks)?;
        if !failures.is_empty() {
            info!(
                "Tipset {} carries {} duplicate messages",
                tipset.key(),
                failures.len()
            );
        }
        let (state_root, receipts) = self.run_messages(base, epoch, &messages)?;
        let receipt_root = Receipt::root_of(self.blockstore(), &receipts)?;
        Ok(TipsetOutput {
            state_root,
            receipt_root,
            failures,
        })
    }

    fn validate_block_transition(
        &self,
        block: &Block,
        base: &Cid,
        epoch: ChainEpoch,
    ) -> Result<(), Error> {
        let messages: Vec<&SignedMessage> = block.messages.iter().collect();
        let (state_root, receipts) = self.run_messages(base, epoch, &messages)?;
        if state_root != block.header.state_root {
            return Err(Error::StateRootMismatch {
                block: *block.cid(),
                declared: block.header.state_root,
                computed: state_root,
            });
        }
        let receipt_root = Receipt::root_of(self.blockstore(), &receipts)?;
        if receipt_root != block.header.message_receipts {
            return Err(Error::ReceiptsMismatch {
                block: *block.cid(),
                declared: block.header.message_receipts,
                computed: receipt_root,
            });
        }
        Ok(())
    }

    /// Applies `messages` in order to the state at `base` and flushes it.
    fn run_messages(
        &self,
        base: &Cid,
        epoch: ChainEpoch,
        messages: &[&SignedMessage],
    ) -> Result<(Cid, Vec<Receipt>), Error> {
        let mut vm = VM::new(base, self.blockstore(), epoch)?;
        let mut receipts = Vec::with_capacity(messages.len());
        for msg in messages {
            let ret = vm.apply_message(msg.message())?;
            if let Some(err) = &ret.act_error {
                trace!("message reverted: {err}");
            }
            receipts.push(ret.msg_receipt);
        }
        Ok((vm.flush()?, receipts))
    }

    /// Returns the messages of `tipset` in application order, without the
    /// duplicates of sibling blocks.
    pub fn messages_for_tipset(&self, tipset: &Tipset) -> Result<Vec<SignedMessage>, Error> {
        let blocks = self.load_blocks(tipset)?;
        let (messages, _) = dedup_messages(&blocks)?;
        Ok(messages.into_iter().cloned().collect())
    }

    /// Returns the receipt of `message` if it was applied by `tipset`.
    pub fn receipt(&self, tipset: &Arc<Tipset>, message: &Cid) -> Result<Option<Receipt>, Error> {
        let messages = self.messages_for_tipset(tipset)?;
        let mut position = None;
        for (i, msg) in messages.iter().enumerate() {
            if msg.cid()? == *message {
                position = Some(i as u64);
                break;
            }
        }
        let Some(position) = position else {
            return Ok(None);
        };
        let output = self.tipset_state(tipset)?;
        Ok(Receipt::get(self.blockstore(), &output.receipt_root, position)?)
    }

    /// Returns the receipt of `message` as included by `block`. `None` if the
    /// block does not carry the message or its copy was a duplicate.
    pub fn block_receipt(
        &self,
        tipset: &Arc<Tipset>,
        block: &Cid,
        message: &Cid,
    ) -> Result<Option<Receipt>, Error> {
        let Some(header) = tipset.blocks().iter().find(|h| h.cid() == block) else {
            return Ok(None);
        };
        let mut carried = false;
        for msg in block_messages(self.blockstore(), header)? {
            if msg.cid()? == *message {
                carried = true;
                break;
            }
        }
        if !carried || self.tipset_state(tipset)?.is_failure(block, message) {
            return Ok(None);
        }
        self.receipt(tipset, message)
    }
}

impl<DB> StateManager<DB>
where
    DB: Blockstore + Send + Sync + 'static,
{
    /// Blocks until `message` appears in the chain, looking at head changes
    /// and, in a background task, at the history below the current head.
    /// Returns the tipset that applied it and its receipt.
    pub async fn wait_for_message(
        self: &Arc<Self>,
        message: Cid,
        cancel: CancellationToken,
    ) -> Result<(Arc<Tipset>, Receipt), Error> {
        let mut subscriber = self.cs.head_events();

        let sm = Arc::clone(self);
        let walk_cancel = cancel.child_token();
        let mut back_search = tokio::task::spawn(async move {
            sm.search_back(message, walk_cancel).await
        });
        let mut back_search_done = false;

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(Error::Cancelled),
                res = &mut back_search, if !back_search_done => {
                    back_search_done = true;
                    match res {
                        Ok(Ok(Some(found))) => break Ok(found),
                        Ok(Ok(None)) => {}
                        Ok(Err(e)) => warn!("Searching chain history for {message} failed: {e}"),
                        Err(e) => warn!("Back search task for {message} failed: {e}"),
                    }
                }
                change = subscriber.recv() => match change {
                    Some(HeadChange::Apply(ts)) => match self.receipt(&ts, &message) {
                        Ok(Some(receipt)) => break Ok((ts, receipt)),
                        Ok(None) => {}
                        Err(e) => break Err(e),
                    },
                    None => break Err(Error::Other(anyhow::anyhow!("head change channel closed"))),
                },
            }
        };
        back_search.abort();
        result
    }

    async fn search_back(
        self: Arc<Self>,
        message: Cid,
        cancel: CancellationToken,
    ) -> Result<Option<(Arc<Tipset>, Receipt)>, Error> {
        let mut history = std::pin::pin!(self.cs.block_history(cancel));
        while let Some(ts) = history.next().await {
            let ts = ts?;
            if let Some(receipt) = self.receipt(&ts, &message)? {
                return Ok(Some((ts, receipt)));
            }
        }
        Ok(None)
    }
}

/// Splits the messages of `blocks` into the list to apply, first occurrence
/// first, and the `(block, message)` pairs of blocks whose every copy of a
/// message is a later duplicate. A block that applied a message is never
/// recorded as a failure for it, even if it carries the message again.
fn dedup_messages(blocks: &[Block]) -> anyhow::Result<(Vec<&SignedMessage>, Vec<(Cid, Cid)>)> {
    let mut applied_by = HashMap::default();
    let mut messages = Vec::new();
    let mut failures = Vec::new();
    for block in blocks {
        for msg in &block.messages {
            let cid = msg.cid()?;
            match applied_by.entry(cid) {
                Entry::Vacant(e) => {
                    e.insert(*block.cid());
                    messages.push(msg);
                }
                Entry::Occupied(e) => {
                    let failure = (*block.cid(), cid);
                    if e.get() != block.cid() && !failures.contains(&failure) {
                        failures.push(failure);
                    }
                }
            }
        }
    }
    Ok((messages, failures))
}
