// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Address to actor mapping persisted as a HAMT.
//!
//! Writes are buffered in a stack of snapshot layers. Pushing a layer with
//! [`StateTree::snapshot`] and dropping it with [`StateTree::revert_to_snapshot`]
//! discards every write made since, which is how a reverted actor call loses its
//! storage writes. Only [`StateTree::flush`] touches the HAMT.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::shim::{address::Address, econ::TokenAmount};
use crate::utils::cid::cbor_bytes_cid;
use anyhow::{Context as _, bail};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_hamt::{BytesKey, Hamt};

/// Bit width of every HAMT in the crate.
pub const HAMT_BIT_WIDTH: u32 = 5;

/// CBOR encoding of an empty array, the storage of actors that keep no state.
pub const EMPTY_STATE_BYTES: [u8; 1] = [0x80];

/// CID of [`EMPTY_STATE_BYTES`].
pub static EMPTY_STATE: LazyLock<Cid> = LazyLock::new(|| cbor_bytes_cid(&EMPTY_STATE_BYTES));

/// State of all actor implementations.
#[derive(PartialEq, Eq, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct ActorState {
    /// Link to code for the actor.
    pub code: Cid,
    /// Link to the state of the actor.
    pub state: Cid,
    /// Sequence of the actor.
    pub sequence: u64,
    /// Tokens available to the actor.
    pub balance: TokenAmount,
}

impl ActorState {
    pub fn new(code: Cid, state: Cid, balance: TokenAmount, sequence: u64) -> Self {
        Self {
            code,
            state,
            sequence,
            balance,
        }
    }

    /// Safely deducts funds from an Actor
    pub fn deduct_funds(&mut self, amt: &TokenAmount) -> anyhow::Result<()> {
        if &self.balance < amt {
            bail!("Not enough funds: {} < {amt}", self.balance);
        }
        self.balance -= amt;
        Ok(())
    }

    /// Deposits funds to an Actor
    pub fn deposit_funds(&mut self, amt: &TokenAmount) {
        self.balance += amt;
    }
}

#[derive(Debug)]
struct StateSnapshots {
    layers: Vec<HashMap<Address, Option<ActorState>>>,
}

impl StateSnapshots {
    fn new() -> Self {
        Self {
            layers: vec![HashMap::new()],
        }
    }

    fn add_layer(&mut self) {
        self.layers.push(HashMap::new())
    }

    fn drop_layer(&mut self) -> anyhow::Result<()> {
        if self.layers.len() < 2 {
            bail!("no snapshot layer to drop");
        }
        self.layers.pop();
        Ok(())
    }

    fn merge_last_layer(&mut self) -> anyhow::Result<()> {
        if self.layers.len() < 2 {
            bail!("no snapshot layer to merge");
        }
        let last = self.layers.pop().unwrap_or_default();
        if let Some(parent) = self.layers.last_mut() {
            parent.extend(last);
        }
        Ok(())
    }

    /// `Some(None)` marks an actor deleted in a pending layer.
    fn get_actor(&self, addr: &Address) -> Option<Option<ActorState>> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(addr).cloned())
    }

    fn put(&mut self, addr: Address, actor: Option<ActorState>) {
        if let Some(layer) = self.layers.last_mut() {
            layer.insert(addr, actor);
        }
    }
}

/// State tree implementation using a HAMT. Not thread safe; one tree belongs to
/// one message-application run.
pub struct StateTree<S> {
    hamt: Hamt<S, ActorState>,
    snaps: StateSnapshots,
}

impl<S> StateTree<S>
where
    S: Blockstore,
{
    /// Creates an empty state tree.
    pub fn new(store: S) -> Self {
        Self {
            hamt: Hamt::new_with_bit_width(store, HAMT_BIT_WIDTH),
            snaps: StateSnapshots::new(),
        }
    }

    /// Loads the state tree rooted at `root`.
    pub fn new_from_root(store: S, root: &Cid) -> anyhow::Result<Self> {
        let hamt = Hamt::load_with_bit_width(root, store, HAMT_BIT_WIDTH)
            .with_context(|| format!("failed to load state tree {root}"))?;
        Ok(Self {
            hamt,
            snaps: StateSnapshots::new(),
        })
    }

    /// Retrieve store reference to modify db.
    pub fn store(&self) -> &S {
        self.hamt.store()
    }

    /// Get actor state from an address.
    pub fn get_actor(&self, addr: &Address) -> anyhow::Result<Option<ActorState>> {
        if let Some(pending) = self.snaps.get_actor(addr) {
            return Ok(pending);
        }
        Ok(self.hamt.get(&BytesKey::from(addr.to_bytes()))?.cloned())
    }

    /// Get actor state, failing when the actor does not exist.
    pub fn get_required_actor(&self, addr: &Address) -> anyhow::Result<ActorState> {
        self.get_actor(addr)?
            .with_context(|| format!("Actor for address: {addr} does not exist"))
    }

    /// Set actor state for an address.
    pub fn set_actor(&mut self, addr: &Address, actor: ActorState) {
        self.snaps.put(*addr, Some(actor));
    }

    /// Delete actor for an address.
    pub fn delete_actor(&mut self, addr: &Address) {
        self.snaps.put(*addr, None);
    }

    /// Mutate and set actor state for an Address.
    pub fn mutate_actor<F>(&mut self, addr: &Address, mutate: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut ActorState) -> anyhow::Result<()>,
    {
        let mut act = self.get_required_actor(addr)?;
        mutate(&mut act)?;
        self.set_actor(addr, act);
        Ok(())
    }

    /// Add snapshot layer to stack.
    pub fn snapshot(&mut self) {
        self.snaps.add_layer();
    }

    /// Merges the last snapshot layer into the one below it.
    pub fn clear_snapshot(&mut self) -> anyhow::Result<()> {
        self.snaps.merge_last_layer()
    }

    /// Discards every write made since the last [`StateTree::snapshot`].
    pub fn revert_to_snapshot(&mut self) -> anyhow::Result<()> {
        self.snaps.drop_layer()
    }

    /// Flush state tree and return Cid root.
    pub fn flush(&mut self) -> anyhow::Result<Cid> {
        if self.snaps.layers.len() != 1 {
            bail!(
                "tried to flush state tree with snapshots on the stack: {}",
                self.snaps.layers.len()
            );
        }
        let pending = std::mem::take(&mut self.snaps.layers[0]);
        for (addr, actor) in pending {
            let key = BytesKey::from(addr.to_bytes());
            match actor {
                None => {
                    self.hamt.delete(&key)?;
                }
                Some(state) => {
                    self.hamt.set(key, state)?;
                }
            }
        }
        Ok(self.hamt.flush()?)
    }

    /// Visits every flushed actor. Pending writes are not visible.
    pub fn for_each<F>(&self, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(Address, &ActorState) -> anyhow::Result<()>,
    {
        self.hamt
            .for_each(|k, v| f(Address::from_bytes(k)?, v))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDB;
    use crate::utils::cid::raw_name_cid;
    use num_traits::Zero as _;

    fn actor(balance: u64) -> ActorState {
        ActorState::new(
            raw_name_cid("code"),
            *EMPTY_STATE,
            TokenAmount::from_atto(balance),
            0,
        )
    }

    #[test]
    fn get_set_and_delete() {
        let db = MemoryDB::default();
        let mut tree = StateTree::new(&db);
        let addr = Address::new_id(100);
        assert_eq!(tree.get_actor(&addr).unwrap(), None);

        tree.set_actor(&addr, actor(5));
        assert_eq!(tree.get_actor(&addr).unwrap(), Some(actor(5)));

        tree.delete_actor(&addr);
        assert_eq!(tree.get_actor(&addr).unwrap(), None);
    }

    #[test]
    fn revert_discards_writes_since_snapshot() {
        let db = MemoryDB::default();
        let mut tree = StateTree::new(&db);
        let addr = Address::new_id(1);
        tree.set_actor(&addr, actor(1));

        tree.snapshot();
        tree.set_actor(&addr, actor(2));
        tree.set_actor(&Address::new_id(2), actor(3));
        tree.revert_to_snapshot().unwrap();

        assert_eq!(tree.get_actor(&addr).unwrap(), Some(actor(1)));
        assert_eq!(tree.get_actor(&Address::new_id(2)).unwrap(), None);
    }

    #[test]
    fn clear_keeps_writes_since_snapshot() {
        let db = MemoryDB::default();
        let mut tree = StateTree::new(&db);
        tree.snapshot();
        tree.set_actor(&Address::new_id(1), actor(7));
        tree.clear_snapshot().unwrap();
        assert_eq!(tree.get_actor(&Address::new_id(1)).unwrap(), Some(actor(7)));
        assert!(tree.clear_snapshot().is_err());
    }

    #[test]
    fn flush_refuses_pending_snapshots() {
        let db = MemoryDB::default();
        let mut tree = StateTree::new(&db);
        tree.snapshot();
        assert!(tree.flush().is_err());
    }

    #[test]
    fn flush_is_canonical() {
        let db = MemoryDB::default();
        let mut a = StateTree::new(&db);
        a.set_actor(&Address::new_id(1), actor(1));
        a.set_actor(&Address::new_id(2), actor(2));
        let root_a = a.flush().unwrap();

        let mut b = StateTree::new(&db);
        b.set_actor(&Address::new_id(2), actor(2));
        b.set_actor(&Address::new_id(3), actor(3));
        b.set_actor(&Address::new_id(1), actor(1));
        b.delete_actor(&Address::new_id(3));
        assert_eq!(b.flush().unwrap(), root_a);

        let reloaded = StateTree::new_from_root(&db, &root_a).unwrap();
        assert_eq!(
            reloaded.get_actor(&Address::new_id(2)).unwrap(),
            Some(actor(2))
        );
        let mut count = 0;
        reloaded
            .for_each(|_, _| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn deduct_more_than_balance_fails() {
        let mut act = actor(3);
        assert!(act.deduct_funds(&TokenAmount::from_atto(4)).is_err());
        act.deduct_funds(&TokenAmount::from_atto(3)).unwrap();
        assert!(act.balance.is_zero());
    }
}
