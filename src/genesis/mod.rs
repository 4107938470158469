// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::actors::{
    ACCOUNT_ACTOR_CODE_ID, PAYMENT_BROKER_ACTOR_ADDR, PAYMENT_BROKER_ACTOR_CODE_ID,
    STORAGE_MARKET_ACTOR_ADDR, STORAGE_MARKET_ACTOR_CODE_ID, paych, power,
};
use crate::blocks::{Block, BlockHeader, Ticket, VRFProof};
use crate::interpreter::Receipt;
use crate::shim::{address::Address, econ::TokenAmount};
use crate::state_tree::{ActorState, EMPTY_STATE, StateTree};
use crate::utils::db::CborStoreExt as _;
use fvm_ipld_blockstore::Blockstore;
use num_traits::Zero as _;
use tracing::info;

/// Ticket carried by every genesis block.
pub const GENESIS_TICKET: &[u8] = b"genesis";

/// Builds the initial state tree and the single genesis block on top of it.
#[derive(Debug, Clone, Default)]
pub struct GenesisBuilder {
    accounts: Vec<(Address, TokenAmount)>,
    miners: Vec<(Address, power::StoragePower)>,
    timestamp: u64,
}

impl GenesisBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an account actor holding `balance`.
    pub fn with_account(mut self, address: Address, balance: TokenAmount) -> Self {
        self.accounts.push((address, balance));
        self
    }

    /// Registers `address` in the power table with `power`.
    pub fn with_miner(mut self, address: Address, power: impl Into<power::StoragePower>) -> Self {
        self.miners.push((address, power.into()));
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Writes the genesis state and block to `db`.
    pub fn build<DB: Blockstore>(&self, db: &DB) -> anyhow::Result<Block> {
        let mut tree = StateTree::new(db);
        for (address, balance) in &self.accounts {
            tree.set_actor(
                address,
                ActorState::new(*ACCOUNT_ACTOR_CODE_ID, *EMPTY_STATE, balance.clone(), 0),
            );
        }

        let broker_state = db.put_cbor_default(&paych::State::new(db)?)?;
        tree.set_actor(
            &PAYMENT_BROKER_ACTOR_ADDR,
            ActorState::new(
                *PAYMENT_BROKER_ACTOR_CODE_ID,
                broker_state,
                TokenAmount::zero(),
                0,
            ),
        );

        let mut power_table = power::State::new(db)?;
        for (miner, power) in &self.miners {
            power_table.set_miner_power(db, miner, power.clone())?;
        }
        tree.set_actor(
            &STORAGE_MARKET_ACTOR_ADDR,
            ActorState::new(
                *STORAGE_MARKET_ACTOR_CODE_ID,
                db.put_cbor_default(&power_table)?,
                TokenAmount::zero(),
                0,
            ),
        );
        let state_root = tree.flush()?;

        let header = BlockHeader::builder()
            .ticket(Ticket::new(VRFProof::new(GENESIS_TICKET.to_vec())))
            .state_root(state_root)
            .messages(Block::messages_root(db, &[])?)
            .message_receipts(Receipt::root_of(db, &[])?)
            .timestamp(self.timestamp)
            .build_header()?;
        let block = Block {
            header,
            messages: vec![],
        };
        block.persist(db)?;
        info!("Initialized genesis: {} (state {state_root})", block.cid());
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDB;

    #[test]
    fn genesis_holds_accounts_and_power() {
        let db = MemoryDB::default();
        let alice = Address::new_id(100);
        let miner = Address::new_id(1000);
        let genesis = GenesisBuilder::new()
            .with_account(alice, TokenAmount::from_atto(500))
            .with_miner(miner, 7)
            .build(&db)
            .unwrap();
        assert!(genesis.header().is_genesis());

        let tree = StateTree::new_from_root(&db, &genesis.header().state_root).unwrap();
        assert_eq!(
            tree.get_actor(&alice).unwrap().unwrap().balance,
            TokenAmount::from_atto(500)
        );
        let table = power::load_state(&tree).unwrap();
        assert_eq!(table.total_power, 7.into());
        assert_eq!(table.miner_power(&db, &miner).unwrap(), 7.into());
        assert!(
            paych::load_state(&tree)
                .unwrap()
                .channels_of(&db, &alice)
                .unwrap()
                .is_empty()
        );
        assert_eq!(Block::load(&db, genesis.cid()).unwrap(), Some(genesis));
    }

    #[test]
    fn genesis_is_deterministic() {
        let build = || {
            GenesisBuilder::new()
                .with_account(Address::new_id(100), TokenAmount::from_atto(1))
                .build(&MemoryDB::default())
                .unwrap()
        };
        assert_eq!(build().cid(), build().cid());
    }
}
