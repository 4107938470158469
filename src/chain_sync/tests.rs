// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::blocks::{Block, BlockHeader, Tipset};
use crate::chain::{ChainStore, DEFAULT_HEAD_EVENT_CAPACITY, Weight};
use crate::db::MemoryDB;
use crate::fil_cns::{EcParams, FilecoinConsensus};
use crate::genesis::GenesisBuilder;
use crate::message::{Message, SignedMessage};
use crate::shim::{address::Address, econ::TokenAmount};
use crate::state_manager::StateManager;
use crate::test_utils::{KeyPair, mine_block};
use ahash::HashMap;
use anyhow::Context as _;
use async_trait::async_trait;
use cid::Cid;
use num::{BigInt, BigRational};
use num_traits::Zero as _;
use parking_lot::Mutex;

/// A peer serving the blocks it was given.
#[derive(Default)]
struct PeerFetcher {
    blocks: Mutex<HashMap<Cid, Block>>,
    requests: AtomicUsize,
}

#[async_trait]
impl BlockFetcher for PeerFetcher {
    async fn fetch_block(&self, cid: Cid) -> anyhow::Result<Block> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.blocks
            .lock()
            .get(&cid)
            .cloned()
            .with_context(|| format!("peer does not have {cid}"))
    }
}

/// A peer that never answers.
struct StalledFetcher;

#[async_trait]
impl BlockFetcher for StalledFetcher {
    async fn fetch_block(&self, _cid: Cid) -> anyhow::Result<Block> {
        futures::future::pending().await
    }
}

fn genesis_builder(alice: &KeyPair, miner: Address) -> GenesisBuilder {
    GenesisBuilder::new()
        .with_account(alice.address, TokenAmount::from_atto(1000))
        .with_miner(miner, 10)
}

/// The remote side: a chain mined on a separate store and served by a peer.
struct Remote {
    db: MemoryDB,
    genesis: Arc<Tipset>,
    alice: KeyPair,
    miner: Address,
    peer: Arc<PeerFetcher>,
}

impl Remote {
    fn new(genesis: GenesisBuilder, alice: KeyPair, miner: Address) -> Self {
        let db = MemoryDB::default();
        let block = genesis.build(&db).unwrap();
        let remote = Self {
            db,
            genesis: tipset(&block),
            alice,
            miner,
            peer: Arc::default(),
        };
        remote.serve(block);
        remote
    }

    fn serve(&self, block: Block) -> Block {
        self.peer.blocks.lock().insert(*block.cid(), block.clone());
        block
    }

    /// Mines and serves a single block on a single-block `parent`.
    fn mine(&self, parent: &Arc<Tipset>, ticket: u8, messages: Vec<SignedMessage>) -> Block {
        let parent_state = parent.min_ticket_block().state_root;
        self.serve(mine_block(
            &self.db,
            parent,
            &parent_state,
            parent.epoch() + 1,
            self.miner,
            ticket,
            messages,
        ))
    }

    /// Mines `len` empty blocks on top of `parent`.
    fn mine_chain(&self, parent: &Arc<Tipset>, len: usize) -> Vec<Block> {
        let mut parent = Arc::clone(parent);
        let mut blocks = vec![];
        for _ in 0..len {
            let block = self.mine(&parent, 1, vec![]);
            parent = Arc::new(Tipset::from(block.header.clone()));
            blocks.push(block);
        }
        blocks
    }

    fn transfer(&self, to: Address, seq: u64, value: i64) -> SignedMessage {
        self.alice.sign_message(Message::transfer(
            self.alice.address,
            to,
            seq,
            TokenAmount::from_atto(value),
        ))
    }
}

fn tipset(block: &Block) -> Arc<Tipset> {
    Arc::new(Tipset::from(block.header.clone()))
}

fn weight(n: i64) -> Weight {
    BigRational::from_integer(BigInt::from(n))
}

struct Local<F> {
    syncer: Syncer<MemoryDB, F>,
    sm: Arc<StateManager<MemoryDB>>,
}

fn local<F: BlockFetcher>(remote: &Remote, fetcher: Arc<F>, config: &SyncConfig) -> Local<F> {
    let db = Arc::new(MemoryDB::default());
    let genesis = genesis_builder(&remote.alice, remote.miner)
        .build(db.as_ref())
        .unwrap();
    let cs = Arc::new(ChainStore::new(
        db.clone(),
        db,
        DEFAULT_HEAD_EVENT_CAPACITY,
    ));
    cs.set_head(Arc::new(Tipset::from(genesis.header)), Weight::zero())
        .unwrap();
    let sm = Arc::new(StateManager::new(cs));
    let consensus = Arc::new(FilecoinConsensus::new(sm.clone(), EcParams::default()));
    Local {
        syncer: Syncer::new(consensus, fetcher, config),
        sm,
    }
}

fn setup() -> (Remote, Local<PeerFetcher>) {
    let alice = KeyPair::new(1);
    let miner = KeyPair::new(7).address;
    let remote = Remote::new(genesis_builder(&alice, miner), alice, miner);
    let local = local(&remote, remote.peer.clone(), &SyncConfig::default());
    (remote, local)
}

impl<F: BlockFetcher> Local<F> {
    async fn announce(&self, block: &Block) -> Result<SyncOutcome, TipsetSyncerError> {
        self.syncer
            .handle_new_blocks_from_network(vec![*block.cid()], block.header.epoch)
            .await
    }

    fn head(&self) -> Arc<Tipset> {
        self.syncer.chain_store().heaviest_tipset().unwrap()
    }
}

#[tokio::test]
async fn announced_chain_becomes_head() {
    let (remote, local) = setup();
    let bob = KeyPair::new(2).address;
    let first = remote.mine(&remote.genesis, 1, vec![]);
    let second = remote.mine(&tipset(&first), 1, vec![remote.transfer(bob, 0, 25)]);
    let third = remote.mine(&tipset(&second), 1, vec![]);

    let outcome = local.announce(&third).await.unwrap();
    assert_eq!(outcome, SyncOutcome::NewHead(tipset(&third)));
    assert_eq!(local.head(), tipset(&third));
    assert_eq!(
        local.syncer.chain_store().head().unwrap().weight,
        weight(3 * 110)
    );
    for block in [&first, &second, &third] {
        assert!(local.syncer.chain_store().has_block(block.cid()).unwrap());
        assert!(local.syncer.chain_store().is_block_validated(block.cid()));
    }
    let bob_actor = local.sm.get_actor(&bob, &local.head()).unwrap().unwrap();
    assert_eq!(bob_actor.balance, TokenAmount::from_atto(25));
    assert_eq!(remote.peer.requests.load(Ordering::SeqCst), 3);

    // known blocks are served locally and lose fork choice against themselves
    let again = local.announce(&third).await.unwrap();
    assert_eq!(again, SyncOutcome::StaleFork(tipset(&third)));
    assert_eq!(remote.peer.requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn lighter_fork_is_stale() {
    let (remote, local) = setup();
    let chain = remote.mine_chain(&remote.genesis, 2);
    local.announce(&chain[1]).await.unwrap();

    let fork = remote.mine(&remote.genesis, 9, vec![]);
    let outcome = local.announce(&fork).await.unwrap();
    assert_eq!(outcome, SyncOutcome::StaleFork(tipset(&fork)));
    assert_eq!(local.head(), tipset(&chain[1]));
}

#[tokio::test]
async fn equal_weight_fork_with_smaller_ticket_wins() {
    let (remote, local) = setup();
    let high = remote.mine(&remote.genesis, 5, vec![]);
    let low = remote.mine(&remote.genesis, 3, vec![]);
    assert!(matches!(
        local.announce(&high).await.unwrap(),
        SyncOutcome::NewHead(_)
    ));
    assert_eq!(
        local.announce(&low).await.unwrap(),
        SyncOutcome::NewHead(tipset(&low))
    );
}

#[tokio::test]
async fn forged_signature_is_rejected_and_remembered() {
    let (remote, local) = setup();
    let mallory = KeyPair::new(9);
    let forged = mallory.sign_message(Message::transfer(
        remote.alice.address,
        mallory.address,
        0,
        TokenAmount::from_atto(500),
    ));
    let block = remote.mine(&remote.genesis, 1, vec![forged]);

    assert!(matches!(
        local.announce(&block).await.unwrap(),
        SyncOutcome::Rejected(_)
    ));
    assert!(local.syncer.bad_blocks().peek(block.cid()).is_some());
    assert_eq!(local.head(), remote.genesis);

    assert!(matches!(
        local.announce(&block).await.unwrap(),
        SyncOutcome::Rejected(_)
    ));
    assert_eq!(remote.peer.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wrong_state_root_taints_descendants() {
    let (remote, local) = setup();
    let honest = remote.mine(&remote.genesis, 1, vec![remote.transfer(remote.miner, 0, 1)]);
    let mut raw = honest.header.clone().into_raw();
    raw.state_root = remote.genesis.min_ticket_block().state_root;
    let forged = remote.serve(Block {
        header: BlockHeader::new(raw).unwrap(),
        messages: honest.messages.clone(),
    });
    let child = remote.mine(&tipset(&forged), 1, vec![]);

    assert!(matches!(
        local.announce(&child).await.unwrap(),
        SyncOutcome::Rejected(_)
    ));
    assert!(local.syncer.bad_blocks().peek(forged.cid()).is_some());
    assert!(local.syncer.bad_blocks().peek(child.cid()).is_some());
    assert_eq!(local.head(), remote.genesis);
}

#[tokio::test]
async fn announcement_must_match_block_epoch() {
    let (remote, local) = setup();
    let block = remote.mine(&remote.genesis, 1, vec![]);
    let outcome = local
        .syncer
        .handle_new_blocks_from_network(vec![*block.cid()], 4)
        .await
        .unwrap();
    assert!(matches!(outcome, SyncOutcome::Rejected(_)));
    // the announcement was wrong, not the block
    assert!(local.syncer.bad_blocks().is_empty());
}

#[tokio::test]
async fn unknown_block_is_a_fetch_error() {
    let (remote, local) = setup();
    let block = remote.mine(&remote.genesis, 1, vec![]);
    remote.peer.blocks.lock().clear();
    assert!(matches!(
        local.announce(&block).await,
        Err(TipsetSyncerError::Fetch(cid, _)) if cid == *block.cid()
    ));
}

#[tokio::test]
async fn slow_peer_times_out() {
    let (remote, _) = setup();
    let config = SyncConfig {
        fetch_timeout_ms: 20,
        ..Default::default()
    };
    let local = local(&remote, Arc::new(StalledFetcher), &config);
    let block = remote.mine(&remote.genesis, 1, vec![]);
    assert!(matches!(
        local.announce(&block).await,
        Err(TipsetSyncerError::FetchTimeout(_))
    ));
}

#[tokio::test]
async fn ancestor_fetch_is_bounded() {
    let (remote, _) = setup();
    let config = SyncConfig {
        fetch_depth: 2,
        ..Default::default()
    };
    let local = local(&remote, remote.peer.clone(), &config);
    let chain = remote.mine_chain(&remote.genesis, 4);
    assert!(matches!(
        local.announce(&chain[3]).await,
        Err(TipsetSyncerError::ForkTooLong(_, 2))
    ));

    // a shorter gap is fine
    let close = local.announce(&chain[2]).await.unwrap();
    assert_eq!(close, SyncOutcome::NewHead(tipset(&chain[2])));
}

#[tokio::test]
async fn foreign_genesis_is_rejected() {
    let alice = KeyPair::new(1);
    let miner = KeyPair::new(7).address;
    let (_, local) = setup();
    let other = Remote::new(
        genesis_builder(&alice, miner).with_timestamp(42),
        alice,
        miner,
    );
    let block = other.mine(&other.genesis, 1, vec![]);
    let syncer = Syncer::new(
        Arc::new(FilecoinConsensus::new(local.sm.clone(), EcParams::default())),
        other.peer.clone(),
        &SyncConfig::default(),
    );
    let outcome = syncer
        .handle_new_blocks_from_network(vec![*block.cid()], 1)
        .await
        .unwrap();
    assert!(matches!(outcome, SyncOutcome::Rejected(reason) if reason.contains("genesis")));
    assert!(syncer.bad_blocks().peek(block.cid()).is_some());
}
