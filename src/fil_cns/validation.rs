// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::FilecoinConsensusError;
use crate::blocks::{Block, FullTipset};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use tracing::trace;

/// Context-free checks of a block received from the network: every root and
/// the ticket are present, the messages root commits to the carried messages
/// and every message is signed by its sender.
///
/// Nothing here needs the parent state, so a block failing these checks can
/// be rejected (and remembered as bad) before any execution.
pub fn validate_block_structure<DB: Blockstore>(
    db: &DB,
    block: &Block,
) -> Result<(), FilecoinConsensusError> {
    let cid = *block.cid();
    let header = block.header();
    trace!("Validating block structure: epoch = {}, key = {cid}", header.epoch);

    let malformed = |why: &str| FilecoinConsensusError::MalformedBlock(cid, why.into());
    if header.ticket.is_empty() {
        return Err(malformed("missing ticket"));
    }
    if header.state_root == Cid::default() {
        return Err(malformed("missing state root"));
    }
    if header.messages == Cid::default() {
        return Err(malformed("missing messages root"));
    }
    if header.message_receipts == Cid::default() {
        return Err(malformed("missing receipts root"));
    }
    if header.epoch == 0 && !header.parents.is_empty() {
        return Err(malformed("non-genesis block at epoch 0"));
    }
    if header.epoch < 0 {
        return Err(malformed("negative epoch"));
    }

    let messages_root = Block::messages_root(db, block.messages())?;
    if messages_root != header.messages {
        return Err(FilecoinConsensusError::MalformedBlock(
            cid,
            format!(
                "messages root {} does not match carried messages {messages_root}",
                header.messages
            ),
        ));
    }

    for msg in block.messages() {
        msg.verify().map_err(|e| {
            FilecoinConsensusError::InvalidSignature(cid, format!("{}: {e}", msg.message().from))
        })?;
    }
    Ok(())
}

/// Validates every block and groups them into a tipset. Fails with
/// [`FilecoinConsensusError::BadTipset`] unless they share epoch and parents.
pub fn new_valid_tipset<DB: Blockstore>(
    db: &DB,
    blocks: Vec<Block>,
) -> Result<FullTipset, FilecoinConsensusError> {
    for block in &blocks {
        validate_block_structure(db, block)?;
    }
    FullTipset::new(blocks).map_err(|e| FilecoinConsensusError::BadTipset(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{BlockHeader, RawBlockHeader, Tipset};
    use crate::db::MemoryDB;
    use crate::genesis::GenesisBuilder;
    use crate::message::Message;
    use crate::shim::econ::TokenAmount;
    use crate::test_utils::{KeyPair, mine_block};

    struct Fixture {
        db: MemoryDB,
        genesis: Tipset,
        alice: KeyPair,
    }

    fn fixture() -> Fixture {
        let db = MemoryDB::default();
        let alice = KeyPair::new(1);
        let genesis = GenesisBuilder::new()
            .with_account(alice.address, TokenAmount::from_atto(100))
            .build(&db)
            .unwrap();
        Fixture {
            db,
            genesis: Tipset::from(genesis.header),
            alice,
        }
    }

    impl Fixture {
        fn block(&self, ticket: u8) -> Block {
            let msg = self.alice.sign_message(Message::transfer(
                self.alice.address,
                KeyPair::new(2).address,
                0,
                TokenAmount::from_atto(1),
            ));
            let base = self.genesis.min_ticket_block().state_root;
            mine_block(
                &self.db,
                &self.genesis,
                &base,
                1,
                self.alice.address,
                ticket,
                vec![msg],
            )
        }
    }

    fn tamper(block: &Block, f: impl FnOnce(&mut RawBlockHeader)) -> Block {
        let mut raw = block.header.clone().into_raw();
        f(&mut raw);
        Block {
            header: BlockHeader::new(raw).unwrap(),
            messages: block.messages.clone(),
        }
    }

    #[test]
    fn mined_block_is_valid() {
        let f = fixture();
        validate_block_structure(&f.db, &f.block(1)).unwrap();
    }

    #[test]
    fn missing_fields_are_malformed() {
        let f = fixture();
        let block = f.block(1);
        let cases = [
            tamper(&block, |h| h.ticket = Default::default()),
            tamper(&block, |h| h.state_root = Cid::default()),
            tamper(&block, |h| h.messages = Cid::default()),
            tamper(&block, |h| h.message_receipts = Cid::default()),
            tamper(&block, |h| h.epoch = 0),
        ];
        for bad in cases {
            assert!(matches!(
                validate_block_structure(&f.db, &bad),
                Err(FilecoinConsensusError::MalformedBlock(cid, _)) if cid == *bad.cid()
            ));
        }
    }

    #[test]
    fn messages_must_match_root() {
        let f = fixture();
        let mut block = f.block(1);
        block.messages.clear();
        let err = validate_block_structure(&f.db, &block).unwrap_err();
        assert!(matches!(err, FilecoinConsensusError::MalformedBlock(..)));
        assert!(err.is_malformed());
    }

    #[test]
    fn forged_signature_is_rejected() {
        let f = fixture();
        let block = f.block(1);
        let mallory = KeyPair::new(9);
        let forged = mallory.sign_message(block.messages[0].message().clone());
        let forged_block = Block {
            messages: vec![forged.clone()],
            ..block
        };
        let forged_block = tamper(&forged_block, |h| {
            h.messages = Block::messages_root(&f.db, &[forged]).unwrap()
        });
        assert!(matches!(
            validate_block_structure(&f.db, &forged_block),
            Err(FilecoinConsensusError::InvalidSignature(..))
        ));
    }

    #[test]
    fn tipset_blocks_must_agree() {
        let f = fixture();
        let a = f.block(1);
        let b = f.block(2);
        let ts = new_valid_tipset(&f.db, vec![b.clone(), a.clone()]).unwrap();
        assert_eq!(ts.blocks()[0].cid(), a.cid());

        let later = tamper(&b, |h| h.epoch = 2);
        assert!(matches!(
            new_valid_tipset(&f.db, vec![a, later]),
            Err(FilecoinConsensusError::BadTipset(_))
        ));
    }
}
