// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::BlockHeader;
use crate::message::SignedMessage;
use crate::utils::db::CborStoreExt;
use cid::Cid;
use fvm_ipld_amt::Amt;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;

/// A complete block: the header plus the signed messages it commits to, in
/// application order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Block {
    pub header: BlockHeader,
    pub messages: Vec<SignedMessage>,
}

impl std::hash::Hash for Block {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(self.cid(), state)
    }
}

impl Block {
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn messages(&self) -> &[SignedMessage] {
        &self.messages
    }

    /// Returns block header's CID.
    pub fn cid(&self) -> &Cid {
        self.header.cid()
    }

    /// Root of the array of message CIDs a header commits to.
    pub fn messages_root(store: &impl Blockstore, messages: &[SignedMessage]) -> anyhow::Result<Cid> {
        let cids = messages
            .iter()
            .map(SignedMessage::cid)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Amt::<Cid, _>::new_from_iter(store, cids)?)
    }

    /// Persists the block in the given block store: every message, the message
    /// array and the header.
    pub fn persist(&self, store: &impl Blockstore) -> anyhow::Result<()> {
        for message in &self.messages {
            store.put_cbor_default(message)?;
        }
        Self::messages_root(store, &self.messages)?;
        self.header.persist(store)
    }

    /// Loads a block and its messages. Returns `None` if the header is unknown.
    pub fn load(store: &impl Blockstore, cid: &Cid) -> anyhow::Result<Option<Block>> {
        let Some(header) = BlockHeader::load(store, cid)? else {
            return Ok(None);
        };
        let messages = block_messages(store, &header)?;
        Ok(Some(Block { header, messages }))
    }
}

/// Returns the signed messages of a block, in application order.
pub fn block_messages(
    store: &impl Blockstore,
    header: &BlockHeader,
) -> anyhow::Result<Vec<SignedMessage>> {
    let amt = Amt::<Cid, _>::load(&header.messages, store)?;
    let mut messages = Vec::with_capacity(amt.count() as usize);
    for i in 0..amt.count() {
        if let Some(cid) = amt.get(i)? {
            messages.push(store.get_cbor_required(cid)?);
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDB;
    use crate::message::Message;
    use crate::shim::econ::TokenAmount;
    use crate::test_utils::KeyPair;

    #[test]
    fn persist_then_load_returns_same_block() {
        let db = MemoryDB::default();
        let alice = KeyPair::new(1);
        let bob = KeyPair::new(2);
        let messages = (0..3)
            .map(|seq| {
                alice.sign_message(Message::transfer(
                    alice.address,
                    bob.address,
                    seq,
                    TokenAmount::from_atto(1),
                ))
            })
            .collect::<Vec<_>>();
        let header = BlockHeader::builder()
            .epoch(1)
            .messages(Block::messages_root(&db, &messages).unwrap())
            .build_header()
            .unwrap();
        let block = Block { header, messages };
        block.persist(&db).unwrap();

        let loaded = Block::load(&db, block.cid()).unwrap().unwrap();
        assert_eq!(loaded, block);
        assert_eq!(loaded.messages().len(), 3);
    }

    #[test]
    fn empty_message_list_has_stable_root() {
        let db = MemoryDB::default();
        assert_eq!(
            Block::messages_root(&db, &[]).unwrap(),
            Block::messages_root(&MemoryDB::default(), &[]).unwrap()
        );
    }
}
