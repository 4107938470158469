// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::blocks::{Block, BlockHeader, Ticket, Tipset, VRFProof};
use crate::interpreter::{Receipt, VM};
use crate::message::{Message, SignedMessage};
use crate::shim::{address::Address, clock::ChainEpoch, crypto::Signature};
use crate::utils::encoding::blake2b_256;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint as _;

/// Deterministic secp256k1 key for tests.
pub struct KeyPair {
    key: SigningKey,
    pub address: Address,
}

impl KeyPair {
    /// `seed` must be nonzero.
    pub fn new(seed: u8) -> Self {
        let key = SigningKey::from_slice(&[seed; 32]).expect("valid secret key");
        let public = key.verifying_key().to_encoded_point(false);
        let address = Address::new_secp256k1(public.as_bytes()).expect("valid public key");
        Self { key, address }
    }

    pub fn sign(&self, data: &[u8]) -> Signature {
        let (sig, recovery_id) = self
            .key
            .sign_prehash_recoverable(&blake2b_256(data))
            .expect("signing succeeds");
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte());
        Signature::new_secp256k1(bytes)
    }

    pub fn sign_message(&self, message: Message) -> SignedMessage {
        let cid = message.cid().expect("message encodes");
        let signature = self.sign(&cid.to_bytes());
        SignedMessage::new_unchecked(message, signature)
    }
}

pub fn ticket(n: u8) -> Ticket {
    Ticket::new(VRFProof::new(vec![n]))
}

/// Mines a valid block on `parents`: applies `messages` to `parent_state`
/// and declares the resulting state and receipts.
pub fn mine_block<DB: Blockstore>(
    db: &DB,
    parents: &Tipset,
    parent_state: &Cid,
    epoch: ChainEpoch,
    miner: Address,
    ticket_seed: u8,
    messages: Vec<SignedMessage>,
) -> Block {
    let mut vm = VM::new(parent_state, db, epoch).expect("parent state loads");
    let receipts: Vec<Receipt> = messages
        .iter()
        .map(|m| {
            vm.apply_message(m.message())
                .expect("no fault")
                .msg_receipt
        })
        .collect();
    let state_root = vm.flush().expect("state flushes");
    let header = BlockHeader::builder()
        .miner_address(miner)
        .ticket(ticket(ticket_seed))
        .parents(parents.key().clone())
        .epoch(epoch)
        .state_root(state_root)
        .messages(Block::messages_root(db, &messages).expect("messages persist"))
        .message_receipts(Receipt::root_of(db, &receipts).expect("receipts persist"))
        .timestamp(epoch as u64)
        .build_header()
        .expect("header builds");
    let block = Block { header, messages };
    block.persist(db).expect("block persists");
    block
}
