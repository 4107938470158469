// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cmp::Ordering;
use std::fmt;

use super::{Block, BlockHeader, Ticket};
use crate::shim::clock::ChainEpoch;
use anyhow::Context as _;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A set of CIDs forming a unique key for a tipset.
///
/// The CIDs are kept sorted and deduplicated, so two keys are equal exactly when
/// they name the same set of blocks. An empty key names no tipset and is only
/// found as the parents of a genesis block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Vec<Cid>", into = "Vec<Cid>")]
pub struct TipsetKey(Vec<Cid>);

impl TipsetKey {
    pub fn new(cids: impl IntoIterator<Item = Cid>) -> Self {
        let mut cids = cids.into_iter().collect_vec();
        cids.sort_unstable();
        cids.dedup();
        Self(cids)
    }

    pub fn cids(&self) -> &[Cid] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.0.binary_search(cid).is_ok()
    }

    /// String form of every CID, used to persist keys in the settings store.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(Cid::to_string).collect()
    }

    pub fn from_strings(strings: &[String]) -> anyhow::Result<Self> {
        strings
            .iter()
            .map(|s| Cid::try_from(s.as_str()).with_context(|| format!("invalid CID {s}")))
            .collect()
    }
}

impl From<Vec<Cid>> for TipsetKey {
    fn from(cids: Vec<Cid>) -> Self {
        Self::new(cids)
    }
}

impl From<TipsetKey> for Vec<Cid> {
    fn from(key: TipsetKey) -> Self {
        key.0
    }
}

impl FromIterator<Cid> for TipsetKey {
    fn from_iter<T: IntoIterator<Item = Cid>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for TipsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.iter().join(","))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CreateTipsetError {
    #[error("tipsets must not be empty")]
    Empty,
    #[error("parent CIDs are inconsistent: expected {expected}, found {found}")]
    BadParents {
        expected: TipsetKey,
        found: TipsetKey,
    },
    #[error("epochs are inconsistent: expected {expected}, found {found}")]
    BadEpoch {
        expected: ChainEpoch,
        found: ChainEpoch,
    },
    #[error("duplicate block {0}")]
    Duplicate(Cid),
}

/// Canonical order of blocks inside a tipset: ascending ticket, then CID bytes.
fn canonical_order(a: &BlockHeader, b: &BlockHeader) -> Ordering {
    a.ticket
        .cmp(&b.ticket)
        .then_with(|| a.cid().to_bytes().cmp(&b.cid().to_bytes()))
}

fn verify_headers<'a>(
    headers: impl IntoIterator<Item = &'a BlockHeader>,
) -> Result<TipsetKey, CreateTipsetError> {
    let mut headers = headers.into_iter();
    let first = headers.next().ok_or(CreateTipsetError::Empty)?;
    let mut cids = vec![*first.cid()];
    for header in headers {
        if header.parents != first.parents {
            return Err(CreateTipsetError::BadParents {
                expected: first.parents.clone(),
                found: header.parents.clone(),
            });
        }
        if header.epoch != first.epoch {
            return Err(CreateTipsetError::BadEpoch {
                expected: first.epoch,
                found: header.epoch,
            });
        }
        if cids.contains(header.cid()) {
            return Err(CreateTipsetError::Duplicate(*header.cid()));
        }
        cids.push(*header.cid());
    }
    Ok(TipsetKey::new(cids))
}

/// An immutable set of blocks at the same height with the same parent set.
/// Blocks in a tipset are canonically ordered by ticket size.
#[derive(Clone, Debug)]
pub struct Tipset {
    headers: Vec<BlockHeader>,
    key: TipsetKey,
}

impl PartialEq for Tipset {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Tipset {}

impl std::hash::Hash for Tipset {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state)
    }
}

impl From<BlockHeader> for Tipset {
    fn from(header: BlockHeader) -> Self {
        let key = TipsetKey::new([*header.cid()]);
        Self {
            headers: vec![header],
            key,
        }
    }
}

impl Tipset {
    /// Builds a new tipset from a collection of headers.
    /// A valid tipset contains a non-empty collection of distinct blocks that have
    /// the same epoch and the same parents.
    pub fn new(headers: impl IntoIterator<Item = BlockHeader>) -> Result<Self, CreateTipsetError> {
        let mut headers = headers.into_iter().collect_vec();
        let key = verify_headers(&headers)?;
        headers.sort_by(canonical_order);
        Ok(Self { headers, key })
    }

    /// Loads a tipset from the block store. Returns `None` if any block is missing.
    pub fn load(store: &impl Blockstore, key: &TipsetKey) -> anyhow::Result<Option<Tipset>> {
        let mut headers = Vec::with_capacity(key.len());
        for cid in key.cids() {
            match BlockHeader::load(store, cid)? {
                Some(header) => headers.push(header),
                None => return Ok(None),
            }
        }
        Ok(Some(Tipset::new(headers)?))
    }

    /// Same as [`Tipset::load`], but a missing block is an error.
    pub fn load_required(store: &impl Blockstore, key: &TipsetKey) -> anyhow::Result<Tipset> {
        Tipset::load(store, key)?.with_context(|| format!("Required tipset missing: {key}"))
    }

    /// Returns all blocks in the tipset, in canonical order.
    pub fn blocks(&self) -> &[BlockHeader] {
        &self.headers
    }

    pub fn into_blocks(self) -> Vec<BlockHeader> {
        self.headers
    }

    pub fn key(&self) -> &TipsetKey {
        &self.key
    }

    pub fn cids(&self) -> &[Cid] {
        self.key.cids()
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.key.contains(cid)
    }

    /// Returns the epoch of the tipset.
    pub fn epoch(&self) -> ChainEpoch {
        self.min_ticket_block().epoch
    }

    /// Returns the key of the parent tipset.
    pub fn parents(&self) -> &TipsetKey {
        &self.min_ticket_block().parents
    }

    /// Returns the number of blocks in the tipset.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Tipsets are never empty; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Returns the smallest ticket of all blocks in the tipset.
    pub fn min_ticket(&self) -> &Ticket {
        &self.min_ticket_block().ticket
    }

    /// Returns the block with the smallest ticket of all blocks in the tipset.
    pub fn min_ticket_block(&self) -> &BlockHeader {
        &self.headers[0]
    }

    /// A single parentless block at epoch zero.
    pub fn is_genesis(&self) -> bool {
        self.headers.len() == 1 && self.headers[0].is_genesis()
    }
}

/// A tipset whose blocks carry their messages.
#[derive(Clone, Debug)]
pub struct FullTipset {
    blocks: Vec<Block>,
    key: TipsetKey,
}

impl PartialEq for FullTipset {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl From<Block> for FullTipset {
    fn from(block: Block) -> Self {
        let key = TipsetKey::new([*block.cid()]);
        Self {
            blocks: vec![block],
            key,
        }
    }
}

impl FullTipset {
    pub fn new(blocks: impl IntoIterator<Item = Block>) -> Result<Self, CreateTipsetError> {
        let mut blocks = blocks.into_iter().collect_vec();
        let key = verify_headers(blocks.iter().map(Block::header))?;
        blocks.sort_by(|a, b| canonical_order(a.header(), b.header()));
        Ok(Self { blocks, key })
    }

    /// Returns all blocks in the tipset, in canonical order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn key(&self) -> &TipsetKey {
        &self.key
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.blocks[0].header().epoch
    }

    pub fn parents(&self) -> &TipsetKey {
        &self.blocks[0].header().parents
    }

    /// Drops the messages, keeping the headers.
    pub fn into_tipset(self) -> Tipset {
        Tipset {
            headers: self.blocks.into_iter().map(|b| b.header).collect(),
            key: self.key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::VRFProof;
    use crate::db::MemoryDB;
    use crate::shim::address::Address;
    use quickcheck_macros::quickcheck;

    fn header(ticket: u8, epoch: ChainEpoch, parents: &TipsetKey, miner: u64) -> BlockHeader {
        BlockHeader::builder()
            .miner_address(Address::new_id(miner))
            .ticket(Ticket::new(VRFProof::new(vec![ticket])))
            .epoch(epoch)
            .parents(parents.clone())
            .build_header()
            .unwrap()
    }

    fn parent_key() -> TipsetKey {
        TipsetKey::new([*header(0, 0, &TipsetKey::default(), 0).cid()])
    }

    #[test]
    fn blocks_sorted_by_ticket() {
        let parents = parent_key();
        let b3 = header(3, 1, &parents, 1);
        let b1 = header(1, 1, &parents, 2);
        let b2 = header(2, 1, &parents, 3);
        let ts = Tipset::new([b3.clone(), b1.clone(), b2.clone()]).unwrap();
        assert_eq!(ts.blocks(), &[b1.clone(), b2, b3]);
        assert_eq!(ts.min_ticket(), &b1.ticket);
        assert_eq!(ts.epoch(), 1);
        assert_eq!(ts.parents(), &parents);
        assert_eq!(ts.len(), 3);
    }

    #[test]
    fn empty_tipset_is_rejected() {
        assert_eq!(
            Tipset::new(Vec::<BlockHeader>::new()),
            Err(CreateTipsetError::Empty)
        );
    }

    #[test]
    fn mismatched_epoch_is_rejected() {
        let parents = parent_key();
        let err = Tipset::new([header(1, 1, &parents, 1), header(2, 2, &parents, 2)]).unwrap_err();
        assert_eq!(
            err,
            CreateTipsetError::BadEpoch {
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn mismatched_parents_are_rejected() {
        let parents = parent_key();
        let err = Tipset::new([
            header(1, 1, &parents, 1),
            header(2, 1, &TipsetKey::default(), 2),
        ])
        .unwrap_err();
        assert!(matches!(err, CreateTipsetError::BadParents { .. }));
    }

    #[test]
    fn duplicate_blocks_are_rejected() {
        let parents = parent_key();
        let b = header(1, 1, &parents, 1);
        assert_eq!(
            Tipset::new([b.clone(), b.clone()]),
            Err(CreateTipsetError::Duplicate(*b.cid()))
        );
    }

    #[test]
    fn key_is_a_set() {
        let a = *header(1, 0, &TipsetKey::default(), 1).cid();
        let b = *header(2, 0, &TipsetKey::default(), 2).cid();
        assert_eq!(TipsetKey::new([a, b]), TipsetKey::new([b, a, b]));
        let key = TipsetKey::new([a, b]);
        assert_eq!(TipsetKey::from_strings(&key.to_strings()).unwrap(), key);
        assert!(key.to_string().starts_with('{'));
    }

    #[test]
    fn key_decoding_restores_order() {
        let a = *header(1, 0, &TipsetKey::default(), 1).cid();
        let b = *header(2, 0, &TipsetKey::default(), 2).cid();
        let bytes = fvm_ipld_encoding::to_vec(&vec![b, a]).unwrap();
        let key: TipsetKey = fvm_ipld_encoding::from_slice(&bytes).unwrap();
        assert_eq!(key, TipsetKey::new([a, b]));
    }

    #[test]
    fn load_round_trip() {
        let db = MemoryDB::default();
        let parents = parent_key();
        let blocks = [header(5, 1, &parents, 1), header(4, 1, &parents, 2)];
        for b in &blocks {
            b.persist(&db).unwrap();
        }
        let ts = Tipset::new(blocks.clone()).unwrap();
        assert_eq!(Tipset::load_required(&db, ts.key()).unwrap(), ts);

        let missing = TipsetKey::new([*header(9, 1, &parents, 3).cid()]);
        assert_eq!(Tipset::load(&db, &missing).unwrap(), None);
        assert!(Tipset::load_required(&db, &missing).is_err());
    }

    #[quickcheck]
    fn canonical_order_ignores_arrival_order(tickets: Vec<u8>, rotate: usize) -> bool {
        let parents = parent_key();
        let headers = tickets
            .iter()
            .enumerate()
            .map(|(i, t)| header(*t, 3, &parents, i as u64))
            .collect_vec();
        if headers.is_empty() {
            return true;
        }
        let mut rotated = headers.clone();
        rotated.rotate_left(rotate % headers.len());
        let a = Tipset::new(headers).unwrap();
        let b = Tipset::new(rotated).unwrap();
        a == b && a.blocks() == b.blocks() && a.min_ticket() == b.min_ticket()
    }
}
