// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::ops::Deref;

use super::{Ticket, TipsetKey};
use crate::shim::{address::Address, clock::ChainEpoch};
use crate::utils::cid::cbor_bytes_cid;
use anyhow::Context as _;
use cid::Cid;
use derive_builder::Builder;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::CborStore as _;
use fvm_ipld_encoding::tuple::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Deserialize_tuple, Serialize_tuple, Clone, Hash, Eq, PartialEq, Debug, Builder)]
#[builder(name = "HeaderBuilder")]
pub struct RawBlockHeader {
    /// The address of the miner that mined this block
    #[builder(default = "Address::new_id(0)")]
    pub miner_address: Address,
    #[builder(default)]
    pub ticket: Ticket,
    /// The set of parents this block was based on.
    /// Typically one, but can be several in the case where there were multiple
    /// winning ticket-holders for an epoch
    #[builder(default)]
    pub parents: TipsetKey,
    /// The period in which a new block is generated.
    #[builder(default)]
    pub epoch: ChainEpoch,
    /// The CID of the state root after applying this block's messages to the
    /// parent state.
    #[builder(default)]
    pub state_root: Cid,
    /// The CID of the root of an array of `MessageReceipts`
    #[builder(default)]
    pub message_receipts: Cid,
    /// The CID of the root of an array of signed message CIDs
    #[builder(default)]
    pub messages: Cid,
    /// Block creation time, in seconds since the Unix epoch
    #[builder(default)]
    pub timestamp: u64,
}

impl RawBlockHeader {
    pub fn car_block(&self) -> anyhow::Result<(Cid, Vec<u8>)> {
        let data = fvm_ipld_encoding::to_vec(self)?;
        Ok((cbor_bytes_cid(&data), data))
    }

    /// Whether this header claims to be a genesis block: no parents at epoch zero.
    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty() && self.epoch == 0
    }
}

/// A [`RawBlockHeader`] with its content identifier computed once on construction.
#[derive(Clone, Debug)]
pub struct BlockHeader {
    uncached: RawBlockHeader,
    cid: Cid,
}

impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.cid == other.cid
    }
}

impl Eq for BlockHeader {}

impl std::hash::Hash for BlockHeader {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(&self.cid, state)
    }
}

impl Deref for BlockHeader {
    type Target = RawBlockHeader;

    fn deref(&self) -> &Self::Target {
        &self.uncached
    }
}

impl Serialize for BlockHeader {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.uncached.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BlockHeader {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let uncached = RawBlockHeader::deserialize(deserializer)?;
        Self::new(uncached).map_err(serde::de::Error::custom)
    }
}

impl BlockHeader {
    pub fn new(uncached: RawBlockHeader) -> anyhow::Result<Self> {
        let (cid, _) = uncached.car_block()?;
        Ok(Self { uncached, cid })
    }

    pub fn builder() -> HeaderBuilder {
        HeaderBuilder::default()
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn into_raw(self) -> RawBlockHeader {
        self.uncached
    }

    /// Loads a header from the block store, checking that the stored bytes hash to `cid`.
    pub fn load(store: &impl Blockstore, cid: &Cid) -> anyhow::Result<Option<Self>> {
        let Some(header) = store.get_cbor::<BlockHeader>(cid)? else {
            return Ok(None);
        };
        anyhow::ensure!(
            header.cid() == cid,
            "block store returned header {} for key {cid}",
            header.cid()
        );
        Ok(Some(header))
    }

    /// Writes the header to the block store under its CID.
    pub fn persist(&self, store: &impl Blockstore) -> anyhow::Result<()> {
        let (cid, data) = self.uncached.car_block()?;
        store
            .put_keyed(&cid, &data)
            .with_context(|| format!("failed to persist block header {cid}"))
    }
}

impl HeaderBuilder {
    /// Builds the raw header and wraps it into a [`BlockHeader`].
    pub fn build_header(&self) -> anyhow::Result<BlockHeader> {
        BlockHeader::new(self.build()?)
    }
}
