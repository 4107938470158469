// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::Context as _;
use cid::Cid;
use fvm_ipld_encoding::CborStore;
use multihash_codetable::Code;
use serde::{Serialize, de::DeserializeOwned};

/// Extension methods for inserting and retrieving IPLD data with CIDs
pub trait CborStoreExt: CborStore {
    /// Default [Cid] builder: `dag-cbor` encoded and BLAKE2b-256 hashed.
    fn put_cbor_default<S: Serialize>(&self, obj: &S) -> anyhow::Result<Cid> {
        self.put_cbor(obj, Code::Blake2b256)
    }

    /// Get typed object from block store by `CID`, failing when it is absent.
    fn get_cbor_required<T: DeserializeOwned>(&self, cid: &Cid) -> anyhow::Result<T> {
        self.get_cbor(cid)?
            .with_context(|| format!("Entry not found in block store: cid={cid}"))
    }
}

impl<T: CborStore> CborStoreExt for T {}
