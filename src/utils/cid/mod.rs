// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_encoding::{DAG_CBOR, IPLD_RAW};
use multihash_codetable::{Code, MultihashDigest};

/// Extension methods for constructing `dag-cbor` [Cid]
pub trait CidCborExt {
    /// Default CID builder
    ///
    /// - The default codec is [`fvm_ipld_encoding::DAG_CBOR`]
    /// - The default hash function is 256 bit BLAKE2b
    fn from_cbor_blake2b256<S: serde::ser::Serialize>(obj: &S) -> anyhow::Result<Cid> {
        let bytes = fvm_ipld_encoding::to_vec(obj)?;
        Ok(Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(&bytes)))
    }
}

impl CidCborExt for Cid {}

/// `dag-cbor` CID of bytes that are already CBOR encoded.
pub fn cbor_bytes_cid(bytes: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(bytes))
}

/// Raw CID naming a well-known identifier, such as a built-in actor code.
pub fn raw_name_cid(name: &str) -> Cid {
    Cid::new_v1(IPLD_RAW, Code::Blake2b256.digest(name.as_bytes()))
}
