// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod signed_message;

use crate::shim::{address::Address, econ::TokenAmount};
use crate::utils::cid::CidCborExt;
use cid::Cid;
use fvm_ipld_encoding::RawBytes;
use fvm_ipld_encoding::tuple::*;
pub use signed_message::SignedMessage;

/// Method number indicator for calling actor methods.
pub type MethodNum = u64;

/// Method number of a plain value transfer. It never reaches actor code.
pub const METHOD_SEND: MethodNum = 0;

/// Unsigned message: a value transfer and/or an actor method invocation.
#[derive(PartialEq, Clone, Debug, Serialize_tuple, Deserialize_tuple, Eq)]
pub struct Message {
    pub to: Address,
    pub from: Address,
    pub sequence: u64,
    pub value: TokenAmount,
    pub method_num: MethodNum,
    pub params: RawBytes,
}

impl Message {
    /// A plain value transfer.
    pub fn transfer(from: Address, to: Address, sequence: u64, value: TokenAmount) -> Self {
        Self {
            to,
            from,
            sequence,
            value,
            method_num: METHOD_SEND,
            params: RawBytes::default(),
        }
    }

    /// A method invocation carrying `value` along with it.
    pub fn call(
        from: Address,
        to: Address,
        sequence: u64,
        value: TokenAmount,
        method_num: MethodNum,
        params: RawBytes,
    ) -> Self {
        Self {
            to,
            from,
            sequence,
            value,
            method_num,
            params,
        }
    }

    pub fn from(&self) -> Address {
        self.from
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn value(&self) -> &TokenAmount {
        &self.value
    }

    pub fn method_num(&self) -> MethodNum {
        self.method_num
    }

    pub fn params(&self) -> &RawBytes {
        &self.params
    }

    /// Content identifier of the unsigned message. Signatures are computed over its bytes.
    pub fn cid(&self) -> anyhow::Result<Cid> {
        Cid::from_cbor_blake2b256(self)
    }
}
