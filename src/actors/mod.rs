// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Built-in actors. The set is closed: every code CID the VM can execute maps to
//! one [`BuiltinActor`] variant, and each actor dispatches on its own `Method`
//! enum.

pub mod account;
pub mod paych;
pub mod power;

use std::sync::LazyLock;

use crate::interpreter::{ActorError, Runtime, actor_error};
use crate::message::MethodNum;
use crate::shim::address::Address;
use crate::utils::cid::raw_name_cid;
use cid::Cid;
use fvm_ipld_encoding::RawBytes;
use serde::{Serialize, de::DeserializeOwned};

pub static ACCOUNT_ACTOR_CODE_ID: LazyLock<Cid> =
    LazyLock::new(|| raw_name_cid("fil/1/account"));
pub static PAYMENT_BROKER_ACTOR_CODE_ID: LazyLock<Cid> =
    LazyLock::new(|| raw_name_cid("fil/1/paymentbroker"));
pub static STORAGE_MARKET_ACTOR_CODE_ID: LazyLock<Cid> =
    LazyLock::new(|| raw_name_cid("fil/1/storagemarket"));

pub const PAYMENT_BROKER_ACTOR_ADDR: Address = Address::new_id(2);
pub const STORAGE_MARKET_ACTOR_ADDR: Address = Address::new_id(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinActor {
    Account,
    PaymentBroker,
    StorageMarket,
}

impl BuiltinActor {
    pub fn from_code(code: &Cid) -> Option<Self> {
        [Self::Account, Self::PaymentBroker, Self::StorageMarket]
            .into_iter()
            .find(|actor| actor.code() == *code)
    }

    pub fn code(&self) -> Cid {
        match self {
            Self::Account => *ACCOUNT_ACTOR_CODE_ID,
            Self::PaymentBroker => *PAYMENT_BROKER_ACTOR_CODE_ID,
            Self::StorageMarket => *STORAGE_MARKET_ACTOR_CODE_ID,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::PaymentBroker => "paymentbroker",
            Self::StorageMarket => "storagemarket",
        }
    }

    /// Runs `method` of this actor. Unknown methods revert with
    /// `SysErrMissingExport`; parameters of the wrong shape are a fault.
    pub fn invoke<RT: Runtime>(
        &self,
        rt: &mut RT,
        method: MethodNum,
        params: &RawBytes,
    ) -> Result<RawBytes, ActorError> {
        match self {
            Self::Account => account::Actor::invoke_method(rt, method, params),
            Self::PaymentBroker => paych::Actor::invoke_method(rt, method, params),
            Self::StorageMarket => power::Actor::invoke_method(rt, method, params),
        }
    }
}

pub(crate) fn missing_export(actor: BuiltinActor, method: MethodNum) -> ActorError {
    actor_error!(SysErrMissingExport; "actor {} has no method {}", actor.name(), method)
}

/// Decodes method parameters. A mismatch with the method's parameter type is a
/// fault, not a revert.
pub(crate) fn decode_params<T: DeserializeOwned>(params: &RawBytes) -> Result<T, ActorError> {
    params.deserialize().map_err(ActorError::serialization)
}

/// Checks the parameters of a method that takes none: either no bytes at all
/// or an encoded unit.
pub(crate) fn decode_no_params(params: &RawBytes) -> Result<(), ActorError> {
    if params.bytes().is_empty() {
        return Ok(());
    }
    decode_params(params)
}

pub(crate) fn encode_return<T: Serialize>(value: &T) -> Result<RawBytes, ActorError> {
    RawBytes::serialize(value).map_err(ActorError::serialization)
}
