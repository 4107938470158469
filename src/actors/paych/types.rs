// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::shim::{address::Address, clock::ChainEpoch, crypto::Signature, econ::TokenAmount};
use fvm_ipld_encoding::tuple::*;

/// Identifier of a channel, unique per payer.
pub type ChannelId = u64;

/// Funds a payer locked for a target until `eol`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PaymentChannel {
    pub target: Address,
    /// Total amount locked in the channel.
    pub amount: TokenAmount,
    /// Amount already paid out to the target. Never decreases, never exceeds
    /// `amount`.
    pub amount_redeemed: TokenAmount,
    /// Epoch at which the payer may take back what was not redeemed.
    pub eol: ChainEpoch,
}

impl PaymentChannel {
    /// Funds neither redeemed nor reclaimed yet.
    pub fn remaining(&self) -> TokenAmount {
        &self.amount - &self.amount_redeemed
    }
}

/// Off-chain promise from the payer that the target may redeem up to `amount`
/// from a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PaymentVoucher {
    pub channel: ChannelId,
    pub payer: Address,
    pub target: Address,
    pub amount: TokenAmount,
}

impl PaymentVoucher {
    /// Bytes the payer signs.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, fvm_ipld_encoding::Error> {
        fvm_ipld_encoding::to_vec(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct CreateChannelParams {
    pub target: Address,
    pub eol: ChainEpoch,
}

/// Parameters of both `Update` and `Close`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct UpdateChannelParams {
    pub payer: Address,
    pub chid: ChannelId,
    pub amount: TokenAmount,
    pub signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ExtendParams {
    pub chid: ChannelId,
    pub eol: ChainEpoch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ReclaimParams {
    pub chid: ChannelId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct VoucherParams {
    pub chid: ChannelId,
    pub amount: TokenAmount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct LsParams {
    pub payer: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub channel: PaymentChannel,
}
