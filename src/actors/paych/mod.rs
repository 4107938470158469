// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Payment broker actor: payers lock funds in named channels that targets redeem
//! with signed vouchers.

mod state;
mod types;

pub use self::state::State;
pub use self::types::*;

use super::{
    BuiltinActor, PAYMENT_BROKER_ACTOR_ADDR, decode_params, encode_return, missing_export,
};
use crate::interpreter::{ActorError, Runtime, actor_error};
use crate::message::{METHOD_SEND, MethodNum};
use crate::shim::{address::Address, crypto::Signature, econ::TokenAmount};
use crate::state_tree::StateTree;
use crate::utils::db::CborStoreExt as _;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::RawBytes;
use num_derive::FromPrimitive;
use num_traits::{FromPrimitive as _, Zero as _};

/// Payment broker actor methods available
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Method {
    CreateChannel = 1,
    Update = 2,
    Close = 3,
    Extend = 4,
    Reclaim = 5,
    Voucher = 6,
    Ls = 7,
}

/// Loads the payment broker state out of a state tree.
pub fn load_state<S: Blockstore>(tree: &StateTree<S>) -> anyhow::Result<State> {
    let actor = tree.get_required_actor(&PAYMENT_BROKER_ACTOR_ADDR)?;
    tree.store().get_cbor_required(&actor.state)
}

/// Payment Broker Actor
pub struct Actor;

impl Actor {
    pub fn invoke_method<RT: Runtime>(
        rt: &mut RT,
        method: MethodNum,
        params: &RawBytes,
    ) -> Result<RawBytes, ActorError> {
        match Method::from_u64(method) {
            Some(Method::CreateChannel) => {
                let chid = Self::create_channel(rt, decode_params(params)?)?;
                encode_return(&chid)
            }
            Some(Method::Update) => {
                Self::update(rt, decode_params(params)?)?;
                Ok(RawBytes::default())
            }
            Some(Method::Close) => {
                Self::close(rt, decode_params(params)?)?;
                Ok(RawBytes::default())
            }
            Some(Method::Extend) => {
                Self::extend(rt, decode_params(params)?)?;
                Ok(RawBytes::default())
            }
            Some(Method::Reclaim) => {
                Self::reclaim(rt, decode_params(params)?)?;
                Ok(RawBytes::default())
            }
            Some(Method::Voucher) => {
                let voucher = Self::voucher(rt, decode_params(params)?)?;
                encode_return(&voucher)
            }
            Some(Method::Ls) => {
                let channels = Self::ls(rt, decode_params(params)?)?;
                encode_return(&channels)
            }
            None => Err(missing_export(BuiltinActor::PaymentBroker, method)),
        }
    }

    /// Opens a channel funded with the message value. The channel id is the
    /// sequence of the originating message.
    fn create_channel<RT: Runtime>(
        rt: &mut RT,
        params: CreateChannelParams,
    ) -> Result<ChannelId, ActorError> {
        let payer = rt.message().from;
        let amount = rt.message().value.clone();
        if amount <= TokenAmount::zero() {
            return Err(actor_error!(ErrIllegalArgument; "channel must be funded"));
        }
        if params.eol <= rt.curr_epoch() {
            return Err(actor_error!(ErrIllegalArgument;
                "eol {} is not in the future (epoch {})", params.eol, rt.curr_epoch()));
        }

        let chid = rt.origin_sequence();
        let mut st: State = rt.state()?;
        if st.get_channel(rt.store(), &payer, chid)?.is_some() {
            return Err(actor_error!(ErrDuplicateChannel;
                "payer {} already has channel {}", payer, chid));
        }
        st.put_channel(
            rt.store(),
            &payer,
            chid,
            PaymentChannel {
                target: params.target,
                amount,
                amount_redeemed: TokenAmount::zero(),
                eol: params.eol,
            },
        )?;
        rt.write_state(&st)?;
        Ok(chid)
    }

    /// Redeems a voucher before the channel's end of life.
    fn update<RT: Runtime>(rt: &mut RT, params: UpdateChannelParams) -> Result<(), ActorError> {
        let mut st: State = rt.state()?;
        let mut channel = load_channel(rt, &st, &params.payer, params.chid)?;
        if rt.curr_epoch() >= channel.eol {
            return Err(actor_error!(ErrExpired;
                "channel {} expired at {}", params.chid, channel.eol));
        }
        let payout = redeem(rt, &mut channel, &params)?;
        let target = channel.target;
        st.put_channel(rt.store(), &params.payer, params.chid, channel)?;
        rt.write_state(&st)?;
        pay(rt, target, payout)
    }

    /// Redeems a voucher and, once the channel reached its end of life, returns
    /// the rest to the payer and removes the channel.
    fn close<RT: Runtime>(rt: &mut RT, params: UpdateChannelParams) -> Result<(), ActorError> {
        let mut st: State = rt.state()?;
        let mut channel = load_channel(rt, &st, &params.payer, params.chid)?;
        let payout = redeem(rt, &mut channel, &params)?;
        let target = channel.target;
        let refund = if rt.curr_epoch() >= channel.eol {
            let refund = channel.remaining();
            st.delete_channel(rt.store(), &params.payer, params.chid)?;
            refund
        } else {
            st.put_channel(rt.store(), &params.payer, params.chid, channel)?;
            TokenAmount::zero()
        };
        rt.write_state(&st)?;
        pay(rt, target, payout)?;
        pay(rt, params.payer, refund)
    }

    /// Adds the message value to a channel and moves its end of life.
    fn extend<RT: Runtime>(rt: &mut RT, params: ExtendParams) -> Result<(), ActorError> {
        let payer = rt.message().from;
        let value = rt.message().value.clone();
        let mut st: State = rt.state()?;
        let mut channel = load_channel(rt, &st, &payer, params.chid)?;
        if params.eol < channel.eol {
            return Err(actor_error!(ErrIllegalArgument;
                "cannot move eol of channel {} back from {} to {}", params.chid, channel.eol, params.eol));
        }
        channel.amount += value;
        channel.eol = params.eol;
        st.put_channel(rt.store(), &payer, params.chid, channel)?;
        rt.write_state(&st)
    }

    /// Returns what was not redeemed to the payer once the channel expired.
    fn reclaim<RT: Runtime>(rt: &mut RT, params: ReclaimParams) -> Result<(), ActorError> {
        let payer = rt.message().from;
        let mut st: State = rt.state()?;
        let channel = load_channel(rt, &st, &payer, params.chid)?;
        if rt.curr_epoch() < channel.eol {
            return Err(actor_error!(ErrNotExpired;
                "channel {} cannot be reclaimed before {}", params.chid, channel.eol));
        }
        st.delete_channel(rt.store(), &payer, params.chid)?;
        rt.write_state(&st)?;
        pay(rt, payer, channel.remaining())
    }

    /// Builds the unsigned voucher the payer hands to the target.
    fn voucher<RT: Runtime>(rt: &mut RT, params: VoucherParams) -> Result<PaymentVoucher, ActorError> {
        let payer = rt.message().from;
        let st: State = rt.state()?;
        let channel = load_channel(rt, &st, &payer, params.chid)?;
        if params.amount > channel.amount {
            return Err(actor_error!(ErrInsufficientFunds;
                "voucher amount {} exceeds channel amount {}", params.amount, channel.amount));
        }
        Ok(PaymentVoucher {
            channel: params.chid,
            payer,
            target: channel.target,
            amount: params.amount,
        })
    }

    fn ls<RT: Runtime>(rt: &mut RT, params: LsParams) -> Result<Vec<ChannelInfo>, ActorError> {
        let st: State = rt.state()?;
        Ok(st.channels_of(rt.store(), &params.payer)?)
    }
}

fn load_channel<RT: Runtime>(
    rt: &RT,
    st: &State,
    payer: &Address,
    chid: ChannelId,
) -> Result<PaymentChannel, ActorError> {
    st.get_channel(rt.store(), payer, chid)?.ok_or_else(
        || actor_error!(ErrChannelNotFound; "payer {} has no channel {}", payer, chid),
    )
}

/// Checks a voucher against the channel and marks it redeemed. Returns the
/// amount owed to the target.
fn redeem<RT: Runtime>(
    rt: &RT,
    channel: &mut PaymentChannel,
    params: &UpdateChannelParams,
) -> Result<TokenAmount, ActorError> {
    let caller = rt.message().from;
    if caller != channel.target {
        return Err(actor_error!(ErrWrongTarget;
            "{} is not the target of channel {}", caller, params.chid));
    }
    if params.amount <= channel.amount_redeemed {
        return Err(actor_error!(ErrAlreadyWithdrawn;
            "voucher amount {} is not above redeemed {}", params.amount, channel.amount_redeemed));
    }
    if params.amount > channel.amount {
        return Err(actor_error!(ErrInsufficientFunds;
            "voucher amount {} exceeds channel amount {}", params.amount, channel.amount));
    }
    verify_voucher(rt, channel, params)?;

    let payout = &params.amount - &channel.amount_redeemed;
    channel.amount_redeemed = params.amount.clone();
    Ok(payout)
}

fn verify_voucher<RT: Runtime>(
    rt: &RT,
    channel: &PaymentChannel,
    params: &UpdateChannelParams,
) -> Result<(), ActorError> {
    let voucher = PaymentVoucher {
        channel: params.chid,
        payer: params.payer,
        target: channel.target,
        amount: params.amount.clone(),
    };
    let bytes = voucher.signing_bytes()?;
    verify(rt, &params.signature, &params.payer, &bytes)
}

fn verify<RT: Runtime>(
    rt: &RT,
    signature: &Signature,
    signer: &Address,
    bytes: &[u8],
) -> Result<(), ActorError> {
    rt.verify_signature(signature, signer, bytes)
        .map_err(|e| actor_error!(ErrUnauthorized; "invalid voucher signature: {}", e))
}

fn pay<RT: Runtime>(rt: &mut RT, to: Address, amount: TokenAmount) -> Result<(), ActorError> {
    if amount.is_zero() {
        return Ok(());
    }
    rt.send(to, METHOD_SEND, amount, RawBytes::default())?;
    Ok(())
}
