// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Storage market actor, reduced to the power table the consensus weight reads.

mod state;

pub use self::state::{Claim, State, StoragePower};

use super::{
    BuiltinActor, STORAGE_MARKET_ACTOR_ADDR, decode_no_params, decode_params, encode_return,
    missing_export,
};
use crate::interpreter::{ActorError, Runtime, actor_error};
use crate::message::MethodNum;
use crate::shim::{address::Address, bigint::bigint_ser};
use crate::state_tree::StateTree;
use crate::utils::db::CborStoreExt as _;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::RawBytes;
use fvm_ipld_encoding::tuple::*;
use num_derive::FromPrimitive;
use num_traits::{FromPrimitive as _, Signed as _};

/// Storage market actor methods available
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Method {
    UpdatePower = 1,
    GetTotalPower = 2,
    GetMinerPower = 3,
    ActiveMiners = 4,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct UpdatePowerParams {
    #[serde(with = "bigint_ser")]
    pub delta: StoragePower,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct MinerPowerParams {
    pub miner: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PowerReturn {
    #[serde(with = "bigint_ser")]
    pub power: StoragePower,
}

/// Loads the power table out of a state tree.
pub fn load_state<S: Blockstore>(tree: &StateTree<S>) -> anyhow::Result<State> {
    let actor = tree.get_required_actor(&STORAGE_MARKET_ACTOR_ADDR)?;
    tree.store().get_cbor_required(&actor.state)
}

/// Storage Market Actor
pub struct Actor;

impl Actor {
    pub fn invoke_method<RT: Runtime>(
        rt: &mut RT,
        method: MethodNum,
        params: &RawBytes,
    ) -> Result<RawBytes, ActorError> {
        match Method::from_u64(method) {
            Some(Method::UpdatePower) => {
                Self::update_power(rt, decode_params(params)?)?;
                Ok(RawBytes::default())
            }
            Some(Method::GetTotalPower) => {
                decode_no_params(params)?;
                let st: State = rt.state()?;
                encode_return(&PowerReturn {
                    power: st.total_power,
                })
            }
            Some(Method::GetMinerPower) => {
                let MinerPowerParams { miner } = decode_params(params)?;
                let st: State = rt.state()?;
                encode_return(&PowerReturn {
                    power: st.miner_power(rt.store(), &miner)?,
                })
            }
            Some(Method::ActiveMiners) => {
                decode_no_params(params)?;
                let st: State = rt.state()?;
                encode_return(&st.active_miners(rt.store())?)
            }
            None => Err(missing_export(BuiltinActor::StorageMarket, method)),
        }
    }

    /// Adds `delta` to the calling miner's power.
    fn update_power<RT: Runtime>(rt: &mut RT, params: UpdatePowerParams) -> Result<(), ActorError> {
        let miner = rt.message().from;
        let mut st: State = rt.state()?;
        let power = st.miner_power(rt.store(), &miner)? + &params.delta;
        if power.is_negative() {
            return Err(actor_error!(ErrIllegalArgument;
                "power of miner {} cannot become negative ({})", miner, power));
        }
        st.set_miner_power(rt.store(), &miner, power)?;
        rt.write_state(&st)
    }
}
