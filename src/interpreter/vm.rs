// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ActorError, CallContext, DefaultRuntime, ExitCode, Fault, Receipt, actor_error};
use crate::actors::{ACCOUNT_ACTOR_CODE_ID, BuiltinActor};
use crate::message::{METHOD_SEND, Message};
use crate::shim::{
    address::{Address, Protocol},
    clock::ChainEpoch,
    econ::TokenAmount,
};
use crate::state_tree::{ActorState, EMPTY_STATE, StateTree};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::RawBytes;
use num_traits::Zero as _;
use tracing::{debug, warn};

/// Outcome of applying one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyRet {
    pub msg_receipt: Receipt,
    /// Reason of a revert, for logs and diagnostics.
    pub act_error: Option<String>,
}

impl ApplyRet {
    fn reverted(exit_code: ExitCode, msg: String) -> Self {
        Self {
            msg_receipt: Receipt::failed(exit_code),
            act_error: Some(msg),
        }
    }
}

/// Interpreter which applies messages to a state tree.
pub struct VM<S> {
    state: StateTree<S>,
    epoch: ChainEpoch,
}

impl<S> VM<S>
where
    S: Blockstore,
{
    pub fn new(root: &Cid, store: S, epoch: ChainEpoch) -> anyhow::Result<Self> {
        Ok(Self {
            state: StateTree::new_from_root(store, root)?,
            epoch,
        })
    }

    /// Flush stores in VM and return state root.
    pub fn flush(&mut self) -> anyhow::Result<Cid> {
        self.state.flush()
    }

    pub fn state(&self) -> &StateTree<S> {
        &self.state
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.epoch
    }

    /// Applies a message on top of the current state.
    ///
    /// Sender validation failures and reverts produce a receipt with a nonzero
    /// exit code. A [`Fault`] leaves the tree in an unspecified state and must
    /// abort whatever batch the message belongs to.
    #[tracing::instrument(level = "trace", skip_all, fields(from = %msg.from, to = %msg.to, seq = msg.sequence))]
    pub fn apply_message(&mut self, msg: &Message) -> Result<ApplyRet, Fault> {
        let Some(from_act) = self.state.get_actor(&msg.from)? else {
            return Ok(ApplyRet::reverted(
                ExitCode::SysErrSenderInvalid,
                format!("sender {} does not exist", msg.from),
            ));
        };
        if from_act.code != *ACCOUNT_ACTOR_CODE_ID {
            return Ok(ApplyRet::reverted(
                ExitCode::SysErrSenderInvalid,
                "send not from account actor".into(),
            ));
        }
        if msg.sequence != from_act.sequence {
            return Ok(ApplyRet::reverted(
                ExitCode::SysErrSenderStateInvalid,
                format!(
                    "actor sequence invalid: {} != {}",
                    msg.sequence, from_act.sequence
                ),
            ));
        }
        self.state.mutate_actor(&msg.from, |act| {
            act.sequence += 1;
            Ok(())
        })?;

        let context = CallContext::new(self.epoch, msg.from, msg.sequence);
        match send(&mut self.state, msg, &context) {
            Ok(return_data) => Ok(ApplyRet {
                msg_receipt: Receipt::ok(return_data),
                act_error: None,
            }),
            Err(ActorError::Revert {
                exit_code,
                msg: reason,
                data,
            }) => {
                debug!(
                    "[from={}, to={}, seq={}, m={}] reverted with {exit_code}: {reason}",
                    msg.from, msg.to, msg.sequence, msg.method_num
                );
                Ok(ApplyRet {
                    msg_receipt: Receipt {
                        exit_code,
                        return_data: data,
                    },
                    act_error: Some(reason),
                })
            }
            Err(ActorError::Fault(fault)) => {
                warn!(
                    "[from={}, to={}, seq={}, m={}, h={}] fault: {fault}",
                    msg.from, msg.to, msg.sequence, msg.method_num, self.epoch
                );
                Err(fault)
            }
        }
    }
}

/// Sends `msg` from its `from` actor: moves the value, then invokes the
/// receiver's method.
///
/// The value transfer stands even when the method reverts; only the method's
/// own writes are discarded.
pub fn send<S: Blockstore>(
    state: &mut StateTree<S>,
    msg: &Message,
    context: &CallContext,
) -> Result<RawBytes, ActorError> {
    if msg.value < TokenAmount::zero() {
        return Err(actor_error!(SysErrNegativeValue;
            "attempted to transfer negative value {}", msg.value));
    }
    let from_act = state.get_required_actor(&msg.from)?;
    if from_act.balance < msg.value {
        return Err(actor_error!(SysErrInsufficientBalance;
            "sender balance {} is lower than transferred value {}", from_act.balance, msg.value));
    }

    let to_act = match state.get_actor(&msg.to)? {
        Some(act) => act,
        None if msg.method_num == METHOD_SEND && is_key_address(&msg.to) => {
            let act = ActorState::new(
                *ACCOUNT_ACTOR_CODE_ID,
                *EMPTY_STATE,
                TokenAmount::zero(),
                0,
            );
            state.set_actor(&msg.to, act.clone());
            act
        }
        None => {
            return Err(actor_error!(SysErrInvalidReceiver;
                "receiver {} does not exist", msg.to));
        }
    };

    transfer(state, &msg.from, &msg.to, &msg.value)?;

    if msg.method_num == METHOD_SEND {
        return Ok(RawBytes::default());
    }

    let actor = BuiltinActor::from_code(&to_act.code).ok_or(Fault::NoSuchActorCode {
        address: msg.to,
        code: to_act.code,
    })?;

    state.snapshot();
    let result = {
        let mut rt = DefaultRuntime::new(state, msg.clone(), context.clone());
        actor.invoke(&mut rt, msg.method_num, &msg.params)
    };
    match result {
        Ok(ret) => {
            state.clear_snapshot()?;
            Ok(ret)
        }
        Err(err) => {
            state.revert_to_snapshot()?;
            Err(match err {
                ActorError::Revert {
                    exit_code: ExitCode::Ok,
                    msg,
                    ..
                } => actor_error!(SysErrIllegalActor; "actor reverted with exit code 0: {}", msg),
                other => other,
            })
        }
    }
}

/// Moves `value` between two existing actors.
pub fn transfer<S: Blockstore>(
    state: &mut StateTree<S>,
    from: &Address,
    to: &Address,
    value: &TokenAmount,
) -> Result<(), ActorError> {
    if from == to || value.is_zero() {
        return Ok(());
    }
    if value < &TokenAmount::zero() {
        return Err(actor_error!(SysErrNegativeValue;
            "attempted to transfer negative value {}", value));
    }
    let mut f = state.get_required_actor(from)?;
    let mut t = state.get_required_actor(to)?;
    f.deduct_funds(value).map_err(|e| {
        actor_error!(SysErrInsufficientBalance;
            "transfer failed when deducting funds ({}): {}", value, e)
    })?;
    t.deposit_funds(value);
    state.set_actor(from, f);
    state.set_actor(to, t);
    Ok(())
}

fn is_key_address(addr: &Address) -> bool {
    matches!(addr.protocol(), Protocol::Secp256k1 | Protocol::BLS)
}
