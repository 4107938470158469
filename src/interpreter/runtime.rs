// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ActorError, Fault, vm};
use crate::message::{Message, MethodNum};
use crate::shim::{address::Address, clock::ChainEpoch, crypto::Signature, econ::TokenAmount};
use crate::state_tree::{EMPTY_STATE, EMPTY_STATE_BYTES, StateTree};
use crate::utils::cid::cbor_bytes_cid;
use anyhow::Context as _;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::RawBytes;
use serde::{Serialize, de::DeserializeOwned};

/// Maximum nesting of actor-to-actor sends.
pub const MAX_CALL_DEPTH: u32 = 64;

/// Facts shared by every call made on behalf of one top-level message.
#[derive(Clone, Debug)]
pub struct CallContext {
    pub epoch: ChainEpoch,
    /// Sender of the top-level message.
    pub origin: Address,
    /// Sequence of the top-level message.
    pub origin_sequence: u64,
    pub depth: u32,
}

impl CallContext {
    pub fn new(epoch: ChainEpoch, origin: Address, origin_sequence: u64) -> Self {
        Self {
            epoch,
            origin,
            origin_sequence,
            depth: 0,
        }
    }

    fn nested(&self) -> Result<Self, Fault> {
        let depth = self.depth + 1;
        if depth > MAX_CALL_DEPTH {
            return Err(Fault::CallDepthExceeded(MAX_CALL_DEPTH));
        }
        Ok(Self {
            depth,
            ..self.clone()
        })
    }
}

/// Context handed to actor code for the duration of one invocation.
///
/// A method finishes either by returning its bytes, or by reverting with an
/// [`ActorError::Revert`]; exactly one of the two decides the receipt.
pub trait Runtime {
    type Store: Blockstore;

    /// The invocation being executed: `from` is the immediate caller, `to` the
    /// actor running.
    fn message(&self) -> &Message;

    fn curr_epoch(&self) -> ChainEpoch;

    /// Sender of the top-level message.
    fn origin(&self) -> &Address;

    /// Sequence of the top-level message.
    fn origin_sequence(&self) -> u64;

    /// Raw bytes of the running actor's private storage.
    fn read_storage(&self) -> Result<Vec<u8>, ActorError>;

    /// Replaces the running actor's private storage. Persisted immediately, so
    /// nested sends observe it.
    fn write_storage(&mut self, bytes: &[u8]) -> Result<(), ActorError>;

    fn current_balance(&self) -> Result<TokenAmount, ActorError>;

    fn send(
        &mut self,
        to: Address,
        method: MethodNum,
        value: TokenAmount,
        params: RawBytes,
    ) -> Result<RawBytes, ActorError>;

    fn store(&self) -> &Self::Store;

    fn verify_signature(
        &self,
        signature: &Signature,
        signer: &Address,
        plaintext: &[u8],
    ) -> Result<(), String> {
        signature.verify(plaintext, signer)
    }

    /// Decodes the running actor's storage.
    fn state<T: DeserializeOwned>(&self) -> Result<T, ActorError> {
        let bytes = self.read_storage()?;
        fvm_ipld_encoding::from_slice(&bytes).map_err(ActorError::serialization)
    }

    /// Encodes `state` into the running actor's storage.
    fn write_state<T: Serialize>(&mut self, state: &T) -> Result<(), ActorError> {
        let bytes = fvm_ipld_encoding::to_vec(state).map_err(ActorError::serialization)?;
        self.write_storage(&bytes)
    }
}

/// [`Runtime`] over a mutable [`StateTree`].
pub struct DefaultRuntime<'st, S> {
    state: &'st mut StateTree<S>,
    message: Message,
    context: CallContext,
}

impl<'st, S> DefaultRuntime<'st, S>
where
    S: Blockstore,
{
    pub fn new(state: &'st mut StateTree<S>, message: Message, context: CallContext) -> Self {
        Self {
            state,
            message,
            context,
        }
    }
}

impl<S> Runtime for DefaultRuntime<'_, S>
where
    S: Blockstore,
{
    type Store = S;

    fn message(&self) -> &Message {
        &self.message
    }

    fn curr_epoch(&self) -> ChainEpoch {
        self.context.epoch
    }

    fn origin(&self) -> &Address {
        &self.context.origin
    }

    fn origin_sequence(&self) -> u64 {
        self.context.origin_sequence
    }

    fn read_storage(&self) -> Result<Vec<u8>, ActorError> {
        let actor = self.state.get_required_actor(&self.message.to)?;
        if actor.state == *EMPTY_STATE {
            return Ok(EMPTY_STATE_BYTES.to_vec());
        }
        let bytes = self
            .state
            .store()
            .get(&actor.state)?
            .with_context(|| format!("storage {} of actor {} not found", actor.state, self.message.to))?;
        Ok(bytes)
    }

    fn write_storage(&mut self, bytes: &[u8]) -> Result<(), ActorError> {
        let cid = cbor_bytes_cid(bytes);
        self.state.store().put_keyed(&cid, bytes)?;
        self.state.mutate_actor(&self.message.to, |actor| {
            actor.state = cid;
            Ok(())
        })?;
        Ok(())
    }

    fn current_balance(&self) -> Result<TokenAmount, ActorError> {
        Ok(self.state.get_required_actor(&self.message.to)?.balance)
    }

    fn send(
        &mut self,
        to: Address,
        method: MethodNum,
        value: TokenAmount,
        params: RawBytes,
    ) -> Result<RawBytes, ActorError> {
        let receiver = self.message.to;
        if to == receiver {
            return Err(Fault::SelfSend(receiver).into());
        }
        let context = self.context.nested()?;
        let message = Message::call(receiver, to, 0, value, method, params);
        vm::send(self.state, &message, &context)
    }

    fn store(&self) -> &S {
        self.state.store()
    }
}
