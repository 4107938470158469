// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Built-in actor VM: applies messages to a [`crate::state_tree::StateTree`].
//!
//! Failures come in two kinds. A revert ([`ActorError::Revert`]) is a
//! caller-correctable business-rule failure that ends up as a nonzero
//! [`ExitCode`] in the message [`Receipt`]. A [`Fault`] is a VM invariant
//! violation that aborts the whole message batch.

mod errors;
mod exit_code;
mod receipt;
mod runtime;
mod vm;

pub(crate) use self::errors::actor_error;
pub use self::errors::{ActorError, Fault};
pub use self::exit_code::{ExitCode, FIRST_ACTOR_EXIT_CODE};
pub use self::receipt::Receipt;
pub use self::runtime::{CallContext, DefaultRuntime, MAX_CALL_DEPTH, Runtime};
pub use self::vm::{ApplyRet, VM, send, transfer};
