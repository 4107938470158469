// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_encoding::repr::{Deserialize_repr, Serialize_repr};
use num_derive::FromPrimitive;

/// Exit code of a message invocation. Codes below [`FIRST_ACTOR_EXIT_CODE`] are
/// reserved for the VM.
#[derive(
    PartialEq, Eq, Debug, Clone, Copy, Hash, FromPrimitive, Serialize_repr, Deserialize_repr,
)]
#[repr(u64)]
pub enum ExitCode {
    Ok = 0,

    /// The sender does not exist or is not an account actor.
    SysErrSenderInvalid = 1,

    /// The message sequence does not match the sender's nonce.
    SysErrSenderStateInvalid = 2,

    /// The receiver's code has no such method.
    SysErrMissingExport = 3,

    /// The receiver does not exist and cannot be created implicitly.
    SysErrInvalidReceiver = 4,

    /// The sender's balance is lower than the transferred value.
    SysErrInsufficientBalance = 5,

    /// The transferred value is negative.
    SysErrNegativeValue = 6,

    /// Actor code aborted with a reserved exit code.
    SysErrIllegalActor = 7,

    // -------Actor Error Codes-------
    /// Indicates a method parameter is invalid.
    ErrIllegalArgument = 16,
    /// Indicates a balance of funds is insufficient.
    ErrInsufficientFunds = 19,

    // Payment broker
    ErrAlreadyWithdrawn = 32,
    ErrExpired = 33,
    ErrDuplicateChannel = 34,
    ErrWrongTarget = 35,
    ErrUnauthorized = 36,
    ErrNotExpired = 37,
    ErrChannelNotFound = 38,
}

/// First exit code actor code may abort with.
pub const FIRST_ACTOR_EXIT_CODE: u64 = 16;

impl ExitCode {
    /// returns true if the exit code was a success
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Ok)
    }

    pub fn value(self) -> u64 {
        self as u64
    }

    pub fn is_system_error(self) -> bool {
        !self.is_success() && self.value() < FIRST_ACTOR_EXIT_CODE
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.value())
    }
}
