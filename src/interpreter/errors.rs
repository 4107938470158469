// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::ExitCode;
use crate::shim::address::Address;
use cid::Cid;
use fvm_ipld_encoding::RawBytes;
use thiserror::Error;

/// VM or environment invariant violation. A fault aborts the whole message
/// batch it occurs in; it never becomes a receipt.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("no code {code} for actor at address {address}")]
    NoSuchActorCode { address: Address, code: Cid },
    #[error("actor {0} attempted to send a message to itself")]
    SelfSend(Address),
    #[error("serialization failure: {0}")]
    Serialization(String),
    #[error("maximum call depth {0} exceeded")]
    CallDepthExceeded(u32),
    #[error("state access failed: {0}")]
    State(#[from] anyhow::Error),
}

/// The error type returned by actor method calls.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Caller-correctable failure. The call's storage writes are discarded and the
    /// exit code ends up in the receipt.
    #[error("ActorError(exit_code: {exit_code}, msg: {msg})")]
    Revert {
        exit_code: ExitCode,
        msg: String,
        data: RawBytes,
    },
    #[error(transparent)]
    Fault(#[from] Fault),
}

impl ActorError {
    pub fn revert(exit_code: ExitCode, msg: impl Into<String>) -> Self {
        Self::Revert {
            exit_code,
            msg: msg.into(),
            data: RawBytes::default(),
        }
    }

    /// Attaches return data to a revert. Faults are left untouched.
    pub fn with_data(self, bytes: RawBytes) -> Self {
        match self {
            Self::Revert { exit_code, msg, .. } => Self::Revert {
                exit_code,
                msg,
                data: bytes,
            },
            fault => fault,
        }
    }

    /// Exit code of a revert, `None` for faults.
    pub fn exit_code(&self) -> Option<ExitCode> {
        match self {
            Self::Revert { exit_code, .. } => Some(*exit_code),
            Self::Fault(_) => None,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Fault::Serialization(msg.to_string()).into()
    }
}

impl From<anyhow::Error> for ActorError {
    fn from(e: anyhow::Error) -> Self {
        Fault::State(e).into()
    }
}

impl From<fvm_ipld_encoding::Error> for ActorError {
    fn from(e: fvm_ipld_encoding::Error) -> Self {
        Self::serialization(e)
    }
}

impl From<fvm_ipld_hamt::Error> for ActorError {
    fn from(e: fvm_ipld_hamt::Error) -> Self {
        Fault::State(e.into()).into()
    }
}

/// Convenience macro for generating reverts.
macro_rules! actor_error {
    // Error with only one stringable expression
    ( $code:ident; $msg:expr ) => {
        $crate::interpreter::ActorError::revert($crate::interpreter::ExitCode::$code, $msg.to_string())
    };

    // String with positional arguments
    ( $code:ident; $msg:literal $(, $ex:expr)+ ) => {
        $crate::interpreter::ActorError::revert(
            $crate::interpreter::ExitCode::$code,
            format!($msg, $($ex,)*),
        )
    };
}

pub(crate) use actor_error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_builds_reverts() {
        let err = actor_error!(ErrExpired; "channel {} expired at {}", 3, 50);
        assert_eq!(err.exit_code(), Some(ExitCode::ErrExpired));
        assert_eq!(
            err.to_string(),
            "ActorError(exit_code: ErrExpired(33), msg: channel 3 expired at 50)"
        );
        assert!(!err.is_fault());
    }

    #[test]
    fn storage_errors_are_faults() {
        let err = ActorError::from(anyhow::anyhow!("missing block"));
        assert!(err.is_fault());
        assert_eq!(err.exit_code(), None);
        assert!(
            ActorError::serialization("bad params")
                .with_data(RawBytes::new(vec![1]))
                .is_fault()
        );
    }
}
