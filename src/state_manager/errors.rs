// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::chain;
use crate::interpreter::Fault;
use cid::Cid;
use thiserror::Error;

/// State manager error
#[derive(Debug, Error)]
pub enum Error {
    /// The parents of a tipset are absent or unknown. The caller may fetch
    /// further ancestors and retry.
    #[error("Invalid base: {0}")]
    InvalidBase(String),
    #[error("Block {block} declares state root {declared} but execution produced {computed}")]
    StateRootMismatch {
        block: Cid,
        declared: Cid,
        computed: Cid,
    },
    #[error("Block {block} declares receipts root {declared} but execution produced {computed}")]
    ReceiptsMismatch {
        block: Cid,
        declared: Cid,
        computed: Cid,
    },
    /// Error from VM execution
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error(transparent)]
    ChainStore(#[from] chain::Error),
    #[error("Wait for message cancelled")]
    Cancelled,
    /// Other state manager error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// The block whose declared results disagree with execution, if that is
    /// what went wrong.
    pub fn mismatched_block(&self) -> Option<Cid> {
        match self {
            Self::StateRootMismatch { block, .. } | Self::ReceiptsMismatch { block, .. } => {
                Some(*block)
            }
            _ => None,
        }
    }
}
