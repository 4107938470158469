// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::blocks::CreateTipsetError;
use thiserror::Error;

/// Chain error
#[derive(Debug, Error)]
pub enum Error {
    /// The first head of a chain must be a single genesis block.
    #[error("Invalid genesis: expected a single block tipset, got {0} blocks")]
    InvalidGenesis(usize),
    /// Tipset contains invalid data, as described by the string parameter.
    #[error("Invalid tipset: {0}")]
    InvalidTipset(String),
    /// Key was not found
    #[error("Invalid key: {0}")]
    NotFound(String),
    #[error("No head has been set")]
    NoHead,
    #[error("Chain walk cancelled")]
    Cancelled,
    /// Error originating from the underlying stores or encoding
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<CreateTipsetError> for Error {
    fn from(e: CreateTipsetError) -> Self {
        Error::InvalidTipset(e.to_string())
    }
}
