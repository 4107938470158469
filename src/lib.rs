// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Consensus-critical core of an Expected Consensus chain: the tipset data model and
//! fork choice, memoized per-tipset state computation and the built-in actor VM.

pub mod actors;
pub mod blocks;
pub mod chain;
pub mod chain_sync;
pub mod cli_shared;
pub mod db;
pub mod fil_cns;
pub mod genesis;
pub mod interpreter;
pub mod message;
pub mod shim;
pub mod state_manager;
pub mod state_tree;
#[cfg(test)]
mod test_utils;
pub mod utils;
