// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod chain_store;
mod errors;
mod tip_index;

pub use self::chain_store::*;
pub use self::errors::*;
pub use self::tip_index::*;
