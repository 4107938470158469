// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod block;
mod header;
mod ticket;
mod tipset;

pub use block::{Block, block_messages};
pub use header::{BlockHeader, HeaderBuilder, RawBlockHeader};
pub use ticket::{Ticket, VRFProof};
pub use tipset::{CreateTipsetError, FullTipset, Tipset, TipsetKey};
