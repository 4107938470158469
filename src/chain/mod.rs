// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod store;
mod weight;

pub use self::{store::*, weight::*};
