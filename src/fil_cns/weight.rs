// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::actors::power;
use crate::blocks::Tipset;
use crate::chain::Weight;
use crate::state_tree::StateTree;
use fvm_ipld_blockstore::Blockstore;
use num::{BigInt, BigRational};
use num_traits::Zero as _;

/// Expected Consensus weight parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcParams {
    /// Weight every block adds regardless of its miner.
    pub ecv: u64,
    /// Weight a miner holding all the power would add on top of `ecv`.
    pub ecprm: u64,
}

impl Default for EcParams {
    fn default() -> Self {
        Self { ecv: 10, ecprm: 100 }
    }
}

/// Weight `tipset` adds on top of its parent:
/// `Σ (ECV + ECPrM · power(miner) / total_power)` over its blocks, with power
/// read from `parent_state`. No power term is added while the total is zero.
pub fn weight_delta<S: Blockstore>(
    parent_state: &StateTree<S>,
    tipset: &Tipset,
    params: &EcParams,
) -> anyhow::Result<Weight> {
    let table = power::load_state(parent_state)?;
    let total: BigInt = table.total_power.clone();
    let ecv = BigRational::from_integer(BigInt::from(params.ecv));

    let mut delta = Weight::zero();
    for header in tipset.blocks() {
        delta += &ecv;
        if total.is_zero() {
            continue;
        }
        let power: BigInt = table.miner_power(parent_state.store(), &header.miner_address)?;
        delta += BigRational::new(BigInt::from(params.ecprm) * power, total.clone());
    }
    Ok(delta)
}
