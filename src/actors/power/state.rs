// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::shim::{
    address::Address,
    bigint::{BigInt, bigint_ser},
};
use crate::state_tree::HAMT_BIT_WIDTH;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_hamt::{BytesKey, Hamt};
use num_traits::Zero as _;

/// Storage power, in bytes.
pub type StoragePower = BigInt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Claim {
    #[serde(with = "bigint_ser")]
    pub power: StoragePower,
}

/// Power table: the sum of all claims and the claims themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct State {
    #[serde(with = "bigint_ser")]
    pub total_power: StoragePower,
    pub miner_count: u64,
    /// HAMT address → [`Claim`]. Only miners with nonzero power have an entry.
    pub miners: Cid,
}

impl State {
    pub fn new<BS: Blockstore>(store: &BS) -> anyhow::Result<Self> {
        let mut miners: Hamt<_, Claim> = Hamt::new_with_bit_width(store, HAMT_BIT_WIDTH);
        Ok(Self {
            total_power: StoragePower::zero(),
            miner_count: 0,
            miners: miners.flush()?,
        })
    }

    pub fn miner_power<BS: Blockstore>(
        &self,
        store: &BS,
        miner: &Address,
    ) -> anyhow::Result<StoragePower> {
        let miners: Hamt<_, Claim> =
            Hamt::load_with_bit_width(&self.miners, store, HAMT_BIT_WIDTH)?;
        Ok(miners
            .get(&BytesKey::from(miner.to_bytes()))?
            .map(|claim| claim.power.clone())
            .unwrap_or_default())
    }

    /// Replaces the power of `miner`, keeping the total and the miner count in
    /// step. Zero power removes the claim.
    pub fn set_miner_power<BS: Blockstore>(
        &mut self,
        store: &BS,
        miner: &Address,
        power: StoragePower,
    ) -> anyhow::Result<()> {
        let mut miners: Hamt<_, Claim> =
            Hamt::load_with_bit_width(&self.miners, store, HAMT_BIT_WIDTH)?;
        let key = BytesKey::from(miner.to_bytes());
        let old = match miners.get(&key)? {
            Some(claim) => claim.power.clone(),
            None => StoragePower::zero(),
        };
        if power.is_zero() {
            if miners.delete(&key)?.is_some() {
                self.miner_count -= 1;
            }
        } else if miners.set(key, Claim { power: power.clone() })?.is_none() {
            self.miner_count += 1;
        }
        self.total_power = &self.total_power - old + power;
        self.miners = miners.flush()?;
        Ok(())
    }

    /// Miners with nonzero power, in address byte order.
    pub fn active_miners<BS: Blockstore>(&self, store: &BS) -> anyhow::Result<Vec<Address>> {
        let miners: Hamt<_, Claim> =
            Hamt::load_with_bit_width(&self.miners, store, HAMT_BIT_WIDTH)?;
        let mut out = vec![];
        miners.for_each(|k, _| {
            out.push(Address::from_bytes(k)?);
            Ok(())
        })?;
        out.sort_by_key(|addr| addr.to_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDB;

    #[test]
    fn power_table_accounting() {
        let db = MemoryDB::default();
        let mut st = State::new(&db).unwrap();
        let (a, b) = (Address::new_id(1000), Address::new_id(1001));

        st.set_miner_power(&db, &a, 10.into()).unwrap();
        st.set_miner_power(&db, &b, 30.into()).unwrap();
        assert_eq!(st.total_power, 40.into());
        assert_eq!(st.miner_count, 2);
        assert_eq!(st.active_miners(&db).unwrap(), vec![a, b]);

        st.set_miner_power(&db, &a, 5.into()).unwrap();
        assert_eq!(st.total_power, 35.into());
        assert_eq!(st.miner_power(&db, &a).unwrap(), 5.into());

        st.set_miner_power(&db, &b, 0.into()).unwrap();
        assert_eq!(st.miner_count, 1);
        assert_eq!(st.total_power, 5.into());
        assert_eq!(st.miner_power(&db, &b).unwrap(), StoragePower::zero());
        assert_eq!(st.active_miners(&db).unwrap(), vec![a]);
    }
}
