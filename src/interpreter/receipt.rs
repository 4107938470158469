// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::ExitCode;
use cid::Cid;
use fvm_ipld_amt::Amt;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::RawBytes;
use fvm_ipld_encoding::tuple::*;

/// Result of a message execution on the VM.
#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Receipt {
    pub exit_code: ExitCode,
    pub return_data: RawBytes,
}

impl Receipt {
    pub fn ok(return_data: RawBytes) -> Self {
        Self {
            exit_code: ExitCode::Ok,
            return_data,
        }
    }

    pub fn failed(exit_code: ExitCode) -> Self {
        Self {
            exit_code,
            return_data: RawBytes::default(),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn return_data(&self) -> &RawBytes {
        &self.return_data
    }

    pub fn return_size(&self) -> usize {
        self.return_data.len()
    }

    /// Persists `receipts` as an AMT and returns its root.
    pub fn root_of(store: &impl Blockstore, receipts: &[Receipt]) -> anyhow::Result<Cid> {
        Ok(Amt::new_from_iter(store, receipts.iter().cloned())?)
    }

    /// Loads every receipt of the AMT at `root`, in order.
    pub fn load_all(store: &impl Blockstore, root: &Cid) -> anyhow::Result<Vec<Receipt>> {
        let amt = Amt::<Receipt, _>::load(root, store)?;
        let mut receipts = Vec::with_capacity(amt.count() as usize);
        for i in 0..amt.count() {
            if let Some(receipt) = amt.get(i)? {
                receipts.push(receipt.clone());
            }
        }
        Ok(receipts)
    }

    /// Loads the receipt at index `i` of the AMT at `root`.
    pub fn get(store: &impl Blockstore, root: &Cid, i: u64) -> anyhow::Result<Option<Receipt>> {
        let amt = Amt::<Receipt, _>::load(root, store)?;
        Ok(amt.get(i)?.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDB;

    #[test]
    fn receipts_amt() {
        let db = MemoryDB::default();
        let receipts = vec![
            Receipt::ok(RawBytes::new(vec![1, 2, 3])),
            Receipt::failed(ExitCode::ErrExpired),
        ];
        let root = Receipt::root_of(&db, &receipts).unwrap();
        assert_eq!(Receipt::load_all(&db, &root).unwrap(), receipts);
        assert_eq!(Receipt::get(&db, &root, 1).unwrap(), Some(receipts[1].clone()));
        assert_eq!(Receipt::get(&db, &root, 2).unwrap(), None);
        assert_eq!(receipts[0].return_size(), 3);
    }
}
