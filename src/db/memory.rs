// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::SettingsStore;
use ahash::HashMap;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use parking_lot::RwLock;

/// In-memory block and settings store.
#[derive(Debug, Default)]
pub struct MemoryDB {
    blockchain_db: RwLock<HashMap<Cid, Vec<u8>>>,
    settings_db: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDB {
    /// Number of blocks held by the store.
    pub fn block_count(&self) -> usize {
        self.blockchain_db.read().len()
    }
}

impl SettingsStore for MemoryDB {
    fn read_bin(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.settings_db.read().get(key).cloned())
    }

    fn write_bin(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.settings_db
            .write()
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.settings_db.read().contains_key(key))
    }
}

impl Blockstore for MemoryDB {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.blockchain_db.read().get(k).cloned())
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> anyhow::Result<()> {
        self.blockchain_db.write().insert(*k, block.to_vec());
        Ok(())
    }

    fn has(&self, k: &Cid) -> anyhow::Result<bool> {
        Ok(self.blockchain_db.read().contains_key(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::db::CborStoreExt;
    use fvm_ipld_encoding::CborStore;

    #[test]
    fn identical_content_shares_one_entry() {
        let db = MemoryDB::default();
        let a = db.put_cbor_default(&(1u8, "x")).unwrap();
        let b = db.put_cbor_default(&(1u8, "x")).unwrap();
        assert_eq!(a, b);
        assert_eq!(db.block_count(), 1);
        assert!(db.has(&a).unwrap());
        assert_eq!(db.get_cbor::<(u8, String)>(&a).unwrap(), Some((1, "x".to_owned())));
    }
}
