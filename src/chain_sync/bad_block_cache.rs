// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::num::NonZeroUsize;

use cid::Cid;
use hashlink::LruCache;
use nonzero_ext::nonzero;
use parking_lot::Mutex;

/// Thread-safe cache for tracking bad blocks.
/// This cache is checked before validating a block, to ensure no duplicate
/// work.
#[derive(Debug)]
pub struct BadBlockCache {
    cache: Mutex<LruCache<Cid, String>>,
}

impl Default for BadBlockCache {
    fn default() -> Self {
        Self::new(nonzero!(1usize << 15))
    }
}

impl BadBlockCache {
    pub fn new(cap: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(cap.get())),
        }
    }

    /// Puts a bad block `Cid` in the cache with a given reason.
    pub fn push(&self, c: Cid, reason: String) {
        tracing::warn!("Marked bad block: {c} ({reason})");
        self.cache.lock().insert(c, reason);
    }

    /// Returns `Some` with the reason if the block CID is in bad block cache.
    /// This function does not update the head position of the `Cid` key.
    pub fn peek(&self, c: &Cid) -> Option<String> {
        self.cache.lock().peek(c).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::cid::raw_name_cid;

    #[test]
    fn oldest_entries_are_evicted() {
        let cache = BadBlockCache::new(nonzero!(2usize));
        let (a, b, c) = (raw_name_cid("a"), raw_name_cid("b"), raw_name_cid("c"));
        cache.push(a, "bad signature".into());
        cache.push(b, "bad root".into());
        assert_eq!(cache.peek(&a).as_deref(), Some("bad signature"));
        cache.push(c, "bad ticket".into());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek(&a), None);
        assert!(cache.peek(&b).is_some());
        assert!(cache.peek(&c).is_some());
    }
}
