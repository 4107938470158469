// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_ipld_encoding::strict_bytes;
use fvm_ipld_encoding::tuple::*;
use serde::{Deserialize, Serialize};

/// The output from running a VRF proof.
#[derive(Clone, Debug, PartialEq, Eq, Ord, PartialOrd, Default, Serialize, Deserialize, Hash)]
pub struct VRFProof(#[serde(with = "strict_bytes")] pub Vec<u8>);

impl VRFProof {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns reference to underlying proof bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A Ticket is a marker of a tick of the blockchain's clock. It is the source
/// of randomness for leader election, fixes the canonical order of blocks inside
/// a tipset and breaks fork-choice ties. Tickets compare lexicographically.
#[derive(
    Clone, Debug, PartialEq, Eq, Default, Serialize_tuple, Deserialize_tuple, Hash, PartialOrd, Ord,
)]
pub struct Ticket {
    pub vrfproof: VRFProof,
}

impl Ticket {
    pub fn new(vrfproof: VRFProof) -> Self {
        Self { vrfproof }
    }

    pub fn is_empty(&self) -> bool {
        self.vrfproof.0.is_empty()
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for Ticket {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        let fmt_str = format!("===={}=====", u64::arbitrary(g));
        Self::new(VRFProof::new(fmt_str.into_bytes()))
    }
}
