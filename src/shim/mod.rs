// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod address {
    pub use fvm_shared4::address::{Address, Error, Protocol};
}

pub mod bigint {
    pub use fvm_shared4::bigint::{BigInt, bigint_ser};
}

pub mod clock {
    pub use fvm_shared4::clock::ChainEpoch;
}

pub mod econ {
    pub use fvm_shared4::econ::TokenAmount;
}

pub mod crypto {
    pub use fvm_shared4::crypto::signature::{Signature, SignatureType};

}
