// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use num::BigRational;

/// Cumulative chain weight. Kept exact so that fork choice never depends on
/// rounding.
pub type Weight = BigRational;
