// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod config;
pub mod logger;

pub use self::config::Config;
pub use self::logger::setup_logger;
