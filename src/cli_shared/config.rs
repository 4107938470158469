// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::Path;

use crate::chain::DEFAULT_HEAD_EVENT_CAPACITY;
use crate::chain_sync::SyncConfig;
use crate::fil_cns::EcParams;
use crate::utils::io::{read_toml, read_toml_file};
use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Consensus and chain store parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Weight every block adds regardless of its miner.
    pub ecv: u64,
    /// Scale of the power share term in the weight of a block.
    pub ecprm: u64,
    /// Bound of the head change channel.
    pub head_event_capacity: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        let params = EcParams::default();
        Self {
            ecv: params.ecv,
            ecprm: params.ecprm,
            head_event_capacity: DEFAULT_HEAD_EVENT_CAPACITY,
        }
    }
}

impl ChainConfig {
    pub fn ec_params(&self) -> EcParams {
        EcParams {
            ecv: self.ecv,
            ecprm: self.ecprm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `tracing` filter directives, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

/// Node configuration. Every section and field falls back to its default
/// when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chain: ChainConfig,
    pub sync: SyncConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn from_toml(toml: &str) -> anyhow::Result<Self> {
        let config: Self = read_toml(toml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config: Self = read_toml_file(path)?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Rejects values the chain cannot run with. Every block must add a
    /// positive weight, and the head change channel needs room for one event.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.chain.ecv > 0, "chain.ecv must be positive");
        anyhow::ensure!(
            self.chain.head_event_capacity > 0,
            "chain.head_event_capacity must be positive"
        );
        Ok(())
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;

    #[test]
    fn empty_config_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.chain.ec_params(), EcParams { ecv: 10, ecprm: 100 });
        assert_eq!(config.chain.head_event_capacity, 200);
        assert_eq!(config.sync.fetch_depth, 900);
        assert_eq!(config.sync.fetch_timeout().as_secs(), 5);
        assert_eq!(config.sync.bad_block_cache_size.get(), 1 << 15);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [chain]
            ecprm = 250

            [sync]
            fetch_timeout_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.chain.ecprm, 250);
        assert_eq!(config.chain.ecv, 10);
        assert_eq!(config.sync.fetch_timeout_ms, 100);
        assert_eq!(config.sync.fetch_depth, 900);
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_toml("[sync]\nbad_block_cache_size = 0\n").is_err());
        assert!(Config::from_toml("[chain]\necv = \"ten\"\n").is_err());
    }

    #[test]
    fn zero_ecv_is_rejected() {
        let err = Config::from_toml("[chain]\necv = 0\n").unwrap_err();
        assert_eq!(err.to_string(), "chain.ecv must be positive");
        assert!(Config::from_toml("[chain]\nhead_event_capacity = 0\n").is_err());
        assert!(Config::from_toml("[chain]\necv = 1\necprm = 0\n").is_ok());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[chain]\necv = 0\n").unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn file_round_trip() {
        let config = Config {
            log: LogConfig {
                filter: "debug,forest_ec::chain_sync=trace".into(),
            },
            ..Default::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();
        assert_eq!(Config::from_file(file.path()).unwrap(), config);

        assert!(Config::from_file(file.path().with_extension("missing")).is_err());
    }
}
