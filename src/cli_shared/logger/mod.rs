// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use tracing_subscriber::{EnvFilter, prelude::*};

use crate::cli_shared::config::LogConfig;

/// Installs a console logger as the global subscriber. Fails if one is
/// already installed or the configured directives do not parse.
pub fn setup_logger(config: &LogConfig) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::Layer::new()
                .with_writer(std::io::stderr)
                .with_filter(get_env_filter(config)?),
        )
        .try_init()?;
    Ok(())
}

/// Returns an [`EnvFilter`] according to the `RUST_LOG` environment variable, or the
/// configured default directives.
fn get_env_filter(config: &LogConfig) -> anyhow::Result<EnvFilter> {
    use std::env::{
        self,
        VarError::{NotPresent, NotUnicode},
    };
    match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(s) => Ok(EnvFilter::new(s)),
        Err(NotPresent) => Ok(EnvFilter::try_new(&config.filter)?),
        Err(NotUnicode(_)) => Ok(EnvFilter::default()),
    }
}
