// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::Path;

use anyhow::Context as _;

/// Converts a TOML file represented as a string to `S`
pub fn read_toml<S>(toml_string: &str) -> anyhow::Result<S>
where
    for<'de> S: serde::de::Deserialize<'de>,
{
    let new_struct: S = toml::from_str(toml_string)?;
    Ok(new_struct)
}

/// Reads and parses the TOML file at `path`.
pub fn read_toml_file<S>(path: &Path) -> anyhow::Result<S>
where
    for<'de> S: serde::de::Deserialize<'de>,
{
    let toml = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    read_toml(&toml).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Named {
        name: String,
    }

    #[test]
    fn reads_toml() {
        let named: Named = read_toml("name = \"ec\"\n").unwrap();
        assert_eq!(named.name, "ec");
        assert!(read_toml::<Named>("name = 1").is_err());
    }
}
