/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;

use model::options::Options;

/// Environment variables prefixed `STRATUS_` override the config file,
/// e.g. `STRATUS_DEFAULT_BANDWIDTH=2000`.
const ENV_PREFIX: &str = "STRATUS_";

/// Load service options: defaults, then the TOML file if present, then
/// environment overrides.
pub fn load_options(path: Option<&Path>) -> eyre::Result<Options> {
    let mut figment = Figment::from(Serialized::defaults(Options::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    let options: Options = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_when_no_file() {
        let options = load_options(None).unwrap();
        assert_eq!(options.default_bandwidth, 1000);
        assert_eq!(options.global_mac_prefix, "00:22");
        assert!(options.dns_server.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "default_bandwidth = 2500\ndns_domain = \"cloud.example\""
        )
        .unwrap();
        let options = load_options(Some(file.path())).unwrap();
        assert_eq!(options.default_bandwidth, 2500);
        assert_eq!(options.dns_domain.as_deref(), Some("cloud.example"));
        // Untouched keys keep their defaults.
        assert_eq!(options.global_mac_prefix, "00:22");
    }
}
