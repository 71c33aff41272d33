// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use anyhow::{bail, Context};
use serde_derive::Deserialize;
use tracing::{info, instrument, warn};

pub const DEFAULT_MAXCONN: usize = 10;

#[instrument(skip_all)]
pub fn read_config(config_path: &str) -> anyhow::Result<Config> {
    info!("parsing config ({})", config_path);
    let config_str = fs::read_to_string(config_path).context("reading config toml")?;
    let config: Config = toml::from_str(&config_str).context("parsing config file")?;
    Ok(config)
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub global: Global,

    /// The named bases this server loads, `name = "<loader options>"`.
    /// When this section is absent, legacy configs declare their
    /// experiments as extra keys under `[global]`.
    pub experiments: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Global {
    /// The TCP port to listen on. Required unless the launcher
    /// passes `-S`.
    pub port: Option<u16>,

    /// Which of the three wire protocols this server speaks.
    pub protocol: Option<Protocol>,

    /// Log destination; stderr when unset.
    pub logfile: Option<String>,

    /// Where to record the daemon pid.
    pub pidfile: Option<String>,

    /// Whether to detach from the terminal at startup. Defaults
    /// to yes.
    pub daemonize: Option<Toggle>,

    /// Raise the log level and echo per-command tracing.
    pub debug: Option<bool>,

    /// Upper bound on concurrently served connections.
    pub maxconn: Option<usize>,

    /// Directory that relative data file paths in experiment
    /// declarations resolve against.
    #[serde(rename = "configDir")]
    pub config_dir: Option<String>,

    /// Unreserved keys. Legacy configs without an [experiments]
    /// section declare their bases here.
    #[serde(flatten)]
    pub legacy: BTreeMap<String, toml::Value>,
}

impl Config {
    /// The experiment declarations, falling back to unreserved
    /// `[global]` keys for old style configs. The fallback is
    /// ambiguous with future global keys, so every use of it warns.
    pub fn experiment_decls(&self) -> anyhow::Result<BTreeMap<String, String>> {
        if let Some(experiments) = &self.experiments {
            return Ok(experiments.clone());
        }
        let mut decls = BTreeMap::new();
        for (name, value) in &self.global.legacy {
            warn!("legacy config: treating [global] key '{}' as an experiment declaration", name);
            match value.as_str() {
                Some(opts) => {
                    decls.insert(name.clone(), String::from(opts));
                }
                None => bail!("experiment '{}' must be a string of loader options", name),
            }
        }
        Ok(decls)
    }

    pub fn maxconn(&self) -> usize {
        self.global.maxconn.unwrap_or(DEFAULT_MAXCONN)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Http,
    Json,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Tcp => "tcp",
            Protocol::Http => "http",
            Protocol::Json => "json",
        };
        write!(f, "{name}")
    }
}

/// A yes/no config value, kept textual to match the classic
/// config grammar.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
    Yes,
    No,
}

impl Toggle {
    pub fn is_yes(self) -> bool {
        matches!(self, Toggle::Yes)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ntest::timeout;

    #[test]
    #[timeout(30000)]
    fn parse() -> anyhow::Result<()> {
        let cases = vec![
            r#"
            [global]
            port = 7000
            "#,
            r#"
            [global]
            port = 7000
            protocol = "json"
            daemonize = "no"
            maxconn = 25

            [experiments]
            default = "-a IB1 +vdb -i tree.base"
            "#,
            r#"
            [global]
            port = 7000
            logfile = "/var/log/timbl.log"
            pidfile = "/run/timbl.pid"
            configDir = "/etc/timbl"
            debug = true
            "#,
        ];

        for case in cases.into_iter() {
            let _: Config = toml::from_str(case)?;
        }

        Ok(())
    }

    #[test]
    #[timeout(30000)]
    fn experiments_section_wins() -> anyhow::Result<()> {
        let config: Config = toml::from_str(
            r#"
            [global]
            port = 7000

            [experiments]
            b1 = "-f one.data"
            b2 = "-f two.data"
            "#,
        )?;
        let decls = config.experiment_decls()?;
        assert_eq!(decls.len(), 2);
        assert_eq!(decls.get("b1").map(String::as_str), Some("-f one.data"));
        Ok(())
    }

    #[test]
    #[timeout(30000)]
    fn legacy_globals_become_experiments() -> anyhow::Result<()> {
        let config: Config = toml::from_str(
            r#"
            [global]
            port = 7000
            protocol = "tcp"
            default = "-f some.data +vdb"
            "#,
        )?;
        assert!(config.experiments.is_none());
        let decls = config.experiment_decls()?;
        assert_eq!(decls.len(), 1);
        assert_eq!(decls.get("default").map(String::as_str), Some("-f some.data +vdb"));
        Ok(())
    }

    #[test]
    #[timeout(30000)]
    fn non_string_legacy_experiment_is_an_error() -> anyhow::Result<()> {
        let config: Config = toml::from_str(
            r#"
            [global]
            port = 7000
            broken = 12
            "#,
        )?;
        assert!(config.experiment_decls().is_err());
        Ok(())
    }
}
