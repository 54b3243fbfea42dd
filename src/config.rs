use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

fn default_state_refresh_interval() -> u64 {
    1800
}

fn default_state_scan_timeout() -> u64 {
    60
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_update_interval_seconds() -> u64 {
    30
}

fn default_log_level() -> String {
    "INFO".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: String,
    #[serde(default)]
    pub rpcs: Vec<String>,
    #[serde(default)]
    pub rests: Vec<String>,
    #[serde(default)]
    pub whitelist_clients: Vec<String>,
    #[serde(default)]
    pub blacklist_clients: Vec<String>,
    #[serde(default)]
    pub whitelist_connections: Vec<String>,
    #[serde(default)]
    pub blacklist_connections: Vec<String>,
    #[serde(default)]
    pub whitelist_channels: Vec<String>,
    #[serde(default)]
    pub blacklist_channels: Vec<String>,
    #[serde(default = "default_state_refresh_interval")]
    pub state_refresh_interval: u64,
    #[serde(default = "default_state_scan_timeout")]
    pub state_scan_timeout: u64,
    #[serde(default)]
    pub home_chain: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_update_interval_seconds")]
    pub update_interval_seconds: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            address: default_address(),
            port: default_port(),
            update_interval_seconds: default_update_interval_seconds(),
            log_level: default_log_level(),
        }
    }
}

/// Per-channel sequence exclusions. Input supports bare integers and
/// inclusive `"a-b"` ranges; both expand to the same flat set.
#[derive(Debug, Clone, Default)]
pub struct ExcludedSequences {
    map: HashMap<String, HashSet<u64>>,
}

impl ExcludedSequences {
    fn from_raw(raw: HashMap<String, Vec<toml::Value>>) -> Result<Self> {
        let mut map = HashMap::new();
        for (channel, seqs) in raw {
            let mut set = HashSet::new();
            for s in seqs {
                match s {
                    toml::Value::Integer(n) => {
                        set.insert(n as u64);
                    }
                    toml::Value::String(s) if s.contains('-') => {
                        let (start, end) = s
                            .split_once('-')
                            .with_context(|| format!("malformed range {s:?}"))?;
                        let start: u64 = start
                            .trim()
                            .parse()
                            .with_context(|| format!("malformed range start in {s:?}"))?;
                        let end: u64 = end
                            .trim()
                            .parse()
                            .with_context(|| format!("malformed range end in {s:?}"))?;
                        if start <= end {
                            set.extend(start..=end);
                        }
                    }
                    toml::Value::String(s) => {
                        let n: u64 = s
                            .trim()
                            .parse()
                            .with_context(|| format!("malformed sequence {s:?}"))?;
                        set.insert(n);
                    }
                    other => bail!("unsupported excluded_sequences entry: {other:?}"),
                }
            }
            map.insert(channel, set);
        }
        Ok(ExcludedSequences { map })
    }

    pub fn is_excluded(&self, channel_id: &str, seq: u64) -> bool {
        self.map
            .get(channel_id)
            .map(|set| set.contains(&seq))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chains: Vec<ChainConfig>,
    pub excluded_sequences: ExcludedSequences,
    pub exporter: ExporterConfig,
}

impl Config {
    pub fn home_chain(&self) -> &ChainConfig {
        self.chains
            .iter()
            .find(|c| c.home_chain)
            .expect("validated at load time: exactly one home chain")
    }

    pub fn counterparty_chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter().filter(|c| !c.home_chain)
    }

    fn validate(&self) -> Result<()> {
        let home_count = self.chains.iter().filter(|c| c.home_chain).count();
        if home_count != 1 {
            bail!(
                "exactly one chain must be marked home_chain = true (found {})",
                home_count
            );
        }
        let home = self.home_chain();
        if home.rests.is_empty() {
            bail!(
                "no REST endpoints configured for home chain {}",
                home.chain_id
            );
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    chains: Vec<ChainConfig>,
    #[serde(default)]
    excluded_sequences: HashMap<String, Vec<toml::Value>>,
    #[serde(default)]
    exporter: ExporterConfig,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let text =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config file {path:?}"))?;
    let raw: RawConfig = toml::from_str(&text).context("failed to parse TOML config")?;
    let cfg = Config {
        chains: raw.chains,
        excluded_sequences: ExcludedSequences::from_raw(raw.excluded_sequences)?,
        exporter: raw.exporter,
    };
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn rejects_zero_home_chains() {
        let f = write_temp(
            r#"
            [[chains]]
            name = "osmosis"
            chain_id = "osmosis-1"
            rests = ["https://osmosis.example"]
            "#,
        );
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("exactly one chain"));
    }

    #[test]
    fn rejects_multiple_home_chains() {
        let f = write_temp(
            r#"
            [[chains]]
            name = "osmosis"
            chain_id = "osmosis-1"
            rests = ["https://osmosis.example"]
            home_chain = true

            [[chains]]
            name = "cosmoshub"
            chain_id = "cosmoshub-4"
            rests = ["https://cosmoshub.example"]
            home_chain = true
            "#,
        );
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("exactly one chain"));
    }

    #[test]
    fn rejects_home_chain_without_rest_urls() {
        let f = write_temp(
            r#"
            [[chains]]
            name = "osmosis"
            chain_id = "osmosis-1"
            home_chain = true
            "#,
        );
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("no REST endpoints"));
    }

    #[test]
    fn accepts_valid_config_and_applies_defaults() {
        let f = write_temp(
            r#"
            [[chains]]
            name = "osmosis"
            chain_id = "osmosis-1"
            rests = ["https://osmosis.example"]
            home_chain = true

            [[chains]]
            name = "cosmoshub"
            chain_id = "cosmoshub-4"
            rests = ["https://cosmoshub.example"]

            [excluded_sequences]
            channel-42 = [7, "12-15", 19]
            "#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.home_chain().chain_id, "osmosis-1");
        assert_eq!(cfg.counterparty_chains().count(), 1);
        assert_eq!(cfg.home_chain().state_refresh_interval, 1800);
        assert_eq!(cfg.exporter.port, 8000);
        assert!(cfg.excluded_sequences.is_excluded("channel-42", 7));
        assert!(cfg.excluded_sequences.is_excluded("channel-42", 12));
        assert!(cfg.excluded_sequences.is_excluded("channel-42", 15));
        assert!(cfg.excluded_sequences.is_excluded("channel-42", 19));
        assert!(!cfg.excluded_sequences.is_excluded("channel-42", 16));
        assert!(!cfg.excluded_sequences.is_excluded("channel-1", 7));
    }
}
