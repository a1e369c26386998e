//! Configuration loading and validation.
//!
//! Config is layered the way the original connector's `config` section works:
//! a config file (TOML/YAML/JSON, whichever extension is given to `--config`)
//! overlaid with `CONNECTOR_`-prefixed environment variables, deserialized into
//! a single frozen [`Settings`] value. Construction fails fast on a known set
//! of fatal conditions (missing RPC URL, non-positive cache sizes, unknown
//! data format), each carrying the original's `FF...` error code so
//! operators can grep logs across both implementations.

use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::errors::config_codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Map,
    FlatArray,
    SelfDescribing,
}

impl DataFormat {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "map" => Some(DataFormat::Map),
            "flat_array" => Some(DataFormat::FlatArray),
            "self_describing" => Some(DataFormat::SelfDescribing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainSettings {
    /// Newer-revision alias for the node endpoint; preferred over `connector.url`
    /// when both are present.
    pub rpc: Option<String>,
    #[serde(default = "default_network")]
    pub network: String,
    pub signatory: Option<String>,
}

fn default_network() -> String {
    "mainnet".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsSettings {
    #[serde(default = "default_checkpoint_block_gap")]
    pub checkpoint_block_gap: i64,
    #[serde(default = "default_catchup_page_size")]
    pub catchup_page_size: usize,
    #[serde(default = "default_catchup_threshold")]
    pub catchup_threshold: usize,
    #[serde(default = "default_true")]
    pub block_timestamps: bool,
    #[serde(default = "default_one_second")]
    pub filter_polling_interval: Duration,
}

fn default_checkpoint_block_gap() -> i64 {
    50
}
fn default_catchup_page_size() -> usize {
    500
}
fn default_catchup_threshold() -> usize {
    500
}
fn default_true() -> bool {
    true
}
fn default_one_second() -> Duration {
    Duration::from_secs(1)
}

impl Default for EventsSettings {
    fn default() -> Self {
        Self {
            checkpoint_block_gap: default_checkpoint_block_gap(),
            catchup_page_size: default_catchup_page_size(),
            catchup_threshold: default_catchup_threshold(),
            block_timestamps: default_true(),
            filter_polling_interval: default_one_second(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_initial_delay")]
    pub initial_delay: Duration,
    #[serde(default = "default_retry_max_delay")]
    pub max_delay: Duration,
    #[serde(default = "default_retry_factor")]
    pub factor: f64,
}

fn default_retry_initial_delay() -> Duration {
    Duration::from_millis(100)
}
fn default_retry_max_delay() -> Duration {
    Duration::from_secs(30)
}
fn default_retry_factor() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay: default_retry_initial_delay(),
            max_delay: default_retry_max_delay(),
            factor: default_retry_factor(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorSettings {
    /// Legacy node endpoint key, kept for backwards compatibility with the
    /// first revision's `connector.url`.
    pub url: Option<String>,
    pub blockchain: Option<BlockchainSettings>,
    #[serde(default = "default_one_second")]
    pub block_polling_interval: Duration,
    #[serde(default = "default_cache_size")]
    pub block_cache_size: i64,
    #[serde(default = "default_cache_size")]
    pub tx_cache_size: i64,
    #[serde(default = "default_data_format")]
    pub data_format: String,
    #[serde(default = "default_gas_estimation_factor")]
    pub gas_estimation_factor: f64,
    /// Upper bound on the simulated fee a prepared operation may carry, in
    /// mutez. Not named as a config key in the framework's own documentation,
    /// but its existence is required by the simulate/limit step - exposed here
    /// rather than hardcoded so operators can tune it per network.
    #[serde(default = "default_max_fee")]
    pub max_fee: i64,
    #[serde(default)]
    pub events: EventsSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_cache_size() -> i64 {
    250
}
fn default_data_format() -> String {
    "map".to_string()
}
fn default_gas_estimation_factor() -> f64 {
    1.5
}
fn default_max_fee() -> i64 {
    1_000_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub connector: ConnectorSettings,
}

/// A [`Settings`] that has passed [`Settings::validate`] - RPC URL resolved,
/// cache sizes positive, data format recognised, catchup threshold clamped.
#[derive(Debug, Clone)]
pub struct ValidatedSettings {
    pub rpc_url: String,
    pub network: String,
    pub signatory_url: Option<String>,
    pub block_polling_interval: Duration,
    pub block_cache_size: usize,
    pub tx_cache_size: usize,
    pub data_format: DataFormat,
    pub gas_estimation_factor: f64,
    pub max_fee: i64,
    pub events: EventsSettings,
    pub retry: RetrySettings,
}

impl Settings {
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        builder = builder.add_source(
            Environment::with_prefix("CONNECTOR")
                .separator("__")
                .try_parsing(true),
        );
        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validates the fatal-construction conditions documented above, returning
    /// a [`ValidatedSettings`] that downstream components can rely on without
    /// re-checking invariants.
    pub fn validate(self) -> anyhow::Result<ValidatedSettings> {
        let c = self.connector;

        let using_new_surface = c.blockchain.is_some();
        let rpc_url = c
            .blockchain
            .as_ref()
            .and_then(|b| b.rpc.clone())
            .or(c.url)
            .ok_or_else(|| {
                if using_new_surface {
                    anyhow::anyhow!(
                        "{}: missing required configuration connector.blockchain.rpc",
                        config_codes::MISSING_RPC_URL
                    )
                } else {
                    anyhow::anyhow!(
                        "{}: missing required configuration connector.url",
                        config_codes::MISSING_RPC_URL_LEGACY
                    )
                }
            })?;

        if c.block_cache_size <= 0 || c.tx_cache_size <= 0 {
            anyhow::bail!(
                "{}: blockCacheSize and txCacheSize must be positive (got block={}, tx={})",
                config_codes::INVALID_CACHE_SIZE,
                c.block_cache_size,
                c.tx_cache_size
            );
        }

        let data_format = DataFormat::parse(&c.data_format).ok_or_else(|| {
            anyhow::anyhow!(
                "{}: invalid dataFormat '{}' (expected map, flat_array, or self_describing)",
                config_codes::INVALID_DATA_FORMAT,
                c.data_format
            )
        })?;

        let mut events = c.events;
        if events.catchup_threshold < events.catchup_page_size {
            tracing::warn!(
                "events.catchupThreshold ({}) is lower than events.catchupPageSize ({}), raising it to match",
                events.catchup_threshold,
                events.catchup_page_size
            );
            events.catchup_threshold = events.catchup_page_size;
        }

        let network = c
            .blockchain
            .as_ref()
            .map(|b| b.network.clone())
            .unwrap_or_else(default_network);
        let signatory_url = c.blockchain.as_ref().and_then(|b| b.signatory.clone());

        Ok(ValidatedSettings {
            rpc_url,
            network,
            signatory_url,
            block_polling_interval: c.block_polling_interval,
            block_cache_size: c.block_cache_size as usize,
            tx_cache_size: c.tx_cache_size as usize,
            data_format,
            gas_estimation_factor: c.gas_estimation_factor,
            max_fee: c.max_fee,
            events,
            retry: c.retry,
        })
    }

    /// Renders every known configuration key as markdown, for the `docs` CLI
    /// subcommand.
    pub fn describe() -> String {
        let rows = [
            ("connector.url", "string", "URL of JSON/RPC endpoint for the Tezos node/gateway"),
            ("connector.blockchain.rpc", "string", "Alias for connector.url in later revisions"),
            ("connector.blockchain.network", "string", "Network parameters to use (default: mainnet)"),
            ("connector.blockchain.signatory", "string", "Base URL of the remote signer"),
            ("connector.dataFormat", "map,flat_array,self_describing", "Configure the JSON data format for query output and events"),
            ("connector.gasEstimationFactor", "float", "The factor to apply to the gas estimation to determine the gas limit"),
            ("connector.maxFee", "int", "Upper bound, in mutez, a simulated operation's fee may not exceed"),
            ("connector.blockCacheSize", "int", "Maximum of blocks to hold in the block info cache"),
            ("connector.txCacheSize", "int", "Maximum of transactions to hold in the transaction info cache"),
            ("connector.blockPollingInterval", "duration", "Interval for polling to check for new blocks"),
            ("connector.events.blockTimestamps", "bool", "Whether to include the block timestamps in the event information"),
            ("connector.events.catchupPageSize", "int", "Number of blocks to query per poll when catching up to the head of the blockchain"),
            ("connector.events.catchupThreshold", "int", "How many blocks behind the chain head a listener must be on startup, to enter catchup mode"),
            ("connector.events.checkpointBlockGap", "int", "Number of blocks at the head of the chain considered unstable after a re-org"),
            ("connector.events.filterPollingInterval", "duration", "The interval between polling calls to a filter"),
            ("connector.retry.initialDelay", "duration", "Initial delay before the first retry"),
            ("connector.retry.maxDelay", "duration", "Maximum delay between retries"),
            ("connector.retry.factor", "float", "Exponential backoff factor applied between retries"),
        ];
        let mut out = String::from("| Key | Type | Description |\n|---|---|---|\n");
        for (key, ty, desc) in rows {
            out.push_str(&format!("| `{key}` | {ty} | {desc} |\n"));
        }
        out
    }
}

/// CLI surface for the binary entrypoint: configuration path plus the
/// version/docs utility subcommands.
#[derive(Debug, Parser)]
#[command(name = "tezosconnect")]
pub struct CommandLineOptions {
    /// Path to the configuration file.
    #[arg(short = 'f', long = "config")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Print the connector version.
    Version {
        #[arg(short = 'o', long = "output", default_value = "json")]
        output: String,
        #[arg(short = 's', long = "short")]
        short: bool,
    },
    /// Print the config info as markdown.
    Docs,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> Settings {
        Settings {
            connector: ConnectorSettings {
                url: Some("https://node.example/".to_string()),
                blockchain: None,
                block_polling_interval: default_one_second(),
                block_cache_size: default_cache_size(),
                tx_cache_size: default_cache_size(),
                data_format: default_data_format(),
                gas_estimation_factor: default_gas_estimation_factor(),
                max_fee: default_max_fee(),
                events: EventsSettings::default(),
                retry: RetrySettings::default(),
            },
        }
    }

    #[test]
    fn missing_legacy_rpc_url_is_fatal_with_legacy_code() {
        let mut s = base_settings();
        s.connector.url = None;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains(config_codes::MISSING_RPC_URL_LEGACY));
    }

    #[test]
    fn missing_new_surface_rpc_url_is_fatal_with_new_code() {
        let mut s = base_settings();
        s.connector.url = None;
        s.connector.blockchain = Some(BlockchainSettings {
            rpc: None,
            network: default_network(),
            signatory: None,
        });
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains(config_codes::MISSING_RPC_URL));
        assert!(!err.to_string().contains(config_codes::MISSING_RPC_URL_LEGACY));
    }

    #[test]
    fn non_positive_cache_size_is_fatal() {
        let mut s = base_settings();
        s.connector.block_cache_size = 0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains(config_codes::INVALID_CACHE_SIZE));
    }

    #[test]
    fn invalid_data_format_is_fatal() {
        let mut s = base_settings();
        s.connector.data_format = "xml".to_string();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains(config_codes::INVALID_DATA_FORMAT));
    }

    #[test]
    fn catchup_threshold_is_raised_to_page_size() {
        let mut s = base_settings();
        s.connector.events.catchup_page_size = 500;
        s.connector.events.catchup_threshold = 10;
        let validated = s.validate().unwrap();
        assert_eq!(validated.events.catchup_threshold, 500);
    }

    #[test]
    fn blockchain_rpc_takes_precedence_over_legacy_url() {
        let mut s = base_settings();
        s.connector.blockchain = Some(BlockchainSettings {
            rpc: Some("https://newer.example/".to_string()),
            network: "ghostnet".to_string(),
            signatory: Some("https://signer.example/".to_string()),
        });
        let validated = s.validate().unwrap();
        assert_eq!(validated.rpc_url, "https://newer.example/");
        assert_eq!(validated.network, "ghostnet");
    }
}
