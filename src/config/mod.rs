//! Configuration: TOML file with per-section defaults, secrets overlaid
//! from environment variables. Addresses stay strings here and are parsed
//! exactly once by [`Config::resolve`] into typed values.

use crate::poller::SnapshotMode;
use alloy::primitives::Address;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid address for {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("unknown snapshot mode: {0}")]
    UnknownSnapshotMode(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub chain: ChainConfig,
    #[serde(default)]
    pub venue: VenueConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
    #[serde(default)]
    pub proposals: ProposalsConfig,
    #[serde(default)]
    pub copytrade: CopyTradeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// HTTP JSON-RPC endpoint.
    #[serde(default)]
    pub rpc_url: String,
    /// The Safe being watched.
    pub safe: String,
    /// The optimistic Governor module.
    pub governor: String,
    /// Collateral token (deposits, reimbursements).
    pub collateral: String,
    /// Additional ERC-20s to watch for deposits.
    #[serde(default)]
    pub tracked_assets: Vec<String>,
    #[serde(default = "default_block_window")]
    pub block_window: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// "off" | "on_change" | "every_poll"
    #[serde(default = "default_snapshot_mode")]
    pub snapshot_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    #[serde(default = "default_venue_url")]
    pub base_url: String,
    /// L2 auth credentials - loaded from env VIGIL_VENUE_API_KEY etc.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub api_passphrase: String,
    /// Send the dead man's switch heartbeat while trading live.
    #[serde(default = "default_true")]
    pub heartbeat: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    /// Empty = relayer capability disabled.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_submission_deadline_secs")]
    pub submission_deadline_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposalsConfig {
    /// Enable live execution of ready proposals (false = simulate only).
    #[serde(default)]
    pub execute: bool,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CopyTradeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Enable live venue/chain actions (false = paper mode).
    #[serde(default)]
    pub execute: bool,
    /// Venue address whose trades are copied.
    #[serde(default)]
    pub watched_trader: String,
    /// Wallet that fronts copy trades and gets reimbursed.
    #[serde(default)]
    pub funding_wallet: String,
    /// This agent's proposer address on the Governor.
    #[serde(default)]
    pub proposer: String,
    #[serde(default = "default_copy_bps")]
    pub copy_bps: u64,
    #[serde(default = "default_submission_timeout_ms")]
    pub submission_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_block_window() -> u64 {
    10
}
fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_snapshot_mode() -> String {
    "on_change".to_string()
}
fn default_venue_url() -> String {
    "https://clob.example.com".to_string()
}
fn default_submission_deadline_secs() -> u64 {
    60
}
fn default_retry_interval_ms() -> u64 {
    30_000
}
fn default_copy_bps() -> u64 {
    9_900
}
fn default_submission_timeout_ms() -> u64 {
    45_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            base_url: default_venue_url(),
            api_key: String::new(),
            api_secret: String::new(),
            api_passphrase: String::new(),
            heartbeat: true,
        }
    }
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            submission_deadline_secs: default_submission_deadline_secs(),
        }
    }
}

impl Default for ProposalsConfig {
    fn default() -> Self {
        Self {
            execute: false,
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl Default for CopyTradeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            execute: false,
            watched_trader: String::new(),
            funding_wallet: String::new(),
            proposer: String::new(),
            copy_bps: default_copy_bps(),
            submission_timeout_ms: default_submission_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Typed values parsed out of the string config, once, at startup.
#[derive(Debug, Clone)]
pub struct ResolvedAddresses {
    pub safe: Address,
    pub governor: Address,
    pub collateral: Address,
    pub tracked_assets: Vec<Address>,
    pub funding_wallet: Option<Address>,
    pub proposer: Option<Address>,
    pub snapshot_mode: SnapshotMode,
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Missing(field));
    }
    Address::from_str(value).map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

fn parse_optional_address(
    field: &'static str,
    value: &str,
) -> Result<Option<Address>, ConfigError> {
    if value.is_empty() {
        return Ok(None);
    }
    parse_address(field, value).map(Some)
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for
    /// secrets (never stored in the file).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.overlay_env();
        Ok(config)
    }

    fn overlay_env(&mut self) {
        if let Ok(url) = std::env::var("VIGIL_RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Ok(key) = std::env::var("VIGIL_VENUE_API_KEY") {
            self.venue.api_key = key;
        }
        if let Ok(secret) = std::env::var("VIGIL_VENUE_SECRET") {
            self.venue.api_secret = secret;
        }
        if let Ok(pass) = std::env::var("VIGIL_VENUE_PASSPHRASE") {
            self.venue.api_passphrase = pass;
        }
    }

    /// Env-only config for deployments without a file. Required addresses
    /// come from VIGIL_SAFE / VIGIL_GOVERNOR / VIGIL_COLLATERAL.
    pub fn from_env() -> Self {
        let mut config = Config {
            chain: ChainConfig {
                rpc_url: String::new(),
                safe: std::env::var("VIGIL_SAFE").unwrap_or_default(),
                governor: std::env::var("VIGIL_GOVERNOR").unwrap_or_default(),
                collateral: std::env::var("VIGIL_COLLATERAL").unwrap_or_default(),
                tracked_assets: Vec::new(),
                block_window: default_block_window(),
                poll_interval_ms: default_poll_interval_ms(),
                snapshot_mode: default_snapshot_mode(),
            },
            venue: VenueConfig::default(),
            relayer: RelayerConfig::default(),
            proposals: ProposalsConfig::default(),
            copytrade: CopyTradeConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.overlay_env();
        config
    }

    pub fn has_venue_credentials(&self) -> bool {
        !self.venue.api_key.is_empty()
            && !self.venue.api_secret.is_empty()
            && !self.venue.api_passphrase.is_empty()
    }

    /// Parse every address and enum-like string into typed values.
    /// Required fields fail here; per-capability fields resolve to `None`
    /// when unset so the capability can be disabled instead of aborting.
    pub fn resolve(&self) -> Result<ResolvedAddresses, ConfigError> {
        if self.chain.rpc_url.is_empty() {
            return Err(ConfigError::Missing("chain.rpc_url"));
        }

        let snapshot_mode = match self.chain.snapshot_mode.as_str() {
            "off" => SnapshotMode::Off,
            "on_change" => SnapshotMode::OnChange,
            "every_poll" => SnapshotMode::EveryPoll,
            other => return Err(ConfigError::UnknownSnapshotMode(other.to_string())),
        };

        let mut tracked_assets = Vec::with_capacity(self.chain.tracked_assets.len() + 1);
        tracked_assets.push(parse_address("chain.collateral", &self.chain.collateral)?);
        for asset in &self.chain.tracked_assets {
            let parsed = parse_address("chain.tracked_assets", asset)?;
            if !tracked_assets.contains(&parsed) {
                tracked_assets.push(parsed);
            }
        }

        Ok(ResolvedAddresses {
            safe: parse_address("chain.safe", &self.chain.safe)?,
            governor: parse_address("chain.governor", &self.chain.governor)?,
            collateral: tracked_assets[0],
            tracked_assets,
            funding_wallet: parse_optional_address(
                "copytrade.funding_wallet",
                &self.copytrade.funding_wallet,
            )?,
            proposer: parse_optional_address("copytrade.proposer", &self.copytrade.proposer)?,
            snapshot_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [chain]
        rpc_url = "http://localhost:8545"
        safe = "0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a"
        governor = "0x6060606060606060606060606060606060606060"
        collateral = "0xcccccccccccccccccccccccccccccccccccccccc"
    "#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.chain.block_window, 10);
        assert_eq!(config.chain.poll_interval_ms, 5_000);
        assert!(config.copytrade.enabled);
        assert!(!config.copytrade.execute);
        assert_eq!(config.copytrade.copy_bps, 9_900);
        assert!(!config.has_venue_credentials());
    }

    #[test]
    fn resolve_parses_addresses_once() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.safe, Address::repeat_byte(0x5a));
        assert_eq!(resolved.collateral, Address::repeat_byte(0xcc));
        assert_eq!(resolved.tracked_assets, vec![Address::repeat_byte(0xcc)]);
        assert_eq!(resolved.funding_wallet, None);
        assert_eq!(resolved.snapshot_mode, SnapshotMode::OnChange);
    }

    #[test]
    fn bad_address_is_rejected_at_the_boundary() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.chain.safe = "not-an-address".to_string();
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::InvalidAddress { field: "chain.safe", .. })
        ));
    }
}
