//! Configuration management for the USDCx bridge service
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Network presets fill in contract addresses and endpoints that are not set
//! explicitly.

use crate::bridge::amount::MAX_DECIMALS;

use anyhow::{Context, Result};
use bigdecimal::{BigDecimal, Zero};
use ethers::types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bridge: BridgeConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Testnet,
    Mainnet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub network: Network,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_minimum_amount")]
    pub minimum_amount: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
    #[serde(default)]
    pub max_fee: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub chain_id: Option<u64>,
    pub rpc_urls: Vec<String>,
    pub usdc_address: Option<String>,
    pub reserve_address: Option<String>,
    pub confirmation_blocks: Option<u64>,
    #[serde(default = "default_gas_price_strategy")]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_max_send_retries")]
    pub max_send_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    pub explorer_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub api_url: Option<String>,
    pub protocol_contract: Option<String>,
    pub remote_domain: Option<u32>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    pub api_key: Option<String>,
    pub explorer_url: Option<String>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            protocol_contract: None,
            remote_domain: None,
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            api_key: None,
            explorer_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: default_private_key_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_journal_url")]
    pub url: String,
    #[serde(default = "default_journal_connections")]
    pub max_connections: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_journal_url(),
            max_connections: default_journal_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Built-in addresses and endpoints for a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPreset {
    pub chain_id: u64,
    pub usdc: &'static str,
    pub reserve: &'static str,
    pub protocol_contract: &'static str,
    pub remote_domain: u32,
    pub api_url: &'static str,
    pub source_explorer: &'static str,
    pub destination_explorer: &'static str,
}

impl Network {
    pub fn preset(&self) -> NetworkPreset {
        match self {
            Network::Testnet => NetworkPreset {
                chain_id: 11155111,
                usdc: "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238",
                reserve: "0x008888878f94C0d87defdf0B07f46B93C1934442",
                protocol_contract: "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM.usdcx-v1",
                remote_domain: 10003,
                api_url: "https://api.testnet.hiro.so",
                source_explorer: "https://sepolia.etherscan.io",
                destination_explorer: "https://explorer.hiro.so/txid/{tx}?chain=testnet",
            },
            Network::Mainnet => NetworkPreset {
                chain_id: 1,
                usdc: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                reserve: "0x8888888199b2Df864bf678259607d6D5EBb4e3Ce",
                protocol_contract: "SP120SBRBQJ00MCWS7TM5R8WJNTTKD5K0HFRC2CNE.usdcx-v1",
                remote_domain: 10003,
                api_url: "https://api.hiro.so",
                source_explorer: "https://etherscan.io",
                destination_explorer: "https://explorer.hiro.so/txid/{tx}?chain=mainnet",
            },
        }
    }
}

/// Network parameters after presets and overrides are merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNetwork {
    pub chain_id: u64,
    pub usdc: Address,
    pub reserve: Address,
    pub protocol_contract: String,
    pub remote_domain: u32,
    pub api_url: String,
    pub source_explorer: String,
    pub destination_explorer: String,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.source.rpc_urls.iter().all(|url| url.trim().is_empty()) {
            anyhow::bail!("Source chain has no RPC URLs configured");
        }

        if self.bridge.max_poll_attempts == 0 {
            anyhow::bail!("bridge.max_poll_attempts must be at least 1");
        }

        if self.bridge.token_decimals > MAX_DECIMALS {
            anyhow::bail!(
                "bridge.token_decimals must be at most {}, got {}",
                MAX_DECIMALS,
                self.bridge.token_decimals
            );
        }

        if self.destination.page_size == 0 || self.destination.page_size > 50 {
            anyhow::bail!(
                "destination.page_size must be between 1 and 50, got {}",
                self.destination.page_size
            );
        }

        self.minimum_amount()?;
        let network = self.network()?;

        if network.chain_id != self.bridge.network.preset().chain_id {
            tracing::warn!(
                "Source chain id {} does not match the {:?} preset",
                network.chain_id,
                self.bridge.network
            );
        }

        Ok(())
    }

    /// Merge the network preset with explicit overrides
    pub fn network(&self) -> Result<ResolvedNetwork> {
        let preset = self.bridge.network.preset();

        let usdc = parse_address(
            "source.usdc_address",
            self.source.usdc_address.as_deref().unwrap_or(preset.usdc),
        )?;
        let reserve = parse_address(
            "source.reserve_address",
            self.source.reserve_address.as_deref().unwrap_or(preset.reserve),
        )?;

        Ok(ResolvedNetwork {
            chain_id: self.source.chain_id.unwrap_or(preset.chain_id),
            usdc,
            reserve,
            protocol_contract: self
                .destination
                .protocol_contract
                .clone()
                .unwrap_or_else(|| preset.protocol_contract.to_string()),
            remote_domain: self.destination.remote_domain.unwrap_or(preset.remote_domain),
            api_url: self
                .destination
                .api_url
                .clone()
                .unwrap_or_else(|| preset.api_url.to_string()),
            source_explorer: self
                .source
                .explorer_url
                .clone()
                .unwrap_or_else(|| preset.source_explorer.to_string()),
            destination_explorer: self
                .destination
                .explorer_url
                .clone()
                .unwrap_or_else(|| preset.destination_explorer.to_string()),
        })
    }

    /// Minimum transfer amount in whole tokens
    pub fn minimum_amount(&self) -> Result<BigDecimal> {
        let minimum = BigDecimal::from_str(self.bridge.minimum_amount.trim())
            .with_context(|| format!("Invalid minimum amount: {}", self.bridge.minimum_amount))?;
        if minimum <= BigDecimal::zero() {
            anyhow::bail!("bridge.minimum_amount must be positive");
        }
        Ok(minimum)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.bridge.poll_interval_secs)
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    Address::from_str(value.trim()).with_context(|| format!("Invalid {}: {}", field, value))
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid regex");
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_max_poll_attempts() -> u32 {
    60
}

fn default_minimum_amount() -> String {
    "1.0".to_string()
}

fn default_token_decimals() -> u32 {
    6
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_gas_price_strategy() -> GasPriceStrategy {
    GasPriceStrategy::Eip1559
}

fn default_max_gas_price_gwei() -> u64 {
    200
}

fn default_receipt_timeout_secs() -> u64 {
    300
}

fn default_receipt_poll_interval_ms() -> u64 {
    2_000
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_max_send_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_page_size() -> u32 {
    50
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_private_key_env() -> String {
    "BRIDGE_PRIVATE_KEY".to_string()
}

fn default_journal_url() -> String {
    "sqlite://bridge.db?mode=rwc".to_string()
}

fn default_journal_connections() -> u32 {
    4
}

#[cfg(test)]
const TEST_CONFIG: &str = r#"
[bridge]
network = "testnet"

[source]
rpc_urls = ["https://rpc.sepolia.example"]

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090
"#;
