//! Faucet configuration

use crate::error::{FaucetError, FaucetResult};
use crate::network::{NetworkConfig, NetworkProfile};
use crate::state::{DeployParams, DEFAULT_MAX_TX_PER_HOUR, DEFAULT_TIME_LIMIT_SECS};
use serde::{Deserialize, Serialize};
use spigot_common::utils::config::load_config;
use spigot_common::utils::converter::parse_ether;
use spigot_common::utils::logging::LoggingConfig;
use spigot_common::Address;
use std::collections::BTreeMap;
use std::path::Path;

/// Faucet service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// Database path
    pub db_path: String,

    /// Deployer / initial owner address
    pub owner: Option<String>,

    /// Initial cap on dispenses per requester per hour
    pub max_tx_per_hour: u32,

    /// Initial minimum delay between dispenses to one requester (seconds)
    pub time_limit_secs: u64,

    /// Amount to dispense per request (ether units, e.g. "0.1")
    pub disburse_amount: String,

    /// Funds moved into the faucet right after deployment (ether units)
    pub initial_funding: Option<String>,

    /// Global API quota (requests per second, all callers)
    pub api_requests_per_second: u32,

    /// Signed API calls are accepted this long before and after `issued_at`
    pub signature_max_age_secs: u64,

    /// Opening balances of the in-process ledger (address -> ether units)
    pub ledger_balances: BTreeMap<String, String>,

    /// Distribution history older than this is pruned
    pub history_retention_days: u64,

    /// Network preset name (test, development, local, production)
    pub network_profile: Option<String>,

    /// Base domain for the production preset
    pub main_uri: Option<String>,

    /// Enable metrics
    pub metrics_enabled: bool,

    /// Enable CORS
    pub cors_enabled: bool,

    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3000".to_string(),
            db_path: "./faucet_data".to_string(),
            owner: None,
            max_tx_per_hour: DEFAULT_MAX_TX_PER_HOUR,
            time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            disburse_amount: "0.1".to_string(),
            initial_funding: None,
            api_requests_per_second: 50,
            signature_max_age_secs: 300,
            ledger_balances: BTreeMap::new(),
            history_retention_days: 30,
            network_profile: None,
            main_uri: None,
            metrics_enabled: true,
            cors_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl FaucetConfig {
    /// Load from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load from a config file, then let environment variables override it
    pub fn load<P: AsRef<Path>>(path: P) -> FaucetResult<Self> {
        let mut config: FaucetConfig =
            load_config(path).map_err(|e| FaucetError::Config(format!("{:#}", e)))?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("FAUCET_SERVER_ADDR") {
            self.server_addr = addr;
        }

        if let Ok(db_path) = std::env::var("FAUCET_DB_PATH") {
            self.db_path = db_path;
        }

        if let Ok(owner) = std::env::var("FAUCET_OWNER") {
            self.owner = Some(owner);
        }

        if let Ok(max_tx) = std::env::var("FAUCET_MAX_TX_PER_HOUR") {
            self.max_tx_per_hour = max_tx.parse().unwrap_or(self.max_tx_per_hour);
        }

        if let Ok(limit) = std::env::var("FAUCET_TIME_LIMIT") {
            self.time_limit_secs = limit.parse().unwrap_or(self.time_limit_secs);
        }

        if let Ok(amount) = std::env::var("FAUCET_DISBURSE_AMOUNT") {
            self.disburse_amount = amount;
        }

        if let Ok(funding) = std::env::var("FAUCET_INITIAL_FUNDING") {
            self.initial_funding = Some(funding);
        }

        if let Ok(rps) = std::env::var("FAUCET_API_RPS") {
            self.api_requests_per_second = rps.parse().unwrap_or(self.api_requests_per_second);
        }

        if let Ok(age) = std::env::var("FAUCET_SIGNATURE_MAX_AGE") {
            self.signature_max_age_secs = age.parse().unwrap_or(self.signature_max_age_secs);
        }

        if let Ok(profile) = std::env::var("NODE_ENV") {
            self.network_profile = Some(profile);
        }

        if let Ok(uri) = std::env::var("MAIN_URI") {
            self.main_uri = Some(uri);
        }
    }

    /// Parameters for a fresh deployment
    pub fn deploy_params(&self) -> FaucetResult<DeployParams> {
        let disburse_amount = parse_ether(&self.disburse_amount)
            .map_err(|e| FaucetError::InvalidAmount(format!("{}: {:#}", self.disburse_amount, e)))?;

        Ok(DeployParams {
            max_tx_per_hour: self.max_tx_per_hour,
            time_limit_seconds: self.time_limit_secs,
            disburse_amount,
        })
    }

    pub fn owner_address(&self) -> FaucetResult<Address> {
        let owner = self
            .owner
            .as_deref()
            .ok_or_else(|| FaucetError::Config("owner address is not configured".to_string()))?;
        owner
            .parse()
            .map_err(|e| FaucetError::InvalidAddress(format!("{}: {}", owner, e)))
    }

    pub fn initial_funding_wei(&self) -> FaucetResult<Option<u128>> {
        self.initial_funding
            .as_deref()
            .map(|amount| {
                parse_ether(amount).map_err(|e| FaucetError::InvalidAmount(format!("{}: {:#}", amount, e)))
            })
            .transpose()
    }

    /// Resolved network endpoints
    pub fn network(&self) -> FaucetResult<NetworkConfig> {
        let profile = self
            .network_profile
            .as_deref()
            .map(str::parse)
            .transpose()?
            .unwrap_or(NetworkProfile::Production);
        NetworkConfig::select(profile, self.main_uri.as_deref())
    }

    /// Opening ledger balances in wei
    pub fn ledger_seed(&self) -> FaucetResult<Vec<(Address, u128)>> {
        self.ledger_balances
            .iter()
            .map(|(account, amount)| {
                let address = account
                    .parse()
                    .map_err(|e| FaucetError::InvalidAddress(format!("{}: {}", account, e)))?;
                let wei = parse_ether(amount)
                    .map_err(|e| FaucetError::InvalidAmount(format!("{}: {:#}", amount, e)))?;
                Ok((address, wei))
            })
            .collect()
    }
}
