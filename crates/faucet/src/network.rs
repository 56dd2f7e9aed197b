//! Network endpoint presets
//!
//! Chosen by name (normally the `NODE_ENV` environment variable). The
//! production preset derives its endpoints from a base domain (`MAIN_URI`).

use crate::error::{FaucetError, FaucetResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkProfile {
    Test,
    Development,
    Local,
    Production,
}

impl FromStr for NetworkProfile {
    type Err = FaucetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "test" => Ok(NetworkProfile::Test),
            "development" => Ok(NetworkProfile::Development),
            "local" => Ok(NetworkProfile::Local),
            // anything else falls through to production, like an unset NODE_ENV
            _ => Ok(NetworkProfile::Production),
        }
    }
}

impl fmt::Display for NetworkProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkProfile::Test => "test",
            NetworkProfile::Development => "development",
            NetworkProfile::Local => "local",
            NetworkProfile::Production => "production",
        };
        f.write_str(name)
    }
}

/// Endpoints of the rollup the faucet serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub profile: NetworkProfile,
    /// L2 JSON-RPC endpoint
    pub rpc_url: String,
    /// Settlement layer endpoint
    pub eth_network_url: String,
    /// Contract verification endpoint, production only
    pub verify_url: Option<String>,
}

impl NetworkConfig {
    /// Resolves the preset for `profile`. Production requires `main_uri`.
    pub fn select(profile: NetworkProfile, main_uri: Option<&str>) -> FaucetResult<Self> {
        let (rpc_url, eth_network_url, verify_url) = match profile {
            NetworkProfile::Test => (
                "http://localhost:15100".to_string(),
                "http://127.0.0.1:15045".to_string(),
                None,
            ),
            NetworkProfile::Development => (
                "http://localhost:25100".to_string(),
                "http://localhost:25045".to_string(),
                None,
            ),
            NetworkProfile::Local => (
                "http://localhost:3050".to_string(),
                "http://localhost:8545".to_string(),
                None,
            ),
            NetworkProfile::Production => {
                let main_uri = main_uri
                    .map(str::trim)
                    .filter(|uri| !uri.is_empty())
                    .ok_or_else(|| {
                        FaucetError::Config("MAIN_URI is required for the production network".to_string())
                    })?;
                (
                    format!("https://rpc.{}", main_uri),
                    format!("https://reth.{}", main_uri),
                    Some(format!("https://l2api.{}/contract_verification", main_uri)),
                )
            }
        };

        Ok(Self {
            profile,
            rpc_url,
            eth_network_url,
            verify_url,
        })
    }
}
