//! Spigot faucet
//!
//! A rate-limited native currency faucet:
//! - Fixed amount per request, with a per-address delay and hourly cap
//! - Two-step ownership and an owner-controlled pause switch
//! - Snapshot and distribution history persisted in sled
//! - HTTP API with Prometheus metrics

pub mod api;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod network;
pub mod service;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FaucetConfig;
pub use database::{DistributionRecord, FaucetDatabase, FaucetStatistics};
pub use error::{FaucetError, FaucetResult};
pub use events::FaucetEvent;
pub use ledger::{InMemoryLedger, Ledger};
pub use metrics::FaucetMetrics;
pub use network::{NetworkConfig, NetworkProfile};
pub use service::{FaucetService, FaucetStatus, Receipt, RequesterView};
pub use state::{DeployParams, FaucetState, RateLimits};
