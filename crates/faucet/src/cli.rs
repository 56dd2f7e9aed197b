use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(name = "faucet")]
#[command(author, version, about = "Rate-limited native currency faucet", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to the database directory
    #[arg(long, value_name = "DIR")]
    pub db_path: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy a new faucet into the database
    Deploy {
        /// Owner address
        #[arg(long, env = "FAUCET_OWNER")]
        owner: Option<String>,

        #[arg(long)]
        max_tx_per_hour: Option<u32>,

        /// Minimum delay between requests of one address (seconds)
        #[arg(long)]
        time_limit: Option<u64>,

        /// Amount per request, in ether
        #[arg(long)]
        disburse_amount: Option<String>,

        /// Fund the faucet right after deployment, in ether
        #[arg(long)]
        fund: Option<String>,

        /// Replace an existing deployment
        #[arg(long)]
        force: bool,
    },

    /// Serve the HTTP API
    Serve {
        /// Server address
        #[arg(long)]
        server_addr: Option<String>,
    },

    /// Print the faucet status as JSON
    Status,
}
