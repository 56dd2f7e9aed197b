//! Shared primitives for the Spigot faucet workspace.

pub mod types;
pub mod utils;

pub use types::{Address, AddressError, ADDRESS_LENGTH};
