//! External account balances credited by the faucet.

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use spigot_common::Address;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Accounts outside the faucet that receive dispensed and retrieved funds.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Adds `amount` to `account`.
    async fn credit(&self, account: &Address, amount: u128) -> FaucetResult<()>;

    /// Takes `amount` from `account`; fails with
    /// [`FaucetError::InsufficientFunds`] if the account holds less.
    async fn debit(&self, account: &Address, amount: u128) -> FaucetResult<()>;

    /// Current balance of `account`.
    async fn balance_of(&self, account: &Address) -> u128;
}

/// In-process ledger used by the standalone binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: RwLock<HashMap<Address, u128>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-seeded with balances.
    pub fn with_balances(balances: impl IntoIterator<Item = (Address, u128)>) -> Self {
        Self {
            balances: RwLock::new(balances.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn credit(&self, account: &Address, amount: u128) -> FaucetResult<()> {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(*account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| FaucetError::Ledger(format!("balance overflow for {}", account)))?;
        debug!("Credited {} wei to {}", amount, account);
        Ok(())
    }

    async fn debit(&self, account: &Address, amount: u128) -> FaucetResult<()> {
        let mut balances = self.balances.write().await;
        let balance = balances.get(account).copied().unwrap_or(0);
        let remaining = balance.checked_sub(amount).ok_or_else(|| {
            FaucetError::InsufficientFunds(format!(
                "{} holds {} wei, {} wei required",
                account, balance, amount
            ))
        })?;
        balances.insert(*account, remaining);
        debug!("Debited {} wei from {}", amount, account);
        Ok(())
    }

    async fn balance_of(&self, account: &Address) -> u128 {
        self.balances.read().await.get(account).copied().unwrap_or(0)
    }
}
