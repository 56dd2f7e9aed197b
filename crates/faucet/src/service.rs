//! Faucet service core logic
//!
//! Wraps one [`FaucetState`] behind an async `RwLock` so that every mutation
//! is serialized and all-or-nothing: the operation runs on a copy, the copy
//! is persisted and the ledger credited, and only then is it swapped in.
//! Readers take the read lock and always see a fully applied state.

use crate::clock::Clock;
use crate::database::{DistributionRecord, FaucetDatabase, FaucetStatistics};
use crate::error::{FaucetError, FaucetResult};
use crate::events::{EventPublisher, FaucetEvent};
use crate::ledger::Ledger;
use crate::metrics::FaucetMetrics;
use crate::state::{DeployParams, FaucetState, RequesterQuota, RequesterRecord};
use serde::{Deserialize, Serialize};
use spigot_common::types::amount_serde;
use spigot_common::utils::converter::format_ether;
use spigot_common::Address;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Outcome of a successful call: when it executed and what it emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub timestamp: u64,
    pub event: FaucetEvent,
}

/// Faucet status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetStatus {
    pub owner: Address,
    pub pending_owner: Option<Address>,
    pub paused: bool,
    #[serde(with = "amount_serde")]
    pub balance: u128,
    pub balance_ether: String,
    #[serde(with = "amount_serde")]
    pub disburse_amount: u128,
    pub max_tx_per_hour: u32,
    pub time_limit_seconds: u64,
    pub requesters: usize,
    pub deployed_at: u64,
    pub statistics: FaucetStatistics,
}

/// What the faucet knows about one requester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequesterView {
    pub address: Address,
    pub record: Option<RequesterRecord>,
    pub quota: RequesterQuota,
}

/// Faucet service
pub struct FaucetService {
    state: RwLock<FaucetState>,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn Ledger>,
    database: Option<FaucetDatabase>,
    events: EventPublisher,
    metrics: Option<FaucetMetrics>,
}

impl FaucetService {
    /// Wrap an existing state
    pub fn new(state: FaucetState, clock: Arc<dyn Clock>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            state: RwLock::new(state),
            clock,
            ledger,
            database: None,
            events: EventPublisher::default(),
            metrics: None,
        }
    }

    /// Deploy a new in-memory faucet owned by `deployer`
    pub fn deploy(
        deployer: Address,
        params: DeployParams,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn Ledger>,
    ) -> FaucetResult<Self> {
        let state = FaucetState::deploy(deployer, params, clock.now())?;
        info!(
            "Faucet deployed: owner={}, max_tx_per_hour={}, time_limit={}s, disburse={} ETH",
            deployer,
            params.max_tx_per_hour,
            params.time_limit_seconds,
            format_ether(params.disburse_amount)
        );
        Ok(Self::new(state, clock, ledger))
    }

    /// Deploy a new faucet into `database`. Refuses to replace an existing
    /// deployment unless `overwrite` is set.
    pub fn deploy_persistent(
        database: FaucetDatabase,
        deployer: Address,
        params: DeployParams,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn Ledger>,
        overwrite: bool,
    ) -> FaucetResult<Self> {
        if database.load_state()?.is_some() {
            if !overwrite {
                return Err(FaucetError::AlreadyDeployed);
            }
            warn!("Replacing existing faucet deployment");
        }

        let mut service = Self::deploy(deployer, params, clock, ledger)?;
        database.replace_state(service.state.get_mut())?;
        Ok(service.attach_database(database))
    }

    /// Restore a previously deployed faucet from `database`
    pub fn open(
        database: FaucetDatabase,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn Ledger>,
    ) -> FaucetResult<Self> {
        let state = database.load_state()?.ok_or(FaucetError::NotDeployed)?;
        info!(
            "Loaded faucet: owner={}, balance={} ETH, {} known requesters",
            state.owner(),
            format_ether(state.balance()),
            state.requester_count()
        );
        Ok(Self::new(state, clock, ledger).attach_database(database))
    }

    fn attach_database(mut self, database: FaucetDatabase) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_metrics(mut self, metrics: FaucetMetrics) -> Self {
        metrics.set_balance(self.state.get_mut().balance());
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&FaucetMetrics> {
        self.metrics.as_ref()
    }

    /// Current reading of the injected clock
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<FaucetEvent> {
        self.events.subscribe()
    }

    // --- Calls ---

    /// Dispense `disburse_amount` to `caller`
    pub async fn request_funds(&self, caller: Address) -> FaucetResult<Receipt> {
        self.execute("requestFunds", caller, move |state, now| {
            state.request_funds(caller, now)
        })
        .await
    }

    pub async fn set_rate_limits(
        &self,
        caller: Address,
        max_tx_per_hour: u32,
        time_limit_seconds: u64,
    ) -> FaucetResult<Receipt> {
        self.execute("setRateLimits", caller, move |state, _| {
            state.set_rate_limits(caller, max_tx_per_hour, time_limit_seconds)
        })
        .await
    }

    /// Move the whole balance to the owner
    pub async fn retrieve_funds(&self, caller: Address) -> FaucetResult<Receipt> {
        self.execute("retrieveFunds", caller, move |state, _| {
            state.retrieve_funds(caller)
        })
        .await
    }

    pub async fn pause(&self, caller: Address) -> FaucetResult<Receipt> {
        self.execute("pause", caller, move |state, _| state.pause(caller))
            .await
    }

    pub async fn unpause(&self, caller: Address) -> FaucetResult<Receipt> {
        self.execute("unpause", caller, move |state, _| state.unpause(caller))
            .await
    }

    pub async fn transfer_ownership(
        &self,
        caller: Address,
        candidate: Address,
    ) -> FaucetResult<Receipt> {
        self.execute("transferOwnership", caller, move |state, _| {
            state.transfer_ownership(caller, candidate)
        })
        .await
    }

    pub async fn accept_ownership(&self, caller: Address) -> FaucetResult<Receipt> {
        self.execute("acceptOwnership", caller, move |state, _| {
            state.accept_ownership(caller)
        })
        .await
    }

    /// Move `amount` wei from the ledger account of `from` into the faucet
    pub async fn fund(&self, from: Address, amount: u128) -> FaucetResult<Receipt> {
        self.execute("fund", from, move |state, _| state.fund(from, amount))
            .await
    }

    // --- Queries ---

    /// Consistent copy of the current state
    pub async fn snapshot(&self) -> FaucetState {
        self.state.read().await.clone()
    }

    pub async fn balance(&self) -> u128 {
        self.state.read().await.balance()
    }

    pub async fn owner(&self) -> Address {
        self.state.read().await.owner()
    }

    pub async fn requester(&self, address: Address) -> RequesterView {
        let now = self.clock.now();
        let state = self.state.read().await;
        RequesterView {
            address,
            record: state.requester(&address).copied(),
            quota: state.quota(&address, now),
        }
    }

    pub async fn status(&self) -> FaucetResult<FaucetStatus> {
        let state = self.state.read().await;
        let statistics = match &self.database {
            Some(db) => db.statistics()?,
            None => FaucetStatistics::default(),
        };
        let limits = state.rate_limits();

        Ok(FaucetStatus {
            owner: state.owner(),
            pending_owner: state.pending_owner(),
            paused: state.is_paused(),
            balance: state.balance(),
            balance_ether: format_ether(state.balance()),
            disburse_amount: state.disburse_amount(),
            max_tx_per_hour: limits.max_tx_per_hour(),
            time_limit_seconds: limits.time_limit_seconds(),
            requesters: state.requester_count(),
            deployed_at: state.deployed_at(),
            statistics,
        })
    }

    /// Dispense history of `address`, newest first. Empty without a database.
    pub fn history(&self, address: &Address) -> FaucetResult<Vec<DistributionRecord>> {
        match &self.database {
            Some(db) => db.distributions_for(address),
            None => Ok(Vec::new()),
        }
    }

    /// Latest dispenses across all requesters, newest first
    pub fn recent_distributions(&self, limit: usize) -> FaucetResult<Vec<DistributionRecord>> {
        match &self.database {
            Some(db) => db.recent_distributions(limit),
            None => Ok(Vec::new()),
        }
    }

    /// Prune distribution history older than `days`
    pub fn cleanup_old_records(&self, days: u64) -> FaucetResult<usize> {
        match &self.database {
            Some(db) => db.cleanup_old_records(self.clock.now(), days),
            None => Ok(0),
        }
    }

    /// Flush the database, if any
    pub fn flush(&self) -> FaucetResult<()> {
        if let Some(db) = &self.database {
            db.flush()?;
        }
        Ok(())
    }

    // --- Internals ---

    /// Run one operation under the write lock.
    ///
    /// The operation is applied, its write set captured, and the in-memory
    /// state put back until storage and ledger have both accepted the
    /// change. A failing ledger transfer reverts the stored write set. A
    /// call touches at most the core and its caller's record, which is what
    /// a [`Checkpoint`](crate::state::Checkpoint) holds.
    async fn execute<F>(&self, operation: &'static str, caller: Address, apply: F) -> FaucetResult<Receipt>
    where
        F: FnOnce(&mut FaucetState, u64) -> FaucetResult<FaucetEvent> + Send,
    {
        let mut state = self.state.write().await;
        let now = self.clock.now();

        let before = state.checkpoint(&caller);
        let event = match apply(&mut *state, now) {
            Ok(event) => event,
            Err(e) => {
                warn!("{} by {} rejected: {}", operation, caller, e);
                self.record_rejection(&e);
                return Err(e);
            }
        };
        let after = state.checkpoint(&caller);
        state.restore(before.clone());

        let distribution = match &event {
            FaucetEvent::Dispensed { recipient, amount } => {
                Some(DistributionRecord::new(*recipient, *amount, now))
            }
            _ => None,
        };
        let touched = after.requester();
        let touched = (touched != before.requester()).then_some(touched);

        let distribution_key = match &self.database {
            Some(db) => match db.commit(after.core(), touched, distribution.as_ref()) {
                Ok(key) => key,
                Err(e) => {
                    error!("{} by {} failed to persist: {}", operation, caller, e);
                    self.record_rejection(&e);
                    return Err(e);
                }
            },
            None => None,
        };

        if let Some(transfer) = ledger_transfer(&event) {
            let result = match transfer {
                Transfer::Credit(account, amount) => self.ledger.credit(&account, amount).await,
                Transfer::Debit(account, amount) => self.ledger.debit(&account, amount).await,
            };
            if let Err(e) = result {
                error!("{} by {}: ledger transfer failed: {}", operation, caller, e);
                if let Some(db) = &self.database {
                    if let Err(revert_err) = db.revert(&before, distribution_key.as_deref()) {
                        error!("Failed to revert faucet snapshot: {}", revert_err);
                    }
                }
                self.record_rejection(&e);
                return Err(e);
            }
        }

        state.restore(after);

        if let Some(metrics) = &self.metrics {
            if let FaucetEvent::Dispensed { amount, .. } = &event {
                metrics.record_dispense(*amount);
            }
            metrics.set_balance(state.balance());
        }
        drop(state);

        log_event(&event);
        debug!("{} by {} executed at {}", operation, caller, now);
        self.events.publish(event.clone());

        Ok(Receipt {
            timestamp: now,
            event,
        })
    }

    fn record_rejection(&self, error: &FaucetError) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rejection(error.code());
        }
    }
}

enum Transfer {
    Credit(Address, u128),
    Debit(Address, u128),
}

/// Ledger movement implied by an event, if any
fn ledger_transfer(event: &FaucetEvent) -> Option<Transfer> {
    match event {
        FaucetEvent::Dispensed { recipient, amount } => Some(Transfer::Credit(*recipient, *amount)),
        FaucetEvent::FundsRetrieved { owner, amount } if *amount > 0 => {
            Some(Transfer::Credit(*owner, *amount))
        }
        FaucetEvent::Received { from, amount } if *amount > 0 => Some(Transfer::Debit(*from, *amount)),
        _ => None,
    }
}

fn log_event(event: &FaucetEvent) {
    match event {
        FaucetEvent::Dispensed { recipient, amount } => {
            info!("Dispensed {} ETH to {}", format_ether(*amount), recipient)
        }
        FaucetEvent::RateLimitsChanged {
            max_tx_per_hour,
            time_limit_seconds,
            actor,
        } => info!(
            "Rate limits changed by {}: {} tx/hour, {}s between requests",
            actor, max_tx_per_hour, time_limit_seconds
        ),
        FaucetEvent::FundsRetrieved { owner, amount } => {
            info!("Owner {} retrieved {} ETH", owner, format_ether(*amount))
        }
        FaucetEvent::Paused { account } => info!("Faucet paused by {}", account),
        FaucetEvent::Unpaused { account } => info!("Faucet unpaused by {}", account),
        FaucetEvent::OwnershipTransferStarted {
            previous_owner,
            new_owner,
        } => info!("Ownership transfer started: {} -> {}", previous_owner, new_owner),
        FaucetEvent::OwnershipTransferred {
            previous_owner,
            new_owner,
        } => info!("Ownership transferred: {} -> {}", previous_owner, new_owner),
        FaucetEvent::Received { from, amount } => {
            info!("Received {} ETH from {}", format_ether(*amount), from)
        }
    }
}
