//! Faucet state machine
//!
//! A pool of native currency that releases a fixed amount per qualifying
//! request. Requests are gated by:
//! - a pause flag controlled by the owner
//! - the pool balance
//! - a per-requester minimum delay between dispenses (`time_limit_seconds`)
//! - a per-requester cap per one-hour window (`max_tx_per_hour`)
//!
//! Rate limiting uses a fixed window per requester: the window opens on the
//! first request and is reset by the first request made at least an hour
//! after it opened. A requester can therefore get up to
//! `2 * max_tx_per_hour` dispenses across a window boundary.
//!
//! Every operation validates completely before touching any field, so a
//! rejected call never leaves a partial update behind. Callers supply the
//! current time; nothing in here reads a clock.

use crate::error::{FaucetError, FaucetResult};
use crate::events::FaucetEvent;
use serde::{Deserialize, Serialize};
use spigot_common::types::amount_serde;
use spigot_common::Address;
use std::collections::HashMap;

/// Length of a rate-limit window.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 3600;

/// 0.1 of the native currency, in wei.
pub const DEFAULT_DISBURSE_AMOUNT: u128 = 100_000_000_000_000_000;

pub const DEFAULT_MAX_TX_PER_HOUR: u32 = 10;

/// 24 hours.
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 86_400;

/// Owner-tunable request limits. Both values are always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    max_tx_per_hour: u32,
    time_limit_seconds: u64,
}

impl RateLimits {
    pub fn new(max_tx_per_hour: u32, time_limit_seconds: u64) -> FaucetResult<Self> {
        if max_tx_per_hour == 0 {
            return Err(FaucetError::InvalidParameter(
                "Faucet: Max transactions per hour must be greater than 0".to_string(),
            ));
        }
        if time_limit_seconds == 0 {
            return Err(FaucetError::InvalidParameter(
                "Faucet: Time limit must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            max_tx_per_hour,
            time_limit_seconds,
        })
    }

    pub fn max_tx_per_hour(&self) -> u32 {
        self.max_tx_per_hour
    }

    pub fn time_limit_seconds(&self) -> u64 {
        self.time_limit_seconds
    }
}

/// Parameters fixed at deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployParams {
    pub max_tx_per_hour: u32,
    pub time_limit_seconds: u64,
    #[serde(with = "amount_serde")]
    pub disburse_amount: u128,
}

impl Default for DeployParams {
    fn default() -> Self {
        Self {
            max_tx_per_hour: DEFAULT_MAX_TX_PER_HOUR,
            time_limit_seconds: DEFAULT_TIME_LIMIT_SECS,
            disburse_amount: DEFAULT_DISBURSE_AMOUNT,
        }
    }
}

/// Per-requester bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterRecord {
    pub last_request_timestamp: u64,
    pub request_count_in_window: u32,
    pub window_start_timestamp: u64,
}

/// What a requester may do next, as of a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterQuota {
    /// Successful requests still allowed in the current window.
    pub remaining_in_window: u32,
    /// Earliest time a request can pass both the time limit and the window cap.
    pub next_request_at: u64,
}

/// Everything except the requester records. Small and cheap to copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetCore {
    #[serde(with = "amount_serde")]
    balance: u128,
    owner: Address,
    pending_owner: Option<Address>,
    paused: bool,
    limits: RateLimits,
    #[serde(with = "amount_serde")]
    disburse_amount: u128,
    deployed_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetState {
    core: FaucetCore,
    requesters: HashMap<Address, RequesterRecord>,
}

/// Rollback point taken before a call. A call changes at most the core and
/// the record of its caller, so that is all this keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    core: FaucetCore,
    requester: Address,
    record: Option<RequesterRecord>,
}

impl Checkpoint {
    pub fn core(&self) -> &FaucetCore {
        &self.core
    }

    /// The caller and its record before the call.
    pub fn requester(&self) -> (Address, Option<RequesterRecord>) {
        (self.requester, self.record)
    }
}

impl FaucetState {
    /// Creates a faucet owned by `deployer` with an empty balance.
    pub fn deploy(deployer: Address, params: DeployParams, now: u64) -> FaucetResult<Self> {
        if deployer.is_zero() {
            return Err(FaucetError::InvalidParameter(
                "Ownable: owner is the zero address".to_string(),
            ));
        }
        let limits = RateLimits::new(params.max_tx_per_hour, params.time_limit_seconds)?;
        if params.disburse_amount == 0 {
            return Err(FaucetError::InvalidParameter(
                "Faucet: Disburse amount must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            core: FaucetCore {
                balance: 0,
                owner: deployer,
                pending_owner: None,
                paused: false,
                limits,
                disburse_amount: params.disburse_amount,
                deployed_at: now,
            },
            requesters: HashMap::new(),
        })
    }

    /// Reassembles a state loaded from storage.
    pub fn from_parts(core: FaucetCore, requesters: HashMap<Address, RequesterRecord>) -> Self {
        Self { core, requesters }
    }

    pub fn core(&self) -> &FaucetCore {
        &self.core
    }

    pub fn checkpoint(&self, caller: &Address) -> Checkpoint {
        Checkpoint {
            core: self.core.clone(),
            requester: *caller,
            record: self.requesters.get(caller).copied(),
        }
    }

    /// Undoes everything done since `checkpoint` was taken.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.core = checkpoint.core;
        match checkpoint.record {
            Some(record) => {
                self.requesters.insert(checkpoint.requester, record);
            }
            None => {
                self.requesters.remove(&checkpoint.requester);
            }
        }
    }

    pub fn balance(&self) -> u128 {
        self.core.balance
    }

    pub fn owner(&self) -> Address {
        self.core.owner
    }

    pub fn pending_owner(&self) -> Option<Address> {
        self.core.pending_owner
    }

    pub fn is_paused(&self) -> bool {
        self.core.paused
    }

    pub fn rate_limits(&self) -> RateLimits {
        self.core.limits
    }

    pub fn disburse_amount(&self) -> u128 {
        self.core.disburse_amount
    }

    pub fn deployed_at(&self) -> u64 {
        self.core.deployed_at
    }

    pub fn requester(&self, who: &Address) -> Option<&RequesterRecord> {
        self.requesters.get(who)
    }

    pub fn requesters(&self) -> impl Iterator<Item = (&Address, &RequesterRecord)> {
        self.requesters.iter()
    }

    pub fn requester_count(&self) -> usize {
        self.requesters.len()
    }

    /// Remaining allowance of `who` at time `now`, ignoring pause and balance.
    pub fn quota(&self, who: &Address, now: u64) -> RequesterQuota {
        let max = self.core.limits.max_tx_per_hour;
        let Some(record) = self.requesters.get(who) else {
            return RequesterQuota {
                remaining_in_window: max,
                next_request_at: now,
            };
        };

        let window_open = now.saturating_sub(record.window_start_timestamp) < RATE_LIMIT_WINDOW_SECS;
        let used = if window_open { record.request_count_in_window } else { 0 };

        let mut next = record
            .last_request_timestamp
            .saturating_add(self.core.limits.time_limit_seconds);
        if used >= max {
            next = next.max(record.window_start_timestamp.saturating_add(RATE_LIMIT_WINDOW_SECS));
        }

        RequesterQuota {
            remaining_in_window: max.saturating_sub(used),
            next_request_at: next.max(now),
        }
    }

    fn only_owner(&self, caller: &Address) -> FaucetResult<()> {
        if *caller != self.core.owner {
            return Err(FaucetError::NotOwner);
        }
        Ok(())
    }

    /// Sends `disburse_amount` to `caller`.
    ///
    /// The returned [`FaucetEvent::Dispensed`] tells the host what to credit.
    pub fn request_funds(&mut self, caller: Address, now: u64) -> FaucetResult<FaucetEvent> {
        if self.core.paused {
            return Err(FaucetError::Paused);
        }
        if self.core.balance < self.core.disburse_amount {
            return Err(FaucetError::InsufficientBalance);
        }

        let previous = self.requesters.get(&caller).copied();
        let time_limit = self.core.limits.time_limit_seconds;

        if let Some(record) = previous {
            let elapsed = now.saturating_sub(record.last_request_timestamp);
            if elapsed < time_limit {
                return Err(FaucetError::TooSoon {
                    retry_after: time_limit - elapsed,
                });
            }
        }

        let mut record = match previous {
            Some(record)
                if now.saturating_sub(record.window_start_timestamp) < RATE_LIMIT_WINDOW_SECS =>
            {
                record
            }
            // first request, or the previous window has run its hour
            _ => RequesterRecord {
                last_request_timestamp: previous.map_or(0, |r| r.last_request_timestamp),
                request_count_in_window: 0,
                window_start_timestamp: now,
            },
        };

        if record.request_count_in_window >= self.core.limits.max_tx_per_hour {
            let window_end = record.window_start_timestamp + RATE_LIMIT_WINDOW_SECS;
            return Err(FaucetError::RateLimitExceeded {
                retry_after: window_end.saturating_sub(now),
            });
        }

        record.request_count_in_window += 1;
        record.last_request_timestamp = now;

        self.core.balance -= self.core.disburse_amount;
        self.requesters.insert(caller, record);

        Ok(FaucetEvent::Dispensed {
            recipient: caller,
            amount: self.core.disburse_amount,
        })
    }

    pub fn set_rate_limits(
        &mut self,
        caller: Address,
        max_tx_per_hour: u32,
        time_limit_seconds: u64,
    ) -> FaucetResult<FaucetEvent> {
        self.only_owner(&caller)?;
        self.core.limits = RateLimits::new(max_tx_per_hour, time_limit_seconds)?;

        Ok(FaucetEvent::RateLimitsChanged {
            max_tx_per_hour,
            time_limit_seconds,
            actor: caller,
        })
    }

    /// Empties the pool into the owner's account. Succeeds on an empty pool.
    pub fn retrieve_funds(&mut self, caller: Address) -> FaucetResult<FaucetEvent> {
        self.only_owner(&caller)?;
        let amount = std::mem::take(&mut self.core.balance);

        Ok(FaucetEvent::FundsRetrieved {
            owner: caller,
            amount,
        })
    }

    pub fn pause(&mut self, caller: Address) -> FaucetResult<FaucetEvent> {
        self.only_owner(&caller)?;
        if self.core.paused {
            return Err(FaucetError::AlreadyPaused);
        }
        self.core.paused = true;
        Ok(FaucetEvent::Paused { account: caller })
    }

    pub fn unpause(&mut self, caller: Address) -> FaucetResult<FaucetEvent> {
        self.only_owner(&caller)?;
        if !self.core.paused {
            return Err(FaucetError::NotPaused);
        }
        self.core.paused = false;
        Ok(FaucetEvent::Unpaused { account: caller })
    }

    /// Nominates `candidate`; the current owner keeps every privilege until
    /// the candidate accepts. A new nomination replaces the previous one.
    pub fn transfer_ownership(
        &mut self,
        caller: Address,
        candidate: Address,
    ) -> FaucetResult<FaucetEvent> {
        self.only_owner(&caller)?;
        if candidate.is_zero() {
            return Err(FaucetError::InvalidParameter(
                "Ownable: new owner is the zero address".to_string(),
            ));
        }
        self.core.pending_owner = Some(candidate);

        Ok(FaucetEvent::OwnershipTransferStarted {
            previous_owner: self.core.owner,
            new_owner: candidate,
        })
    }

    pub fn accept_ownership(&mut self, caller: Address) -> FaucetResult<FaucetEvent> {
        if self.core.pending_owner != Some(caller) {
            return Err(FaucetError::NotPendingOwner);
        }
        let previous_owner = std::mem::replace(&mut self.core.owner, caller);
        self.core.pending_owner = None;

        Ok(FaucetEvent::OwnershipTransferred {
            previous_owner,
            new_owner: caller,
        })
    }

    /// Plain transfer into the pool; anyone may fund.
    pub fn fund(&mut self, from: Address, amount: u128) -> FaucetResult<FaucetEvent> {
        self.core.balance = self
            .core
            .balance
            .checked_add(amount)
            .ok_or_else(|| FaucetError::InvalidParameter("Faucet: balance overflow".to_string()))?;

        Ok(FaucetEvent::Received { from, amount })
    }
}
