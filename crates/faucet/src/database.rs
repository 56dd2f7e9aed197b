//! Faucet database
//!
//! Three trees:
//! - `state`: the faucet core (owner, balance, limits) under one key
//! - `requesters`: one rate-limit record per address, keyed by the raw address
//! - `distributions`: one record per dispense
//!
//! A call writes only what it touched, in a single transaction, so its cost
//! does not grow with the number of requesters ever seen.

use crate::error::{FaucetError, FaucetResult};
use crate::state::{Checkpoint, FaucetCore, FaucetState, RequesterRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};
use spigot_common::types::amount_serde;
use spigot_common::{Address, ADDRESS_LENGTH};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

const STATE_KEY: &[u8] = b"faucet";

/// Distribution record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRecord {
    /// Recipient address
    pub recipient: Address,
    /// Amount dispensed (in wei)
    #[serde(with = "amount_serde")]
    pub amount: u128,
    /// Unix timestamp of the dispense
    pub timestamp: u64,
}

impl DistributionRecord {
    pub fn new(recipient: Address, amount: u128, timestamp: u64) -> Self {
        Self {
            recipient,
            amount,
            timestamp,
        }
    }
}

/// New value of one requester record: `None` deletes it.
pub type RequesterWrite = (Address, Option<RequesterRecord>);

/// Faucet database
pub struct FaucetDatabase {
    db: Db,
    /// Tree for the core snapshot
    state: Tree,
    /// Tree for per-requester rate-limit records
    requesters: Tree,
    /// Tree for distribution records
    distributions: Tree,
}

impl FaucetDatabase {
    /// Create or open faucet database
    pub fn new(path: &str) -> FaucetResult<Self> {
        info!("Opening faucet database at: {}", path);

        let db = sled::Config::default()
            .path(path)
            .cache_capacity(64 * 1024 * 1024)
            .open()?;

        Self::from_db(db)
    }

    /// Database that lives only as long as the process; for tests and dry runs.
    pub fn temporary() -> FaucetResult<Self> {
        let db = sled::Config::default().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> FaucetResult<Self> {
        let state = db.open_tree("state")?;
        let requesters = db.open_tree("requesters")?;
        let distributions = db.open_tree("distributions")?;

        Ok(Self {
            db,
            state,
            requesters,
            distributions,
        })
    }

    /// Load the persisted faucet, if one was deployed
    pub fn load_state(&self) -> FaucetResult<Option<FaucetState>> {
        let Some(bytes) = self.state.get(STATE_KEY)? else {
            return Ok(None);
        };
        let core: FaucetCore = decode(&bytes)?;

        let mut requesters = HashMap::new();
        for item in self.requesters.iter() {
            let (key, value) = item?;
            let raw: [u8; ADDRESS_LENGTH] = key.as_ref().try_into().map_err(|_| {
                FaucetError::Internal(format!("corrupt requester key: {}", hex::encode(&key)))
            })?;
            requesters.insert(Address::from(raw), decode(&value)?);
        }

        Ok(Some(FaucetState::from_parts(core, requesters)))
    }

    /// Replace whatever is stored with `state`, dropping old requester
    /// records and history. Used when deploying.
    pub fn replace_state(&self, state: &FaucetState) -> FaucetResult<()> {
        self.requesters.clear()?;
        self.distributions.clear()?;

        for (address, record) in state.requesters() {
            self.requesters
                .insert(address.as_bytes().as_slice(), encode(record)?)?;
        }
        self.state.insert(STATE_KEY, encode(state.core())?)?;

        debug!("Stored fresh faucet snapshot");
        Ok(())
    }

    /// Persist the core, the one requester record a call touched and the
    /// matching distribution in a single transaction. Returns the key of
    /// the stored distribution.
    pub fn commit(
        &self,
        core: &FaucetCore,
        requester: Option<RequesterWrite>,
        distribution: Option<&DistributionRecord>,
    ) -> FaucetResult<Option<Vec<u8>>> {
        let encoded_distribution = match distribution {
            Some(record) => {
                let id = self.db.generate_id()?;
                Some((distribution_key(record, id), encode(record)?))
            }
            None => None,
        };

        let insert = encoded_distribution
            .as_ref()
            .map(|(key, value)| (key.as_slice(), value.as_slice()));
        self.write(core, requester, insert, None)?;

        if let Some(record) = distribution {
            debug!("Recorded distribution for address: {}", record.recipient);
        }

        Ok(encoded_distribution.map(|(key, _)| key))
    }

    /// Undo a [`commit`](Self::commit): restore the checkpointed core and
    /// requester record and drop the distribution stored under
    /// `distribution_key`.
    pub fn revert(
        &self,
        checkpoint: &Checkpoint,
        distribution_key: Option<&[u8]>,
    ) -> FaucetResult<()> {
        self.write(
            checkpoint.core(),
            Some(checkpoint.requester()),
            None,
            distribution_key,
        )?;

        debug!("Reverted faucet snapshot");
        Ok(())
    }

    fn write(
        &self,
        core: &FaucetCore,
        requester: Option<RequesterWrite>,
        insert_distribution: Option<(&[u8], &[u8])>,
        remove_distribution: Option<&[u8]>,
    ) -> FaucetResult<()> {
        let encoded_core = encode(core)?;
        let encoded_requester = match requester {
            Some((address, Some(record))) => Some((address, Some(encode(&record)?))),
            Some((address, None)) => Some((address, None)),
            None => None,
        };

        (&self.state, &self.requesters, &self.distributions)
            .transaction(
                |(state_tree, requester_tree, distribution_tree)| -> ConflictableTransactionResult<()> {
                    state_tree.insert(STATE_KEY, encoded_core.as_slice())?;
                    match &encoded_requester {
                        Some((address, Some(value))) => {
                            requester_tree.insert(address.as_bytes().as_slice(), value.as_slice())?;
                        }
                        Some((address, None)) => {
                            requester_tree.remove(address.as_bytes().as_slice())?;
                        }
                        None => {}
                    }
                    if let Some((key, value)) = insert_distribution {
                        distribution_tree.insert(key, value)?;
                    }
                    if let Some(key) = remove_distribution {
                        distribution_tree.remove(key)?;
                    }
                    Ok(())
                },
            )
            .map_err(transaction_error)
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> FaucetResult<usize> {
        Ok(self.db.flush()?)
    }

    /// Get all distributions for an address, newest first
    pub fn distributions_for(&self, address: &Address) -> FaucetResult<Vec<DistributionRecord>> {
        let mut records = Vec::new();

        for item in self.distributions.scan_prefix(format!("{}:", address)) {
            let (_, value) = item?;
            records.push(decode::<DistributionRecord>(&value)?);
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Get the most recent distributions across all addresses
    pub fn recent_distributions(&self, limit: usize) -> FaucetResult<Vec<DistributionRecord>> {
        let mut records = Vec::new();

        for item in self.distributions.iter() {
            let (_, value) = item?;
            records.push(decode::<DistributionRecord>(&value)?);
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }

    /// Get statistics
    pub fn statistics(&self) -> FaucetResult<FaucetStatistics> {
        let mut total_distributions = 0usize;
        let mut total_amount = 0u128;
        let mut unique_addresses = HashSet::new();

        for item in self.distributions.iter() {
            let (_, value) = item?;
            let record: DistributionRecord = decode(&value)?;

            total_distributions += 1;
            total_amount = total_amount.saturating_add(record.amount);
            unique_addresses.insert(record.recipient);
        }

        Ok(FaucetStatistics {
            total_distributions,
            total_amount,
            unique_addresses: unique_addresses.len() as u64,
        })
    }

    /// Remove distribution history older than `days` before `now`.
    /// Rate-limit bookkeeping lives in the snapshot and is never pruned.
    pub fn cleanup_old_records(&self, now: u64, days: u64) -> FaucetResult<usize> {
        let cutoff = now.saturating_sub(days.saturating_mul(86_400));
        let mut keys_to_remove = Vec::new();

        for item in self.distributions.iter() {
            let (key, value) = item?;
            let record: DistributionRecord = decode(&value)?;

            if record.timestamp < cutoff {
                keys_to_remove.push(key);
            }
        }

        let removed = keys_to_remove.len();
        for key in keys_to_remove {
            self.distributions.remove(key)?;
        }

        info!("Cleaned up {} old records (older than {} days)", removed, days);
        Ok(removed)
    }
}

fn distribution_key(record: &DistributionRecord, id: u64) -> Vec<u8> {
    format!("{}:{:020}:{:020}", record.recipient, record.timestamp, id).into_bytes()
}

fn transaction_error(e: TransactionError<()>) -> FaucetError {
    match e {
        TransactionError::Storage(err) => FaucetError::Database(err),
        TransactionError::Abort(()) => FaucetError::Internal("state commit aborted".to_string()),
    }
}

fn encode<T: Serialize>(value: &T) -> FaucetResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| FaucetError::Internal(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> FaucetResult<T> {
    bincode::deserialize(bytes).map_err(|e| FaucetError::Internal(format!("corrupt record: {}", e)))
}

/// Faucet statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetStatistics {
    pub total_distributions: usize,
    #[serde(with = "amount_serde")]
    pub total_amount: u128,
    pub unique_addresses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeployParams;

    const T0: u64 = 1_700_000_000;

    fn owner() -> Address {
        Address::repeat_byte(0x01)
    }

    fn sample_state() -> FaucetState {
        let mut state = FaucetState::deploy(owner(), DeployParams::default(), T0).unwrap();
        state.fund(owner(), 1_000_000_000_000_000_000).unwrap();
        state
    }

    /// Apply a dispense to `state` and persist exactly what it touched.
    fn dispense(db: &FaucetDatabase, state: &mut FaucetState, recipient: Address, now: u64) -> Option<Vec<u8>> {
        state.request_funds(recipient, now).unwrap();
        let record = DistributionRecord::new(recipient, state.disburse_amount(), now);
        let touched = (recipient, state.requester(&recipient).copied());
        db.commit(state.core(), Some(touched), Some(&record)).unwrap()
    }

    #[test]
    fn test_empty_database_has_no_state() {
        let db = FaucetDatabase::temporary().unwrap();
        assert!(db.load_state().unwrap().is_none());
        assert_eq!(db.statistics().unwrap(), FaucetStatistics::default());
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faucet");
        let path = path.to_str().unwrap();

        let mut state = sample_state();
        let alice = Address::repeat_byte(0x02);
        let bob = Address::repeat_byte(0x03);

        {
            let db = FaucetDatabase::new(path).unwrap();
            db.replace_state(&state).unwrap();
            dispense(&db, &mut state, alice, T0);
            dispense(&db, &mut state, bob, T0 + 1);
            db.flush().unwrap();
        }

        let db = FaucetDatabase::new(path).unwrap();
        assert_eq!(db.load_state().unwrap(), Some(state));
        assert_eq!(db.distributions_for(&alice).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_writes_only_the_touched_requester() {
        let db = FaucetDatabase::temporary().unwrap();
        let mut state = sample_state();
        db.replace_state(&state).unwrap();

        dispense(&db, &mut state, Address::repeat_byte(0x0a), T0);
        // a core-only commit leaves requester records alone
        state.pause(owner()).unwrap();
        db.commit(state.core(), None, None).unwrap();

        let loaded = db.load_state().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.requester_count(), 1);
        assert!(loaded.is_paused());
    }

    #[test]
    fn test_statistics_and_history() {
        let db = FaucetDatabase::temporary().unwrap();
        let state = sample_state();
        let alice = Address::repeat_byte(0x0a);
        let bob = Address::repeat_byte(0x0b);

        db.commit(state.core(), None, Some(&DistributionRecord::new(alice, 10, T0))).unwrap();
        db.commit(state.core(), None, Some(&DistributionRecord::new(alice, 10, T0 + 5))).unwrap();
        db.commit(state.core(), None, Some(&DistributionRecord::new(bob, 20, T0 + 9))).unwrap();
        // same second, same recipient: both kept
        db.commit(state.core(), None, Some(&DistributionRecord::new(bob, 20, T0 + 9))).unwrap();

        let stats = db.statistics().unwrap();
        assert_eq!(stats.total_distributions, 4);
        assert_eq!(stats.total_amount, 60);
        assert_eq!(stats.unique_addresses, 2);

        let alice_history = db.distributions_for(&alice).unwrap();
        assert_eq!(alice_history.len(), 2);
        assert_eq!(alice_history[0].timestamp, T0 + 5);

        let recent = db.recent_distributions(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|r| r.recipient == bob));
    }

    #[test]
    fn test_revert_restores_checkpoint() {
        let db = FaucetDatabase::temporary().unwrap();
        let mut state = sample_state();
        db.replace_state(&state).unwrap();
        let previous = state.clone();

        let recipient = Address::repeat_byte(0x02);
        let checkpoint = state.checkpoint(&recipient);
        let key = dispense(&db, &mut state, recipient, T0);
        assert!(key.is_some());
        assert_eq!(db.statistics().unwrap().total_distributions, 1);

        db.revert(&checkpoint, key.as_deref()).unwrap();
        assert_eq!(db.load_state().unwrap(), Some(previous));
        assert_eq!(db.statistics().unwrap().total_distributions, 0);
    }

    #[test]
    fn test_replace_state_drops_old_records() {
        let db = FaucetDatabase::temporary().unwrap();
        let mut state = sample_state();
        db.replace_state(&state).unwrap();
        dispense(&db, &mut state, Address::repeat_byte(0x02), T0);

        let fresh = sample_state();
        db.replace_state(&fresh).unwrap();
        assert_eq!(db.load_state().unwrap(), Some(fresh));
        assert_eq!(db.statistics().unwrap().total_distributions, 0);
    }

    #[test]
    fn test_cleanup_old_records() {
        let db = FaucetDatabase::temporary().unwrap();
        let state = sample_state();
        let alice = Address::repeat_byte(0x0a);

        db.commit(state.core(), None, Some(&DistributionRecord::new(alice, 10, T0))).unwrap();
        db.commit(state.core(), None, Some(&DistributionRecord::new(alice, 10, T0 + 40 * 86_400))).unwrap();

        let removed = db.cleanup_old_records(T0 + 45 * 86_400, 30).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.statistics().unwrap().total_distributions, 1);
        // snapshot untouched
        assert!(db.load_state().unwrap().is_some());
    }

    #[test]
    fn test_cleanup_with_huge_retention_keeps_everything() {
        let db = FaucetDatabase::temporary().unwrap();
        let state = sample_state();
        db.commit(
            state.core(),
            None,
            Some(&DistributionRecord::new(Address::repeat_byte(0x0a), 10, T0)),
        )
        .unwrap();

        assert_eq!(db.cleanup_old_records(T0, u64::MAX).unwrap(), 0);
        assert_eq!(db.statistics().unwrap().total_distributions, 1);
    }
}
