//! End-to-end behaviour of the faucet service with a manual clock and an
//! in-memory ledger.

use async_trait::async_trait;
use spigot_common::Address;
use spigot_faucet::{
    Clock, DeployParams, FaucetDatabase, FaucetError, FaucetEvent, FaucetResult, FaucetService,
    InMemoryLedger, Ledger, ManualClock,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

const ONE_ETHER: u128 = 1_000_000_000_000_000_000;
const TENTH_ETHER: u128 = ONE_ETHER / 10;
const T0: u64 = 1_700_000_000;

fn owner() -> Address {
    Address::repeat_byte(0x01)
}

fn user(n: u8) -> Address {
    Address::repeat_byte(0x10 + n)
}

struct Harness {
    service: Arc<FaucetService>,
    clock: Arc<ManualClock>,
    ledger: Arc<InMemoryLedger>,
}

async fn deploy_funded(funding: u128) -> Harness {
    let clock = Arc::new(ManualClock::new(T0));
    let ledger = Arc::new(InMemoryLedger::with_balances([(owner(), funding)]));
    let service = FaucetService::deploy(
        owner(),
        DeployParams::default(),
        clock.clone(),
        ledger.clone(),
    )
    .unwrap();
    service.fund(owner(), funding).await.unwrap();

    Harness {
        service: Arc::new(service),
        clock,
        ledger,
    }
}

#[tokio::test]
async fn test_dispenses_configured_amount() {
    let h = deploy_funded(ONE_ETHER).await;

    let receipt = h.service.request_funds(user(1)).await.unwrap();
    assert_eq!(receipt.timestamp, T0);
    assert_eq!(
        receipt.event,
        FaucetEvent::Dispensed {
            recipient: user(1),
            amount: TENTH_ETHER
        }
    );

    assert_eq!(h.service.balance().await, ONE_ETHER - TENTH_ETHER);
    assert_eq!(h.ledger.balance_of(&user(1)).await, TENTH_ETHER);
}

#[tokio::test]
async fn test_rejects_request_within_time_limit() {
    let h = deploy_funded(ONE_ETHER).await;
    h.service.request_funds(user(1)).await.unwrap();

    h.clock.advance(60);
    let err = h.service.request_funds(user(1)).await.unwrap_err();
    assert_eq!(err.to_string(), "Faucet: Request too soon");
    assert_eq!(err.retry_after(), Some(86_400 - 60));

    // other requesters are unaffected
    h.service.request_funds(user(2)).await.unwrap();
}

#[tokio::test]
async fn test_allows_request_after_time_limit() {
    let h = deploy_funded(ONE_ETHER).await;
    h.service.request_funds(user(1)).await.unwrap();

    h.clock.advance(86_400);
    h.service.request_funds(user(1)).await.unwrap();
    assert_eq!(h.ledger.balance_of(&user(1)).await, 2 * TENTH_ETHER);
}

#[tokio::test]
async fn test_enforces_hourly_cap() {
    let h = deploy_funded(ONE_ETHER).await;
    h.service.set_rate_limits(owner(), 2, 1).await.unwrap();

    h.clock.advance(1);
    h.service.request_funds(user(1)).await.unwrap();
    h.clock.advance(1);
    h.service.request_funds(user(1)).await.unwrap();
    h.clock.advance(1);
    let err = h.service.request_funds(user(1)).await.unwrap_err();
    assert!(matches!(err, FaucetError::RateLimitExceeded { .. }));
    assert_eq!(err.to_string(), "Faucet: Max transactions per hour exceeded");

    let view = h.service.requester(user(1)).await;
    assert_eq!(view.quota.remaining_in_window, 0);
    assert_eq!(view.quota.next_request_at, T0 + 1 + 3600);

    h.clock.advance(3600);
    h.service.request_funds(user(1)).await.unwrap();
    let record = h.service.requester(user(1)).await.record.unwrap();
    assert_eq!(record.request_count_in_window, 1);
    assert_eq!(record.window_start_timestamp, T0 + 3603);
}

#[tokio::test]
async fn test_rejects_invalid_rate_limits() {
    let h = deploy_funded(ONE_ETHER).await;

    let err = h.service.set_rate_limits(owner(), 0, 10).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Faucet: Max transactions per hour must be greater than 0"
    );
    let err = h.service.set_rate_limits(owner(), 10, 0).await.unwrap_err();
    assert_eq!(err.to_string(), "Faucet: Time limit must be greater than 0");

    let limits = h.service.snapshot().await.rate_limits();
    assert_eq!(limits.max_tx_per_hour(), 10);
    assert_eq!(limits.time_limit_seconds(), 86_400);
}

#[tokio::test]
async fn test_owner_retrieves_funds() {
    let h = deploy_funded(ONE_ETHER).await;

    let receipt = h.service.retrieve_funds(owner()).await.unwrap();
    assert_eq!(
        receipt.event,
        FaucetEvent::FundsRetrieved {
            owner: owner(),
            amount: ONE_ETHER
        }
    );
    assert_eq!(h.service.balance().await, 0);
    assert_eq!(h.ledger.balance_of(&owner()).await, ONE_ETHER);

    let err = h.service.request_funds(user(1)).await.unwrap_err();
    assert!(matches!(err, FaucetError::InsufficientBalance));

    // an empty pool can still be retrieved
    let receipt = h.service.retrieve_funds(owner()).await.unwrap();
    assert_eq!(
        receipt.event,
        FaucetEvent::FundsRetrieved {
            owner: owner(),
            amount: 0
        }
    );
}

#[tokio::test]
async fn test_admin_calls_require_owner() {
    let h = deploy_funded(ONE_ETHER).await;
    let stranger = user(9);

    for err in [
        h.service.set_rate_limits(stranger, 5, 5).await.unwrap_err(),
        h.service.retrieve_funds(stranger).await.unwrap_err(),
        h.service.pause(stranger).await.unwrap_err(),
        h.service.unpause(stranger).await.unwrap_err(),
        h.service.transfer_ownership(stranger, stranger).await.unwrap_err(),
    ] {
        assert_eq!(err.to_string(), "Ownable: caller is not the owner");
    }

    assert_eq!(h.service.balance().await, ONE_ETHER);
    assert_eq!(h.ledger.balance_of(&stranger).await, 0);
}

#[tokio::test]
async fn test_pause_blocks_requests() {
    let h = deploy_funded(ONE_ETHER).await;

    h.service.pause(owner()).await.unwrap();
    let err = h.service.request_funds(user(1)).await.unwrap_err();
    assert_eq!(err.to_string(), "Pausable: paused");
    assert!(matches!(h.service.pause(owner()).await, Err(FaucetError::AlreadyPaused)));

    // owner operations keep working while paused
    h.service.set_rate_limits(owner(), 3, 30).await.unwrap();

    h.service.unpause(owner()).await.unwrap();
    assert!(matches!(h.service.unpause(owner()).await, Err(FaucetError::NotPaused)));
    h.service.request_funds(user(1)).await.unwrap();
}

#[tokio::test]
async fn test_publishes_events_for_successful_calls_only() {
    let h = deploy_funded(ONE_ETHER).await;
    let mut events = h.service.subscribe();

    h.service.request_funds(user(1)).await.unwrap();
    h.service.request_funds(user(1)).await.unwrap_err();
    h.service.set_rate_limits(owner(), 4, 120).await.unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        FaucetEvent::Dispensed {
            recipient: user(1),
            amount: TENTH_ETHER
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        FaucetEvent::RateLimitsChanged {
            max_tx_per_hour: 4,
            time_limit_seconds: 120,
            actor: owner()
        }
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_two_step_ownership_transfer() {
    let h = deploy_funded(ONE_ETHER).await;
    let next_owner = user(7);

    h.service.transfer_ownership(owner(), next_owner).await.unwrap();
    // nomination alone grants nothing
    assert!(matches!(
        h.service.pause(next_owner).await,
        Err(FaucetError::NotOwner)
    ));
    assert!(matches!(
        h.service.accept_ownership(user(8)).await,
        Err(FaucetError::NotPendingOwner)
    ));

    h.service.accept_ownership(next_owner).await.unwrap();
    assert_eq!(h.service.owner().await, next_owner);
    assert_eq!(h.service.snapshot().await.pending_owner(), None);

    assert!(matches!(
        h.service.retrieve_funds(owner()).await,
        Err(FaucetError::NotOwner)
    ));
    h.service.retrieve_funds(next_owner).await.unwrap();
    assert_eq!(h.ledger.balance_of(&next_owner).await, ONE_ETHER);
}

#[tokio::test]
async fn test_zero_address_cannot_be_nominated() {
    let h = deploy_funded(ONE_ETHER).await;
    let err = h
        .service
        .transfer_ownership(owner(), Address::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Ownable: new owner is the zero address");
}

#[tokio::test]
async fn test_concurrent_requests_never_overdraw() {
    let h = deploy_funded(5 * TENTH_ETHER).await;

    let mut handles = Vec::new();
    for n in 0..10 {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move { service.request_funds(user(n)).await }));
    }

    let mut dispensed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => dispensed += 1,
            Err(FaucetError::InsufficientBalance) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(dispensed, 5);
    assert_eq!(rejected, 5);
    assert_eq!(h.service.balance().await, 0);
}

struct RejectingLedger;

#[async_trait]
impl Ledger for RejectingLedger {
    async fn credit(&self, account: &Address, _amount: u128) -> FaucetResult<()> {
        Err(FaucetError::Ledger(format!("account {} is frozen", account)))
    }

    async fn debit(&self, _account: &Address, _amount: u128) -> FaucetResult<()> {
        Ok(())
    }

    async fn balance_of(&self, _account: &Address) -> u128 {
        0
    }
}

#[tokio::test]
async fn test_failed_credit_leaves_state_untouched() {
    let clock = Arc::new(ManualClock::new(T0));
    let database = FaucetDatabase::temporary().unwrap();
    let service = FaucetService::deploy_persistent(
        database,
        owner(),
        DeployParams::default(),
        clock.clone(),
        Arc::new(RejectingLedger),
        false,
    )
    .unwrap();
    service.fund(owner(), ONE_ETHER).await.unwrap();
    let before = service.snapshot().await;

    let err = service.request_funds(user(1)).await.unwrap_err();
    assert!(matches!(err, FaucetError::Ledger(_)));

    assert_eq!(service.snapshot().await, before);
    assert!(service.history(&user(1)).unwrap().is_empty());
    assert_eq!(service.status().await.unwrap().statistics.total_distributions, 0);
}

#[tokio::test]
async fn test_fund_moves_sender_balance() {
    let h = deploy_funded(ONE_ETHER).await;
    assert_eq!(h.ledger.balance_of(&owner()).await, 0);

    h.ledger.credit(&user(1), 3 * ONE_ETHER).await.unwrap();
    h.service.fund(user(1), 2 * ONE_ETHER).await.unwrap();
    assert_eq!(h.ledger.balance_of(&user(1)).await, ONE_ETHER);
    assert_eq!(h.service.balance().await, 3 * ONE_ETHER);
}

#[tokio::test]
async fn test_fund_beyond_sender_balance_is_rejected() {
    let clock = Arc::new(ManualClock::new(T0));
    let ledger = Arc::new(InMemoryLedger::with_balances([(user(1), ONE_ETHER)]));
    let service = FaucetService::deploy_persistent(
        FaucetDatabase::temporary().unwrap(),
        owner(),
        DeployParams::default(),
        clock,
        ledger.clone(),
        false,
    )
    .unwrap();
    let mut events = service.subscribe();
    let before = service.snapshot().await;

    let err = service.fund(user(1), 2 * ONE_ETHER).await.unwrap_err();
    assert!(matches!(err, FaucetError::InsufficientFunds(_)));
    assert!(matches!(
        service.fund(user(2), 1).await,
        Err(FaucetError::InsufficientFunds(_))
    ));

    assert_eq!(service.snapshot().await, before);
    assert_eq!(service.balance().await, 0);
    assert_eq!(ledger.balance_of(&user(1)).await, ONE_ETHER);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    // a zero deposit moves nothing and needs no balance
    service.fund(user(2), 0).await.unwrap();
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("faucet");
    let path = path.to_str().unwrap();
    let clock = Arc::new(ManualClock::new(T0));

    {
        let service = FaucetService::deploy_persistent(
            FaucetDatabase::new(path).unwrap(),
            owner(),
            DeployParams::default(),
            clock.clone(),
            Arc::new(InMemoryLedger::with_balances([(owner(), ONE_ETHER)])),
            false,
        )
        .unwrap();
        service.fund(owner(), ONE_ETHER).await.unwrap();
        service.request_funds(user(1)).await.unwrap();
        for n in 2..=4 {
            clock.advance(1);
            service.request_funds(user(n)).await.unwrap();
        }
        service.flush().unwrap();
    }

    assert!(matches!(
        FaucetService::deploy_persistent(
            FaucetDatabase::new(path).unwrap(),
            owner(),
            DeployParams::default(),
            clock.clone(),
            Arc::new(InMemoryLedger::new()),
            false,
        ),
        Err(FaucetError::AlreadyDeployed)
    ));

    let before = clock.now();
    clock.advance(10);
    let service = FaucetService::open(
        FaucetDatabase::new(path).unwrap(),
        clock.clone(),
        Arc::new(InMemoryLedger::new()),
    )
    .unwrap();

    assert_eq!(service.balance().await, ONE_ETHER - 4 * TENTH_ETHER);
    for n in 1..=4 {
        assert!(matches!(
            service.request_funds(user(n)).await,
            Err(FaucetError::TooSoon { .. })
        ));
    }
    let record = service.requester(user(4)).await.record.unwrap();
    assert_eq!(record.last_request_timestamp, before);

    let history = service.history(&user(1)).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].timestamp, T0);
    assert_eq!(service.recent_distributions(5).unwrap().len(), 4);

    let status = service.status().await.unwrap();
    assert_eq!(status.statistics.total_distributions, 4);
    assert_eq!(status.requesters, 4);
    assert_eq!(service.now(), clock.now());
}

#[tokio::test]
async fn test_open_requires_deployment() {
    let result = FaucetService::open(
        FaucetDatabase::temporary().unwrap(),
        Arc::new(ManualClock::new(T0)),
        Arc::new(InMemoryLedger::new()),
    );
    assert!(matches!(result, Err(FaucetError::NotDeployed)));
}
