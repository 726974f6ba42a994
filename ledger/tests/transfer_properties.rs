//! End-to-end transfer properties against the in-memory store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use simplebank_common::{AccountId, Currency, ErrorKind, LedgerError};
use simplebank_ledger::{
    run_with_retry, Account, Backoff, CreateAccountParams, FaultKind, FaultPoint, LedgerStore,
    MemoryStore, MemoryStoreConfig, RetryPolicy, TransferEngine, TransferPolicy, TransferRequest,
};

async fn open(store: &MemoryStore, owner: &str, balance: i64) -> Account {
    store
        .create_account(CreateAccountParams::new(owner, Currency::Usd).with_opening_balance(balance))
        .await
        .unwrap()
}

async fn setup() -> (Arc<TransferEngine<MemoryStore>>, MemoryStore, Account, Account) {
    let store = MemoryStore::new();
    let a = open(&store, "alice", 100).await;
    let b = open(&store, "bob", 50).await;
    let engine = Arc::new(TransferEngine::new(Arc::new(store.clone())));
    (engine, store, a, b)
}

async fn balance(store: &MemoryStore, id: AccountId) -> i64 {
    store.get_account(id).await.unwrap().balance
}

fn contention_policy(transfers: u32) -> RetryPolicy {
    // Each conflict is caused by a distinct commit, so this bound always suffices.
    RetryPolicy::new(transfers * 2 + 1, Backoff::Fixed(Duration::from_millis(1)))
}

#[tokio::test]
async fn test_scenario_a_to_b() {
    let (engine, _store, a, b) = setup().await;

    let first = engine.execute(&TransferRequest::new(a.id, b.id, 30)).await.unwrap();
    assert_eq!(first.from_account.balance, 70);
    assert_eq!(first.to_account.balance, 80);
    assert_eq!(first.from_entry.amount, -30);
    assert_eq!(first.to_entry.amount, 30);

    // No sufficiency check under the default policy.
    let second = engine.execute(&TransferRequest::new(a.id, b.id, 1000)).await.unwrap();
    assert_eq!(second.from_account.balance, -930);
    assert_eq!(second.to_account.balance, 1080);
}

#[tokio::test]
async fn test_conservation() {
    let (engine, store, a, b) = setup().await;
    let c = open(&store, "carol", 0).await;

    let requests = [
        TransferRequest::new(a.id, b.id, 10),
        TransferRequest::new(b.id, c.id, 25),
        TransferRequest::new(c.id, a.id, 5),
        TransferRequest::new(c.id, b.id, 7),
    ];

    for request in requests {
        let prior_from = balance(&store, request.from_account_id).await;
        let prior_to = balance(&store, request.to_account_id).await;

        let result = engine.execute(&request).await.unwrap();

        assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);
        assert_eq!(result.to_account.balance - prior_to, result.transfer.amount);
        assert_eq!(prior_from - result.from_account.balance, result.transfer.amount);
        assert_eq!(result.from_entry.account_id, request.from_account_id);
        assert_eq!(result.to_entry.account_id, request.to_account_id);
    }

    let report = store.verify_integrity().await.unwrap();
    assert!(report.is_consistent(), "{:?}", report.mismatches);
    assert_eq!(report.total_balance, 150);
    assert_eq!(report.transfers, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_lost_updates() {
    const N: u32 = 10;
    let (engine, store, x, y) = setup().await;
    let entries_before = store.entry_count();
    let policy = contention_policy(2 * N);

    for (from, to) in [(x.id, y.id), (y.id, x.id)] {
        let handles: Vec<_> = (0..N)
            .map(|_| {
                let engine = engine.clone();
                let policy = policy.clone();
                tokio::spawn(async move {
                    engine
                        .execute_with_retry(&TransferRequest::new(from, to, 5), &policy)
                        .await
                })
            })
            .collect();

        for result in join_all(handles).await {
            result.unwrap().unwrap();
        }
    }

    assert_eq!(balance(&store, x.id).await, 100);
    assert_eq!(balance(&store, y.id).await, 50);
    // 2N committed transfers, one debit and one credit entry each.
    assert_eq!(store.transfer_count(), 2 * N as usize);
    assert_eq!(store.entry_count() - entries_before, 2 * store.transfer_count());
    assert!(store.verify_integrity().await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bidirectional_transfers_never_deadlock() {
    const ROUNDS: u32 = 25;
    let (engine, store, x, y) = setup().await;
    let policy = contention_policy(2 * ROUNDS);

    let handles: Vec<_> = (0..ROUNDS)
        .flat_map(|_| [(x.id, y.id), (y.id, x.id)])
        .map(|(from, to)| {
            let engine = engine.clone();
            let policy = policy.clone();
            tokio::spawn(async move {
                engine
                    .execute_with_retry(&TransferRequest::new(from, to, 1), &policy)
                    .await
            })
        })
        .collect();

    let results = tokio::time::timeout(Duration::from_secs(30), join_all(handles))
        .await
        .expect("transfers deadlocked");

    let mut committed = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => committed += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::Conflict),
        }
    }
    assert_eq!(store.transfer_count(), committed);

    let report = store.verify_integrity().await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.total_balance, 150);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposing_transfers_wait_instead_of_conflicting() {
    const ROUNDS: usize = 25;
    // Only lock-wait timeouts can fail a transfer here.
    let store = MemoryStore::with_config(MemoryStoreConfig {
        lock_timeout: Duration::from_secs(2),
        snapshot_conflicts: false,
    });
    let x = open(&store, "xavier", 1_000).await;
    let y = open(&store, "yvonne", 1_000).await;
    let engine = Arc::new(TransferEngine::new(Arc::new(store.clone())));

    let handles: Vec<_> = (0..ROUNDS)
        .flat_map(|_| [(x.id, y.id), (y.id, x.id)])
        .map(|(from, to)| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute(&TransferRequest::new(from, to, 3)).await })
        })
        .collect();

    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    assert_eq!(store.transfer_count(), 2 * ROUNDS);
    assert_eq!(balance(&store, x.id).await, 1_000);
    assert_eq!(balance(&store, y.id).await, 1_000);
}

#[tokio::test]
async fn test_fault_leaves_no_partial_state() {
    for point in [FaultPoint::CreateEntry, FaultPoint::AddBalance, FaultPoint::Commit] {
        let (engine, store, a, b) = setup().await;
        let entries_before = store.entry_count();
        store.inject_fault(point, FaultKind::Storage);

        let err = engine
            .execute(&TransferRequest::new(a.id, b.id, 30))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Storage, "fault at {:?}", point);
        assert_eq!(store.transfer_count(), 0);
        assert_eq!(store.entry_count(), entries_before);
        assert_eq!(balance(&store, a.id).await, 100);
        assert_eq!(balance(&store, b.id).await, 50);
        assert!(store.verify_integrity().await.unwrap().is_consistent());
    }
}

#[tokio::test]
async fn test_storage_errors_are_not_retried() {
    let (engine, store, a, b) = setup().await;
    store.inject_fault(FaultPoint::AddBalance, FaultKind::Storage);
    store.inject_fault(FaultPoint::AddBalance, FaultKind::Storage);

    let err = engine
        .execute_with_retry(&TransferRequest::new(a.id, b.id, 30), &RetryPolicy::new(5, Backoff::None))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Storage(_)));
    assert_eq!(store.pending_faults(), 1);
}

#[tokio::test]
async fn test_conflict_retry_commits_exactly_once() {
    let (engine, store, a, b) = setup().await;
    store.inject_fault(FaultPoint::Commit, FaultKind::Conflict);

    let result = engine
        .execute_with_retry(&TransferRequest::new(a.id, b.id, 30), &RetryPolicy::new(3, Backoff::None))
        .await
        .unwrap();

    assert_eq!(store.transfer_count(), 1);
    assert_eq!(store.list_transfers(Some(a.id)).await.unwrap(), vec![result.transfer]);
    assert_eq!(balance(&store, a.id).await, 70);
    assert_eq!(balance(&store, b.id).await, 80);
}

#[tokio::test]
async fn test_conflict_surfaces_after_exhaustion() {
    let (engine, store, a, b) = setup().await;
    for _ in 0..3 {
        store.inject_fault(FaultPoint::CreateTransfer, FaultKind::Conflict);
    }

    let err = engine
        .execute_with_retry(&TransferRequest::new(a.id, b.id, 30), &RetryPolicy::new(3, Backoff::None))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(store.pending_faults(), 0);
    assert_eq!(store.transfer_count(), 0);
}

#[tokio::test]
async fn test_missing_account_is_not_retried() {
    let (engine, store, a, _) = setup().await;
    let ghost = AccountId::new(9_999);
    let request = TransferRequest::new(ghost, a.id, 10);
    let attempts = AtomicU32::new(0);

    let err = run_with_retry(&RetryPolicy::new(5, Backoff::None), |_| {
        attempts.fetch_add(1, Ordering::SeqCst);
        engine.execute(&request)
    })
    .await
    .unwrap_err();

    assert_eq!(err, LedgerError::AccountNotFound(ghost));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(balance(&store, a.id).await, 100);
}

#[tokio::test]
async fn test_policies() {
    let store = MemoryStore::new();
    let a = open(&store, "alice", 100).await;
    let b = open(&store, "bob", 50).await;
    let strict = TransferEngine::with_policy(
        Arc::new(store.clone()),
        TransferPolicy {
            allow_self_transfer: false,
            allow_overdraft: false,
        },
    );

    let err = strict.execute(&TransferRequest::new(a.id, a.id, 1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = strict.execute(&TransferRequest::new(b.id, a.id, 51)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { balance: 50, .. }));

    let err = strict.execute(&TransferRequest::new(a.id, b.id, 0)).await.unwrap_err();
    assert_eq!(err, LedgerError::InvalidAmount(0));

    assert_eq!(store.transfer_count(), 0);
}
