use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;

use bank_ledger::transfer::adapters::{FailPoint, MemoryStore};
use bank_ledger::transfer::{
    CreateAccountParams, ErrorKind, LedgerError, OverdraftPolicy, Queries, Store, TransferService,
    TransferSettings, TransferTxParams, exec_tx,
};

/// Helper to open an account in the ledger's default currency
async fn open(store: &MemoryStore, owner: &str, balance: i64) -> i64 {
    store
        .create_account(CreateAccountParams {
            owner: owner.to_string(),
            balance,
            currency: "USD".to_string(),
        })
        .await
        .unwrap()
        .id
}

fn service(store: &Arc<MemoryStore>, settings: TransferSettings) -> Arc<TransferService<MemoryStore>> {
    Arc::new(TransferService::new(Arc::clone(store), settings))
}

#[tokio::test]
async fn qa_tc_transfer_moves_money_and_writes_two_entries() {
    let store = Arc::new(MemoryStore::new());
    let alice = open(&store, "alice", 1_000).await;
    let bob = open(&store, "bob", 500).await;
    let ledger = service(&store, TransferSettings::default());

    let res = ledger
        .transfer_tx(TransferTxParams::new(alice, bob, 100))
        .await
        .unwrap();

    assert_eq!(res.from_account.balance, 900);
    assert_eq!(res.to_account.balance, 600);
    assert_eq!(res.from_entry.amount + res.to_entry.amount, 0);

    // The JSON printed by the CLI carries every record
    let json = serde_json::to_value(&res).unwrap();
    assert_eq!(json["transfer"]["amount"], 100);
    assert_eq!(json["from_entry"]["amount"], -100);
    assert_eq!(json["to_account"]["balance"], 600);
}

#[tokio::test]
async fn qa_tc_rejected_transfers_leave_no_trace() {
    let store = Arc::new(MemoryStore::new());
    let alice = open(&store, "alice", 30).await;
    let bob = open(&store, "bob", 0).await;
    let ledger = service(
        &store,
        TransferSettings {
            overdraft: OverdraftPolicy::Reject,
            deadline: None,
        },
    );

    let cases = [
        (TransferTxParams::new(alice, bob, 0), ErrorKind::InvalidArgument),
        (TransferTxParams::new(alice, bob, -7), ErrorKind::InvalidArgument),
        (TransferTxParams::new(alice, 404, 10), ErrorKind::AccountNotFound),
        (TransferTxParams::new(alice, bob, 31), ErrorKind::InsufficientFunds),
    ];
    for (params, kind) in cases {
        let err = ledger.transfer_tx(params).await.unwrap_err();
        assert_eq!(err.kind(), kind, "{:?}", params);
        assert!(!err.is_retryable());
    }

    assert_eq!(store.get_account(alice).await.unwrap().balance, 30);
    assert_eq!(store.get_account(bob).await.unwrap().balance, 0);
    assert_eq!(store.entry_count().unwrap(), 0);
    assert_eq!(store.transfer_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn qa_tc_crossing_transfers_complete() {
    let store = Arc::new(MemoryStore::with_lock_timeout(Duration::from_millis(300)));
    let alice = open(&store, "alice", 1_000).await;
    let bob = open(&store, "bob", 1_000).await;
    let carol = open(&store, "carol", 1_000).await;
    let ledger = service(&store, TransferSettings::default());

    // Every pair in both directions at once
    let pairs = [
        (alice, bob),
        (bob, alice),
        (bob, carol),
        (carol, bob),
        (carol, alice),
        (alice, carol),
    ];
    let start = Arc::new(Barrier::new(pairs.len() * 5));
    let mut handles = Vec::new();
    for round in 0..5 {
        for &(from, to) in &pairs {
            let ledger = Arc::clone(&ledger);
            let start = Arc::clone(&start);
            let params = TransferTxParams::new(from, to, 10 + round);
            handles.push(tokio::spawn(async move {
                start.wait().await;
                ledger.transfer_tx(params).await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for id in [alice, bob, carol] {
        assert_eq!(store.get_account(id).await.unwrap().balance, 1_000);
    }
    assert_eq!(store.transfer_count().unwrap(), 30);
    assert_eq!(store.entry_count().unwrap(), 60);
}

#[tokio::test]
async fn qa_tc_storage_failure_is_atomic() {
    let store = Arc::new(MemoryStore::new());
    let alice = open(&store, "alice", 1_000).await;
    let bob = open(&store, "bob", 500).await;
    let ledger = service(&store, TransferSettings::default());

    store.inject_failure(
        FailPoint::AddAccountBalance,
        LedgerError::TransientStorage("connection reset".into()),
    );
    let err = ledger
        .transfer_tx(TransferTxParams::new(alice, bob, 100))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    assert_eq!(store.get_account(alice).await.unwrap().balance, 1_000);
    assert_eq!(store.get_account(bob).await.unwrap().balance, 500);
    assert!(store.list_transfers(alice, bob).await.unwrap().is_empty());
}

#[tokio::test]
async fn qa_tc_exec_tx_runs_custom_unit_of_work() {
    let store = MemoryStore::new();
    let alice = open(&store, "alice", 100).await;

    let balance = exec_tx(&store, move |q| {
        Box::pin(async move {
            q.add_account_balance(alice, 25).await?;
            let account = q.add_account_balance(alice, 25).await?;
            Ok(account.balance)
        })
    })
    .await
    .unwrap();

    assert_eq!(balance, 150);
    assert_eq!(store.get_account(alice).await.unwrap().balance, 150);
}

#[tokio::test]
async fn qa_tc_cross_currency_transfer_rejected_after_locking() {
    let store = Arc::new(MemoryStore::new());
    let usd = open(&store, "alice", 1_000).await;
    let eur = store
        .create_account(CreateAccountParams {
            owner: "bob".to_string(),
            balance: 1_000,
            currency: "EUR".to_string(),
        })
        .await
        .unwrap()
        .id;
    let ledger = service(&store, TransferSettings::default());

    for params in [
        TransferTxParams::new(usd, eur, 100),
        TransferTxParams::new(eur, usd, 100),
    ] {
        let err = ledger.transfer_tx(params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("currency mismatch"));
    }

    assert_eq!(store.get_account(usd).await.unwrap().balance, 1_000);
    assert_eq!(store.get_account(eur).await.unwrap().balance, 1_000);
    assert_eq!(store.transfer_count().unwrap(), 0);

    // Both row locks were released by the rollback
    let other = open(&store, "carol", 0).await;
    ledger
        .transfer_tx(TransferTxParams::new(usd, other, 1))
        .await
        .unwrap();
}
