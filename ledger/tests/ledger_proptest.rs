//! Random transfer sequences keep the ledger consistent.

use std::sync::Arc;

use proptest::prelude::*;
use simplebank_common::Currency;
use simplebank_ledger::{
    CreateAccountParams, LedgerStore, MemoryStore, TransferEngine, TransferRequest,
};

fn transfers() -> impl Strategy<Value = Vec<(usize, usize, i64)>> {
    prop::collection::vec((0usize..4, 0usize..4, -5i64..500), 1..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_random_transfers_conserve_funds(
        openings in prop::collection::vec(0i64..1_000, 4),
        steps in transfers(),
    ) {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            let mut ids = Vec::new();
            for (i, opening) in openings.iter().enumerate() {
                let account = store
                    .create_account(
                        CreateAccountParams::new(format!("owner-{}", i), Currency::Cad)
                            .with_opening_balance(*opening),
                    )
                    .await
                    .unwrap();
                ids.push(account.id);
            }
            let engine = TransferEngine::new(Arc::new(store.clone()));

            let mut committed = 0u64;
            for (from, to, amount) in &steps {
                let result = engine
                    .execute(&TransferRequest::new(ids[*from], ids[*to], *amount))
                    .await;
                match result {
                    Ok(result) => {
                        committed += 1;
                        prop_assert_eq!(result.from_entry.amount, -amount);
                        prop_assert_eq!(result.to_entry.amount, *amount);
                    }
                    Err(err) => prop_assert!(*amount <= 0, "unexpected error {}", err),
                }
            }

            let report = store.verify_integrity().await.unwrap();
            prop_assert!(report.is_consistent(), "mismatches: {:?}", report.mismatches);
            prop_assert_eq!(report.total_balance, openings.iter().sum::<i64>());
            prop_assert_eq!(report.transfers, committed);
            Ok(())
        })?;
    }
}
