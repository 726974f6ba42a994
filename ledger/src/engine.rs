//! Core transfer engine implementation.
//!
//! One transfer is one unit of work:
//!
//! 1. lock both account rows, lower id first (re-validates existence),
//! 2. insert the transfer row,
//! 3. insert the debit entry on the source account,
//! 4. insert the credit entry on the destination account,
//! 5. apply both balance deltas, lower id first,
//! 6. commit.
//!
//! Any failure rolls the whole unit of work back. Because every transfer
//! touching a pair of accounts takes their row locks in the same order,
//! concurrent transfers in opposite directions cannot wait on each other in
//! a cycle.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use simplebank_common::{validate_transfer_amount, AccountId, LedgerError, Result};
use tracing::{debug, info, instrument, warn};

use crate::account::Account;
use crate::balance::{add_balance, has_sufficient_funds};
use crate::journal::{is_balanced, CreateEntryParams};
use crate::retry::RetryPolicy;
use crate::store::{LedgerStore, LedgerTx};
use crate::transfer::{CreateTransferParams, TransferRequest, TransferResult};

/// Policy decisions the engine enforces on every transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPolicy {
    /// Permit `from == to`, which records a net-zero pair of entries.
    pub allow_self_transfer: bool,
    /// Permit the source balance to go negative.
    pub allow_overdraft: bool,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            allow_self_transfer: true,
            allow_overdraft: true,
        }
    }
}

/// Return the two accounts in lock-acquisition order.
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// The transfer engine moves funds between two accounts atomically.
pub struct TransferEngine<S: LedgerStore> {
    store: Arc<S>,
    policy: TransferPolicy,
}

impl<S: LedgerStore> TransferEngine<S> {
    /// Create an engine with the default policy.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_policy(store, TransferPolicy::default())
    }

    /// Create an engine with an explicit policy.
    pub fn with_policy(store: Arc<S>, policy: TransferPolicy) -> Self {
        Self { store, policy }
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get the policy.
    pub fn policy(&self) -> TransferPolicy {
        self.policy
    }

    /// Check the request before any storage access.
    pub fn validate(&self, request: &TransferRequest) -> Result<()> {
        validate_transfer_amount(request.amount)?;
        if request.is_self_transfer() && !self.policy.allow_self_transfer {
            return Err(LedgerError::SelfTransfer(request.from_account_id));
        }
        Ok(())
    }

    /// Execute one transfer as a single unit of work.
    ///
    /// Either every row of the transfer is committed or none is. No retry is
    /// attempted here; see [`TransferEngine::execute_with_retry`].
    #[instrument(
        skip(self, request),
        fields(
            from = %request.from_account_id,
            to = %request.to_account_id,
            amount = request.amount
        )
    )]
    pub async fn execute(&self, request: &TransferRequest) -> Result<TransferResult> {
        self.validate(request)?;

        let mut tx = self.store.begin().await?;
        match self.transfer_in(&mut tx, request).await {
            Ok(result) => {
                tx.commit().await?;
                info!(
                    transfer_id = %result.transfer.id,
                    from_balance = result.from_account.balance,
                    to_balance = result.to_account.balance,
                    "Transfer committed"
                );
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                debug!(error = %err, "Transfer aborted");
                Err(err)
            }
        }
    }

    /// Execute one transfer, re-running the unit of work on conflicts.
    pub async fn execute_with_retry(
        &self,
        request: &TransferRequest,
        policy: &RetryPolicy,
    ) -> Result<TransferResult> {
        policy.run(|_| self.execute(request)).await
    }

    async fn transfer_in(&self, tx: &mut S::Tx, request: &TransferRequest) -> Result<TransferResult> {
        let from = request.from_account_id;
        let to = request.to_account_id;
        let amount = request.amount;

        let source = self.lock_accounts(tx, from, to).await?;
        if !self.policy.allow_overdraft && !has_sufficient_funds(&source, amount) {
            return Err(LedgerError::InsufficientFunds {
                account_id: from,
                balance: source.balance,
                required: amount,
            });
        }

        let transfer = tx
            .create_transfer(&CreateTransferParams {
                from_account_id: from,
                to_account_id: to,
                amount,
            })
            .await?;
        let from_entry = tx.create_entry(&CreateEntryParams::debit(from, amount)).await?;
        let to_entry = tx.create_entry(&CreateEntryParams::credit(to, amount)).await?;
        debug_assert!(is_balanced([&from_entry, &to_entry]));

        let (from_account, to_account) = if from < to {
            let from_account = add_balance(tx, from, -amount).await?;
            let to_account = add_balance(tx, to, amount).await?;
            (from_account, to_account)
        } else {
            let to_account = add_balance(tx, to, amount).await?;
            let from_account = add_balance(tx, from, -amount).await?;
            // Both deltas hit the same row; report the final state for both sides.
            let to_account = if from == to { from_account.clone() } else { to_account };
            (from_account, to_account)
        };

        Ok(TransferResult {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        })
    }

    /// Lock both rows in id order and return the source account.
    async fn lock_accounts(&self, tx: &mut S::Tx, from: AccountId, to: AccountId) -> Result<Account> {
        let (first, second) = lock_order(from, to);

        let first_account = tx.get_account_for_update(first).await?;
        if first == second {
            return Ok(first_account);
        }
        let second_account = tx.get_account_for_update(second).await?;

        Ok(if first == from { first_account } else { second_account })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::CreateAccountParams;
    use crate::journal::Entry;
    use crate::memory::{MemoryStore, MemoryTx};
    use crate::store::IntegrityReport;
    use crate::transfer::Transfer;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use simplebank_common::{Currency, TransferId};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum RowCall {
        Lock(AccountId),
        Add(AccountId),
    }

    type CallLog = Arc<Mutex<Vec<RowCall>>>;

    /// Memory store whose units of work log every row lock and balance delta.
    struct RecordingStore {
        inner: MemoryStore,
        calls: CallLog,
    }

    struct RecordingTx {
        inner: MemoryTx,
        calls: CallLog,
    }

    #[async_trait]
    impl LedgerTx for RecordingTx {
        async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
            self.calls.lock().push(RowCall::Lock(id));
            self.inner.get_account_for_update(id).await
        }

        async fn create_transfer(&mut self, params: &CreateTransferParams) -> Result<Transfer> {
            self.inner.create_transfer(params).await
        }

        async fn create_entry(&mut self, params: &CreateEntryParams) -> Result<Entry> {
            self.inner.create_entry(params).await
        }

        async fn add_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
            self.calls.lock().push(RowCall::Add(id));
            self.inner.add_balance(id, delta).await
        }

        async fn commit(self) -> Result<()> {
            self.inner.commit().await
        }

        async fn rollback(self) -> Result<()> {
            self.inner.rollback().await
        }
    }

    #[async_trait]
    impl LedgerStore for RecordingStore {
        type Tx = RecordingTx;

        async fn begin(&self) -> Result<RecordingTx> {
            Ok(RecordingTx {
                inner: self.inner.begin().await?,
                calls: self.calls.clone(),
            })
        }

        async fn create_account(&self, params: CreateAccountParams) -> Result<Account> {
            self.inner.create_account(params).await
        }

        async fn get_account(&self, id: AccountId) -> Result<Account> {
            self.inner.get_account(id).await
        }

        async fn list_accounts(&self, owner: Option<&str>) -> Result<Vec<Account>> {
            self.inner.list_accounts(owner).await
        }

        async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
            self.inner.get_transfer(id).await
        }

        async fn list_transfers(&self, account_id: Option<AccountId>) -> Result<Vec<Transfer>> {
            self.inner.list_transfers(account_id).await
        }

        async fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>> {
            self.inner.list_entries(account_id).await
        }

        async fn verify_integrity(&self) -> Result<IntegrityReport> {
            self.inner.verify_integrity().await
        }
    }

    async fn create_test_engine(policy: TransferPolicy) -> (TransferEngine<MemoryStore>, Account, Account) {
        let store = Arc::new(MemoryStore::new());
        let a = store
            .create_account(CreateAccountParams::new("alice", Currency::Usd).with_opening_balance(100))
            .await
            .unwrap();
        let b = store
            .create_account(CreateAccountParams::new("bob", Currency::Usd).with_opening_balance(50))
            .await
            .unwrap();
        (TransferEngine::with_policy(store, policy), a, b)
    }

    #[test]
    fn test_lock_order() {
        let low = AccountId::new(1);
        let high = AccountId::new(2);
        assert_eq!(lock_order(low, high), (low, high));
        assert_eq!(lock_order(high, low), (low, high));
        assert_eq!(lock_order(high, high), (high, high));
    }

    #[tokio::test]
    async fn test_rows_are_touched_lower_id_first() {
        let calls = CallLog::default();
        let store = RecordingStore {
            inner: MemoryStore::new(),
            calls: calls.clone(),
        };
        let low = store
            .create_account(CreateAccountParams::new("alice", Currency::Usd).with_opening_balance(100))
            .await
            .unwrap()
            .id;
        let high = store
            .create_account(CreateAccountParams::new("bob", Currency::Usd).with_opening_balance(50))
            .await
            .unwrap()
            .id;
        assert!(low < high);
        let engine = TransferEngine::new(Arc::new(store));

        for (from, to) in [(low, high), (high, low)] {
            calls.lock().clear();
            engine
                .execute(&TransferRequest::new(from, to, 10))
                .await
                .unwrap();

            assert_eq!(
                *calls.lock(),
                vec![
                    RowCall::Lock(low),
                    RowCall::Lock(high),
                    RowCall::Add(low),
                    RowCall::Add(high),
                ],
                "transfer {} -> {}",
                from,
                to
            );
        }

        calls.lock().clear();
        engine
            .execute(&TransferRequest::new(high, high, 10))
            .await
            .unwrap();
        assert_eq!(
            *calls.lock(),
            vec![RowCall::Lock(high), RowCall::Add(high), RowCall::Add(high)]
        );
    }

    #[tokio::test]
    async fn test_execute_transfer() {
        let (engine, a, b) = create_test_engine(TransferPolicy::default()).await;

        let result = engine
            .execute(&TransferRequest::new(a.id, b.id, 30))
            .await
            .unwrap();

        assert_eq!(result.transfer.amount, 30);
        assert_eq!(result.from_entry.amount, -30);
        assert_eq!(result.to_entry.amount, 30);
        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 80);
    }

    #[tokio::test]
    async fn test_reverse_direction_uses_same_result_shape() {
        let (engine, a, b) = create_test_engine(TransferPolicy::default()).await;

        let result = engine
            .execute(&TransferRequest::new(b.id, a.id, 20))
            .await
            .unwrap();

        assert_eq!(result.from_account.id, b.id);
        assert_eq!(result.from_account.balance, 30);
        assert_eq!(result.to_account.id, a.id);
        assert_eq!(result.to_account.balance, 120);
        assert_eq!(result.from_entry.account_id, b.id);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let (engine, a, b) = create_test_engine(TransferPolicy::default()).await;

        for amount in [0, -10] {
            let err = engine
                .execute(&TransferRequest::new(a.id, b.id, amount))
                .await
                .unwrap_err();
            assert_eq!(err, LedgerError::InvalidAmount(amount));
        }
        assert_eq!(engine.store().transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_self_transfer_nets_to_zero() {
        let (engine, a, _) = create_test_engine(TransferPolicy::default()).await;

        let result = engine
            .execute(&TransferRequest::new(a.id, a.id, 40))
            .await
            .unwrap();

        assert_eq!(result.from_account.balance, 100);
        assert_eq!(result.to_account.balance, 100);
        assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);
        assert!(engine.store().verify_integrity().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_self_transfer_rejected_by_policy() {
        let policy = TransferPolicy {
            allow_self_transfer: false,
            ..TransferPolicy::default()
        };
        let (engine, a, _) = create_test_engine(policy).await;

        let err = engine
            .execute(&TransferRequest::new(a.id, a.id, 40))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::SelfTransfer(a.id));
    }

    #[tokio::test]
    async fn test_overdraft_allowed_by_default() {
        let (engine, a, b) = create_test_engine(TransferPolicy::default()).await;

        let result = engine
            .execute(&TransferRequest::new(a.id, b.id, 1000))
            .await
            .unwrap();
        assert_eq!(result.from_account.balance, -900);
    }

    #[tokio::test]
    async fn test_overdraft_rejected_by_policy() {
        let policy = TransferPolicy {
            allow_overdraft: false,
            ..TransferPolicy::default()
        };
        let (engine, a, b) = create_test_engine(policy).await;

        let err = engine
            .execute(&TransferRequest::new(a.id, b.id, 101))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                account_id: a.id,
                balance: 100,
                required: 101,
            }
        );
        assert!(!err.is_retryable());
        assert_eq!(engine.store().get_account(a.id).await.unwrap().balance, 100);

        // Exactly the available balance is fine.
        engine
            .execute(&TransferRequest::new(a.id, b.id, 100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_account_is_not_found() {
        let (engine, a, _) = create_test_engine(TransferPolicy::default()).await;
        let ghost = AccountId::new(404);

        let err = engine
            .execute(&TransferRequest::new(a.id, ghost, 10))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountNotFound(ghost));
        assert_eq!(engine.store().transfer_count(), 0);
        assert_eq!(engine.store().get_account(a.id).await.unwrap().balance, 100);
    }
}
