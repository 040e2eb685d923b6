use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use super::account::{Amount, Balance, LedgerAccount};
use super::bill::{BillItem, BillSummary};
use super::challenge::Challenge;
use super::transaction::Transaction;
use super::{BillItemId, PayerId, StudentId, TransactionId};
use crate::error::Result;

/// Exclusive hold on one transaction row.
///
/// Dropping the guard releases the row. While held, no other caller can pass
/// `lock_for_update` or `delete_pending` for the same id.
pub struct RowLock {
    _guard: OwnedMutexGuard<()>,
}

impl RowLock {
    pub fn new(guard: OwnedMutexGuard<()>) -> Self {
        Self { _guard: guard }
    }
}

/// The payment-attempt store: the single source of truth for whether a
/// payment happened.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Inserts a new pending transaction and returns it with its assigned id.
    async fn create(
        &self,
        payer: PayerId,
        bill_item: BillItemId,
        amount: Amount,
    ) -> Result<Transaction>;

    /// Pending transactions for a (payer, bill item) pair. The invariant
    /// keeps this to at most one row, but the resend cleanup sweeps whatever
    /// it finds.
    async fn find_pending(&self, payer: PayerId, bill_item: BillItemId)
    -> Result<Vec<Transaction>>;

    /// Waits for the row lock, then returns the row iff it is still pending
    /// and owned by `payer`. The returned [`RowLock`] keeps the row exclusive
    /// for the caller's critical section.
    async fn lock_for_update(
        &self,
        id: TransactionId,
        payer: PayerId,
    ) -> Result<Option<(Transaction, RowLock)>>;

    /// Transitions a pending transaction to completed. Callers must hold the
    /// row lock.
    async fn complete(&self, id: TransactionId) -> Result<Transaction>;

    /// Deletes the transaction iff still pending, taking the row lock so a
    /// delete cannot race a confirmation. Returns whether a row was removed.
    async fn delete_pending(&self, id: TransactionId) -> Result<bool>;

    /// All transactions for a payer, newest first.
    async fn list_by_payer(&self, payer: PayerId) -> Result<Vec<Transaction>>;
}

/// The one-time-code store.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Creates an active challenge bound to `transaction` and returns it,
    /// code included.
    async fn create(&self, transaction: TransactionId) -> Result<Challenge>;

    /// Looks up an active, unexpired challenge by code and consumes it in the
    /// same step. Concurrent calls with the same code have exactly one
    /// winner; everyone else gets `InvalidOrExpiredCode`.
    async fn verify_and_consume(&self, code: &str) -> Result<TransactionId>;

    /// Expires any active challenge bound to `transaction`.
    async fn expire_by_transaction(&self, transaction: TransactionId) -> Result<()>;
}

/// The customer balance ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, payer: PayerId) -> Result<Option<LedgerAccount>>;

    /// Deducts `amount` iff the balance covers it, atomically under
    /// concurrent callers on the same account. Returns the new balance.
    async fn conditional_deduct(&self, payer: PayerId, amount: Amount) -> Result<Balance>;
}

/// The bill registry.
#[async_trait]
pub trait BillRegistry: Send + Sync {
    /// The oldest unpaid item for a student, or `None` when everything is
    /// paid or the student is unknown.
    async fn get_payable(&self, student: StudentId) -> Result<Option<BillItem>>;

    /// Marks an item paid. Fails with `AlreadyPaid` rather than silently
    /// succeeding, which makes the call safe to retry.
    async fn mark_paid(&self, item: BillItemId) -> Result<BillItem>;
}

/// Out-of-band message to a payer.
#[derive(Debug, Clone)]
pub enum Notice {
    /// The one-time code for a pending payment, with the billed item and the
    /// code's validity window.
    OneTimeCode {
        code: String,
        bill: BillSummary,
        valid_for: Duration,
    },
    /// Payment receipt after a completed confirmation.
    Receipt {
        transaction: Transaction,
        new_balance: Balance,
    },
}

/// Outbound notification channel. Always best-effort: failures are logged by
/// the caller, never turned into request failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, payer: PayerId, notice: Notice) -> Result<()>;
}

pub type TransactionLedgerRef = Arc<dyn TransactionLedger>;
pub type ChallengeStoreRef = Arc<dyn ChallengeStore>;
pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type BillRegistryRef = Arc<dyn BillRegistry>;
pub type NotifierRef = Arc<dyn Notifier>;
