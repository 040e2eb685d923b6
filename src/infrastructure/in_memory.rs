use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::locks::LockMap;
use crate::domain::account::{Amount, Balance, LedgerAccount};
use crate::domain::bill::{BillItem, BillStatus};
use crate::domain::challenge::{Challenge, ChallengeState, generate_code};
use crate::domain::ports::{BillRegistry, ChallengeStore, LedgerStore, RowLock, TransactionLedger};
use crate::domain::transaction::{Transaction, TransactionState};
use crate::domain::{BillItemId, ChallengeId, PayerId, StudentId, TransactionId};
use crate::error::{PaymentError, Result};

/// In-memory transaction ledger.
///
/// Rows live in an `Arc<RwLock<HashMap>>`; exclusivity for the confirmation
/// critical section comes from a per-id async mutex, the in-process
/// equivalent of `SELECT ... FOR UPDATE`.
pub struct InMemoryTransactionLedger {
    rows: Arc<RwLock<HashMap<TransactionId, Transaction>>>,
    locks: LockMap,
    next_id: AtomicU64,
}

impl Default for InMemoryTransactionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransactionLedger {
    pub fn new() -> Self {
        Self {
            rows: Arc::default(),
            locks: LockMap::default(),
            next_id: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl TransactionLedger for InMemoryTransactionLedger {
    async fn create(
        &self,
        payer: PayerId,
        bill_item: BillItemId,
        amount: Amount,
    ) -> Result<Transaction> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let tx = Transaction::new(id, payer, bill_item, amount);
        let mut rows = self.rows.write().await;
        rows.insert(id, tx.clone());
        Ok(tx)
    }

    async fn find_pending(
        &self,
        payer: PayerId,
        bill_item: BillItemId,
    ) -> Result<Vec<Transaction>> {
        let rows = self.rows.read().await;
        let mut pending: Vec<Transaction> = rows
            .values()
            .filter(|tx| tx.payer == payer && tx.bill_item == bill_item && tx.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|tx| tx.id);
        Ok(pending)
    }

    async fn lock_for_update(
        &self,
        id: TransactionId,
        payer: PayerId,
    ) -> Result<Option<(Transaction, RowLock)>> {
        let guard = self.locks.acquire(id).await;
        let rows = self.rows.read().await;
        match rows.get(&id) {
            Some(tx) if tx.payer == payer && tx.is_pending() => {
                Ok(Some((tx.clone(), RowLock::new(guard))))
            }
            _ => Ok(None),
        }
    }

    async fn complete(&self, id: TransactionId) -> Result<Transaction> {
        let mut rows = self.rows.write().await;
        let tx = rows.get_mut(&id).ok_or(PaymentError::TransactionNotFound)?;
        tx.state = TransactionState::Completed;
        Ok(tx.clone())
    }

    async fn delete_pending(&self, id: TransactionId) -> Result<bool> {
        let _guard = self.locks.acquire(id).await;
        let mut rows = self.rows.write().await;
        let is_pending = rows.get(&id).is_some_and(|tx| tx.is_pending());
        let removed = is_pending && rows.remove(&id).is_some();
        drop(rows);
        if removed {
            self.locks.forget(id);
        }
        Ok(removed)
    }

    async fn list_by_payer(&self, payer: PayerId) -> Result<Vec<Transaction>> {
        let rows = self.rows.read().await;
        let mut txs: Vec<Transaction> = rows
            .values()
            .filter(|tx| tx.payer == payer)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(txs)
    }
}

/// In-memory challenge store.
///
/// The whole verify-and-consume step runs under the map's write lock, which
/// is what makes the code single-use under races.
pub struct InMemoryChallengeStore {
    rows: Arc<RwLock<HashMap<ChallengeId, Challenge>>>,
    next_id: AtomicU64,
    ttl: Duration,
    code_length: usize,
}

impl InMemoryChallengeStore {
    pub fn new(ttl: Duration, code_length: usize) -> Self {
        Self {
            rows: Arc::default(),
            next_id: AtomicU64::new(0),
            ttl,
            code_length,
        }
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn create(&self, transaction: TransactionId) -> Result<Challenge> {
        let mut rows = self.rows.write().await;
        let mut code = generate_code(self.code_length);
        // Active codes must be unambiguous for lookup by code
        while rows.values().any(|c| c.is_active() && c.code == code) {
            code = generate_code(self.code_length);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let challenge = Challenge::new(id, transaction, code);
        rows.insert(id, challenge.clone());
        Ok(challenge)
    }

    async fn verify_and_consume(&self, code: &str) -> Result<TransactionId> {
        let mut rows = self.rows.write().await;
        let challenge = rows
            .values_mut()
            .find(|c| c.is_active() && c.code == code)
            .ok_or(PaymentError::InvalidOrExpiredCode)?;

        if challenge.is_expired_at(Utc::now(), self.ttl) {
            challenge.state = ChallengeState::Expired;
            return Err(PaymentError::InvalidOrExpiredCode);
        }

        challenge.state = ChallengeState::Used;
        Ok(challenge.transaction)
    }

    async fn expire_by_transaction(&self, transaction: TransactionId) -> Result<()> {
        let mut rows = self.rows.write().await;
        for challenge in rows.values_mut() {
            if challenge.transaction == transaction && challenge.is_active() {
                challenge.state = ChallengeState::Expired;
            }
        }
        Ok(())
    }
}

/// In-memory customer balance ledger.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    accounts: Arc<RwLock<HashMap<PayerId, LedgerAccount>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: LedgerAccount) {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.payer, account);
    }

    pub async fn seeded(accounts: impl IntoIterator<Item = LedgerAccount>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.insert(account).await;
        }
        store
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get(&self, payer: PayerId) -> Result<Option<LedgerAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&payer).cloned())
    }

    async fn conditional_deduct(&self, payer: PayerId, amount: Amount) -> Result<Balance> {
        // The check and the decrement share the write lock, so two deductions
        // for the same account can never both pass against a stale balance.
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&payer)
            .ok_or(PaymentError::AccountNotFound)?;
        account.deduct(amount)
    }
}

/// In-memory bill registry.
#[derive(Default)]
pub struct InMemoryBillRegistry {
    items: Arc<RwLock<HashMap<BillItemId, BillItem>>>,
}

impl InMemoryBillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, item: BillItem) {
        let mut items = self.items.write().await;
        items.insert(item.id, item);
    }

    pub async fn seeded(items: impl IntoIterator<Item = BillItem>) -> Self {
        let registry = Self::new();
        for item in items {
            registry.insert(item).await;
        }
        registry
    }

    pub async fn get(&self, id: BillItemId) -> Option<BillItem> {
        let items = self.items.read().await;
        items.get(&id).cloned()
    }
}

#[async_trait]
impl BillRegistry for InMemoryBillRegistry {
    async fn get_payable(&self, student: StudentId) -> Result<Option<BillItem>> {
        let items = self.items.read().await;
        let payable = items
            .values()
            .filter(|item| item.student == student && item.is_unpaid())
            .min_by(|a, b| {
                a.term()
                    .cmp(&b.term())
                    .then(a.id.cmp(&b.id))
            })
            .cloned();
        Ok(payable)
    }

    async fn mark_paid(&self, id: BillItemId) -> Result<BillItem> {
        let mut items = self.items.write().await;
        let item = items.get_mut(&id).ok_or(PaymentError::BillNotFound(id))?;
        if item.status == BillStatus::Paid {
            return Err(PaymentError::AlreadyPaid(id));
        }
        item.status = BillStatus::Paid;
        Ok(item.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(value: rust_decimal::Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn bill(id: BillItemId, student: StudentId, year: &str, semester: u8) -> BillItem {
        BillItem {
            id,
            student,
            amount: amount(dec!(150000)),
            status: BillStatus::Unpaid,
            academic_year: year.to_string(),
            semester,
        }
    }

    #[tokio::test]
    async fn payable_is_oldest_unpaid_term() {
        let registry = InMemoryBillRegistry::seeded([
            bill(1, 7, "2024-2025", 2),
            bill(2, 7, "2023-2024", 1),
            bill(3, 7, "2024-2025", 1),
        ])
        .await;

        let payable = registry.get_payable(7).await.unwrap().unwrap();
        assert_eq!(payable.id, 2);
    }

    #[tokio::test]
    async fn payable_skips_paid_items() {
        let mut oldest = bill(1, 7, "2023-2024", 1);
        oldest.status = BillStatus::Paid;
        let registry = InMemoryBillRegistry::seeded([oldest, bill(2, 7, "2024-2025", 1)]).await;

        let payable = registry.get_payable(7).await.unwrap().unwrap();
        assert_eq!(payable.id, 2);
    }

    #[tokio::test]
    async fn payable_none_when_everything_paid() {
        let mut only = bill(1, 7, "2024-2025", 1);
        only.status = BillStatus::Paid;
        let registry = InMemoryBillRegistry::seeded([only]).await;

        assert!(registry.get_payable(7).await.unwrap().is_none());
        assert!(registry.get_payable(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_paid_rejects_second_attempt() {
        let registry = InMemoryBillRegistry::seeded([bill(1, 7, "2024-2025", 1)]).await;

        let paid = registry.mark_paid(1).await.unwrap();
        assert_eq!(paid.status, BillStatus::Paid);

        assert!(matches!(
            registry.mark_paid(1).await,
            Err(PaymentError::AlreadyPaid(1))
        ));
        assert!(matches!(
            registry.mark_paid(42).await,
            Err(PaymentError::BillNotFound(42))
        ));
    }

    #[tokio::test]
    async fn conditional_deduct_checks_inside_the_store() {
        let ledger =
            InMemoryLedgerStore::seeded([LedgerAccount::new(1, Balance::new(dec!(100)))]).await;

        let new_balance = ledger.conditional_deduct(1, amount(dec!(60))).await.unwrap();
        assert_eq!(new_balance, Balance::new(dec!(40)));

        let err = ledger
            .conditional_deduct(1, amount(dec!(60)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InsufficientBalance { .. }));

        // First failure left the balance alone
        let account = ledger.get(1).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(40)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deducts_cannot_both_pass_on_stale_balance() {
        let ledger = Arc::new(
            InMemoryLedgerStore::seeded([LedgerAccount::new(1, Balance::new(dec!(100)))]).await,
        );

        let a = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.conditional_deduct(1, amount(dec!(60))).await })
        };
        let b = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.conditional_deduct(1, amount(dec!(60))).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);

        let account = ledger.get(1).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(40)));
    }

    #[tokio::test]
    async fn challenge_is_single_use() {
        let store = InMemoryChallengeStore::new(Duration::from_secs(300), 6);
        let challenge = store.create(9).await.unwrap();

        assert_eq!(store.verify_and_consume(&challenge.code).await.unwrap(), 9);
        assert!(matches!(
            store.verify_and_consume(&challenge.code).await,
            Err(PaymentError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn unknown_code_fails_verification() {
        let store = InMemoryChallengeStore::new(Duration::from_secs(300), 6);
        assert!(matches!(
            store.verify_and_consume("000000").await,
            Err(PaymentError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn expired_challenge_fails_even_if_never_used() {
        let store = InMemoryChallengeStore::new(Duration::ZERO, 6);
        let challenge = store.create(9).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(
            store.verify_and_consume(&challenge.code).await,
            Err(PaymentError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn expire_by_transaction_kills_active_code() {
        let store = InMemoryChallengeStore::new(Duration::from_secs(300), 6);
        let challenge = store.create(9).await.unwrap();

        store.expire_by_transaction(9).await.unwrap();
        assert!(matches!(
            store.verify_and_consume(&challenge.code).await,
            Err(PaymentError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn replayed_code_has_exactly_one_winner() {
        let store = Arc::new(InMemoryChallengeStore::new(Duration::from_secs(300), 6));
        let challenge = store.create(9).await.unwrap();

        let a = {
            let store = Arc::clone(&store);
            let code = challenge.code.clone();
            tokio::spawn(async move { store.verify_and_consume(&code).await })
        };
        let b = {
            let store = Arc::clone(&store);
            let code = challenge.code.clone();
            tokio::spawn(async move { store.verify_and_consume(&code).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(PaymentError::InvalidOrExpiredCode)
        )));
    }

    #[tokio::test]
    async fn ledger_create_assigns_sequential_ids() {
        let ledger = InMemoryTransactionLedger::new();
        let first = ledger.create(1, 10, amount(dec!(100))).await.unwrap();
        let second = ledger.create(1, 11, amount(dec!(100))).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(first.is_pending());
    }

    #[tokio::test]
    async fn lock_for_update_filters_state_and_owner() {
        let ledger = InMemoryTransactionLedger::new();
        let tx = ledger.create(1, 10, amount(dec!(100))).await.unwrap();

        // Wrong owner
        assert!(ledger.lock_for_update(tx.id, 2).await.unwrap().is_none());

        // Completed row no longer locks
        {
            let (row, _lock) = ledger.lock_for_update(tx.id, 1).await.unwrap().unwrap();
            assert_eq!(row.id, tx.id);
            ledger.complete(tx.id).await.unwrap();
        }
        assert!(ledger.lock_for_update(tx.id, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_pending_is_idempotent() {
        let ledger = InMemoryTransactionLedger::new();
        let tx = ledger.create(1, 10, amount(dec!(100))).await.unwrap();

        assert!(ledger.delete_pending(tx.id).await.unwrap());
        assert!(!ledger.delete_pending(tx.id).await.unwrap());
        assert!(!ledger.delete_pending(999).await.unwrap());

        let completed = ledger.create(1, 10, amount(dec!(100))).await.unwrap();
        ledger.complete(completed.id).await.unwrap();
        assert!(!ledger.delete_pending(completed.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_by_payer_is_newest_first() {
        let ledger = InMemoryTransactionLedger::new();
        ledger.create(1, 10, amount(dec!(100))).await.unwrap();
        ledger.create(1, 11, amount(dec!(100))).await.unwrap();
        ledger.create(2, 12, amount(dec!(100))).await.unwrap();

        let txs = ledger.list_by_payer(1).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert!(txs[0].id > txs[1].id);
    }
}
