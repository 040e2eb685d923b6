use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::locks::LockMap;
use crate::domain::account::Amount;
use crate::domain::challenge::{Challenge, ChallengeState, generate_code};
use crate::domain::ports::{ChallengeStore, RowLock, TransactionLedger};
use crate::domain::transaction::{Transaction, TransactionState};
use crate::domain::{BillItemId, PayerId, TransactionId};
use crate::error::{PaymentError, Result};

/// Column family for payment transactions.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column family for one-time-code challenges.
pub const CF_CHALLENGES: &str = "challenges";

/// Persistent store for the state the saga itself owns: transactions and
/// challenges. Values are serde_json, keys are big-endian ids.
///
/// Row and consume exclusivity stay in-process, the same way the in-memory
/// stores provide them; RocksDB only adds durability underneath.
/// `Clone` shares the underlying handle and locks.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
    row_locks: Arc<LockMap>,
    consume_lock: Arc<Mutex<()>>,
    next_transaction_id: Arc<AtomicU64>,
    next_challenge_id: Arc<AtomicU64>,
    ttl: Duration,
    code_length: usize,
}

impl RocksStore {
    /// Opens or creates the database, ensuring both column families exist.
    /// Id counters resume from the highest persisted key.
    pub fn open<P: AsRef<Path>>(path: P, ttl: Duration, code_length: usize) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_transactions = ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default());
        let cf_challenges = ColumnFamilyDescriptor::new(CF_CHALLENGES, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_transactions, cf_challenges])?;
        let db = Arc::new(db);

        let next_transaction_id = Self::max_id(&db, CF_TRANSACTIONS)?;
        let next_challenge_id = Self::max_id(&db, CF_CHALLENGES)?;

        Ok(Self {
            db,
            row_locks: Arc::new(LockMap::default()),
            consume_lock: Arc::new(Mutex::new(())),
            next_transaction_id: Arc::new(AtomicU64::new(next_transaction_id)),
            next_challenge_id: Arc::new(AtomicU64::new(next_challenge_id)),
            ttl,
            code_length,
        })
    }

    fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily> {
        db.cf_handle(name)
            .ok_or_else(|| PaymentError::StorageError(format!("missing column family {name}")))
    }

    fn max_id(db: &DB, name: &str) -> Result<u64> {
        let cf = Self::cf(db, name)?;
        let mut max = 0;
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let bytes: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| PaymentError::StorageError(format!("bad key in {name}")))?;
            max = max.max(u64::from_be_bytes(bytes));
        }
        Ok(max)
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let cf = Self::cf(&self.db, CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_transaction(&self, tx: &Transaction) -> Result<()> {
        let cf = Self::cf(&self.db, CF_TRANSACTIONS)?;
        self.db
            .put_cf(cf, tx.id.to_be_bytes(), serde_json::to_vec(tx)?)?;
        Ok(())
    }

    fn scan_transactions(&self) -> Result<Vec<Transaction>> {
        let cf = Self::cf(&self.db, CF_TRANSACTIONS)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn put_challenge(&self, challenge: &Challenge) -> Result<()> {
        let cf = Self::cf(&self.db, CF_CHALLENGES)?;
        self.db
            .put_cf(cf, challenge.id.to_be_bytes(), serde_json::to_vec(challenge)?)?;
        Ok(())
    }

    fn scan_challenges(&self) -> Result<Vec<Challenge>> {
        let cf = Self::cf(&self.db, CF_CHALLENGES)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl TransactionLedger for RocksStore {
    async fn create(
        &self,
        payer: PayerId,
        bill_item: BillItemId,
        amount: Amount,
    ) -> Result<Transaction> {
        let id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed) + 1;
        let tx = Transaction::new(id, payer, bill_item, amount);
        self.put_transaction(&tx)?;
        Ok(tx)
    }

    async fn find_pending(
        &self,
        payer: PayerId,
        bill_item: BillItemId,
    ) -> Result<Vec<Transaction>> {
        let mut pending: Vec<Transaction> = self
            .scan_transactions()?
            .into_iter()
            .filter(|tx| tx.payer == payer && tx.bill_item == bill_item && tx.is_pending())
            .collect();
        pending.sort_by_key(|tx| tx.id);
        Ok(pending)
    }

    async fn lock_for_update(
        &self,
        id: TransactionId,
        payer: PayerId,
    ) -> Result<Option<(Transaction, RowLock)>> {
        let guard = self.row_locks.acquire(id).await;
        match self.get_transaction(id)? {
            Some(tx) if tx.payer == payer && tx.is_pending() => {
                Ok(Some((tx, RowLock::new(guard))))
            }
            _ => Ok(None),
        }
    }

    async fn complete(&self, id: TransactionId) -> Result<Transaction> {
        let mut tx = self
            .get_transaction(id)?
            .ok_or(PaymentError::TransactionNotFound)?;
        tx.state = TransactionState::Completed;
        self.put_transaction(&tx)?;
        Ok(tx)
    }

    async fn delete_pending(&self, id: TransactionId) -> Result<bool> {
        let _guard = self.row_locks.acquire(id).await;
        let removed = match self.get_transaction(id)? {
            Some(tx) if tx.is_pending() => {
                let cf = Self::cf(&self.db, CF_TRANSACTIONS)?;
                self.db.delete_cf(cf, id.to_be_bytes())?;
                true
            }
            _ => false,
        };
        if removed {
            self.row_locks.forget(id);
        }
        Ok(removed)
    }

    async fn list_by_payer(&self, payer: PayerId) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self
            .scan_transactions()?
            .into_iter()
            .filter(|tx| tx.payer == payer)
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(txs)
    }
}

#[async_trait]
impl ChallengeStore for RocksStore {
    async fn create(&self, transaction: TransactionId) -> Result<Challenge> {
        let _consume = self.consume_lock.lock().await;
        let existing = self.scan_challenges()?;
        let mut code = generate_code(self.code_length);
        while existing.iter().any(|c| c.is_active() && c.code == code) {
            code = generate_code(self.code_length);
        }
        let id = self.next_challenge_id.fetch_add(1, Ordering::Relaxed) + 1;
        let challenge = Challenge::new(id, transaction, code);
        self.put_challenge(&challenge)?;
        Ok(challenge)
    }

    async fn verify_and_consume(&self, code: &str) -> Result<TransactionId> {
        // The whole lookup-and-flip runs under one lock, which is what keeps
        // the code single-use under races.
        let _consume = self.consume_lock.lock().await;
        let mut challenge = self
            .scan_challenges()?
            .into_iter()
            .find(|c| c.is_active() && c.code == code)
            .ok_or(PaymentError::InvalidOrExpiredCode)?;

        if challenge.is_expired_at(Utc::now(), self.ttl) {
            challenge.state = ChallengeState::Expired;
            self.put_challenge(&challenge)?;
            return Err(PaymentError::InvalidOrExpiredCode);
        }

        challenge.state = ChallengeState::Used;
        self.put_challenge(&challenge)?;
        Ok(challenge.transaction)
    }

    async fn expire_by_transaction(&self, transaction: TransactionId) -> Result<()> {
        let _consume = self.consume_lock.lock().await;
        for mut challenge in self.scan_challenges()? {
            if challenge.transaction == transaction && challenge.is_active() {
                challenge.state = ChallengeState::Expired;
                self.put_challenge(&challenge)?;
            }
        }
        Ok(())
    }
}
