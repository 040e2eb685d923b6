use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{BillItemId, PayerId, TransactionId};

/// Crate-wide error type covering the payment saga and its stores.
///
/// Each step of the confirmation flow maps to a distinct kind so callers can
/// decide whether to retry, request a new code, or stop.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// The student has no unpaid bill item.
    #[error("no payable bill item")]
    NoPayableItem,

    /// The code does not match an active challenge, or its TTL has elapsed.
    #[error("one-time code is invalid or expired")]
    InvalidOrExpiredCode,

    /// No pending transaction matches the id and owner.
    #[error("transaction not found or already processed")]
    TransactionNotFound,

    /// The payable bill changed since the challenge was issued.
    #[error("payable bill changed since the code was issued, request a new code")]
    StaleBill,

    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: Decimal, required: Decimal },

    /// A collaborator was unreachable or timed out.
    #[error("{service} unavailable")]
    DownstreamUnavailable { service: &'static str },

    /// The ledger deduction succeeded but the bill could not be marked paid.
    /// The transaction stays pending; an operator must reconcile.
    #[error(
        "balance for payer {payer} was deducted by {amount} but bill {bill_item} was not marked \
         paid (transaction {transaction}); manual reconciliation required"
    )]
    NeedsReconciliation {
        transaction: TransactionId,
        payer: PayerId,
        bill_item: BillItemId,
        amount: Decimal,
    },

    #[error("ledger account not found")]
    AccountNotFound,

    #[error("bill item {0} not found")]
    BillNotFound(BillItemId),

    /// Marking an already-paid item is rejected, not silently accepted.
    #[error("bill item {0} is already paid")]
    AlreadyPaid(BillItemId),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("storage error: {0}")]
    StorageError(String),
}

pub type Result<T> = std::result::Result<T, PaymentError>;

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(e: rocksdb::Error) -> Self {
        PaymentError::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(e: serde_json::Error) -> Self {
        PaymentError::StorageError(e.to_string())
    }
}
