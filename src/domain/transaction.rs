use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::Amount;
use super::{BillItemId, PayerId, TransactionId};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Pending,
    Completed,
}

/// A payment attempt, the single source of truth for "has this payment
/// happened".
///
/// State machine: `Pending → Completed` exactly once on successful
/// confirmation; a pending row superseded by a resend or cancelled is deleted
/// outright. Nothing leaves `Completed`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub payer: PayerId,
    pub bill_item: BillItemId,
    /// Snapshot of the bill amount at challenge time, not re-read at
    /// confirmation.
    pub amount: Amount,
    pub state: TransactionState,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(id: TransactionId, payer: PayerId, bill_item: BillItemId, amount: Amount) -> Self {
        Self {
            id,
            payer,
            bill_item,
            amount,
            state: TransactionState::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == TransactionState::Pending
    }

    /// Display code shown on receipts and statements.
    pub fn code(&self) -> String {
        format!("TXN{:08}", self.id)
    }
}
