//! Core domain types for the tuition payment saga.

pub mod account;
pub mod bill;
pub mod challenge;
pub mod ports;
pub mod transaction;

/// Identifier of a paying customer (the ledger account owner).
pub type PayerId = u64;

/// Identifier of the student whose bills are being paid.
pub type StudentId = u64;

/// Identifier of a payment transaction.
pub type TransactionId = u64;

/// Identifier of a bill line item.
pub type BillItemId = u64;

/// Identifier of an issued challenge.
pub type ChallengeId = u64;

/// Request-scoped context passed explicitly into every orchestrator call.
///
/// Carries the authenticated payer (credential verification happens upstream)
/// and a correlation id for log stitching. There is no ambient session state.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub payer: PayerId,
    pub request: u64,
}

impl Context {
    pub fn new(payer: PayerId, request: u64) -> Self {
        Self { payer, request }
    }
}
