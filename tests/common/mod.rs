use std::sync::Arc;

use rust_decimal::Decimal;
use tuipay::application::orchestrator::PaymentOrchestrator;
use tuipay::config::Settings;
use tuipay::domain::account::{Amount, Balance, LedgerAccount};
use tuipay::domain::bill::{BillItem, BillStatus};
use tuipay::domain::{Context, PayerId};
use tuipay::infrastructure::in_memory::{
    InMemoryBillRegistry, InMemoryChallengeStore, InMemoryLedgerStore, InMemoryTransactionLedger,
};
use tuipay::infrastructure::notify::RecordingNotifier;

/// Fully wired orchestrator plus handles on the underlying stores, so tests
/// can assert on state the public API does not expose.
pub struct TestSystem {
    pub orchestrator: PaymentOrchestrator,
    pub inbox: Arc<RecordingNotifier>,
    pub bills: Arc<InMemoryBillRegistry>,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub transactions: Arc<InMemoryTransactionLedger>,
}

pub fn account(payer: PayerId, balance: Decimal) -> LedgerAccount {
    LedgerAccount::new(payer, Balance::new(balance))
}

pub fn bill(id: u64, student: u64, amount: Decimal, year: &str, semester: u8) -> BillItem {
    BillItem {
        id,
        student,
        amount: Amount::new(amount).unwrap(),
        status: BillStatus::Unpaid,
        academic_year: year.to_string(),
        semester,
    }
}

pub fn ctx(payer: PayerId) -> Context {
    Context::new(payer, payer)
}

pub async fn system(accounts: Vec<LedgerAccount>, bills: Vec<BillItem>) -> TestSystem {
    system_with_settings(accounts, bills, Settings::default()).await
}

pub async fn system_with_settings(
    accounts: Vec<LedgerAccount>,
    bills: Vec<BillItem>,
    settings: Settings,
) -> TestSystem {
    let transactions = Arc::new(InMemoryTransactionLedger::new());
    let challenges = Arc::new(InMemoryChallengeStore::new(
        settings.code_ttl,
        settings.code_length,
    ));
    let ledger = Arc::new(InMemoryLedgerStore::seeded(accounts).await);
    let registry = Arc::new(InMemoryBillRegistry::seeded(bills).await);
    let inbox = Arc::new(RecordingNotifier::new());

    let orchestrator = PaymentOrchestrator::new(
        Arc::clone(&transactions) as _,
        Arc::clone(&challenges) as _,
        Arc::clone(&ledger) as _,
        Arc::clone(&registry) as _,
        Arc::clone(&inbox) as _,
        settings,
    );

    TestSystem {
        orchestrator,
        inbox,
        bills: registry,
        ledger,
        transactions,
    }
}
