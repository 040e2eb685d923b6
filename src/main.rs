use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tuipay::application::orchestrator::PaymentOrchestrator;
use tuipay::config::Settings;
use tuipay::domain::ports::{ChallengeStoreRef, TransactionLedgerRef};
use tuipay::domain::{Context, PayerId};
use tuipay::infrastructure::in_memory::{
    InMemoryBillRegistry, InMemoryChallengeStore, InMemoryLedgerStore, InMemoryTransactionLedger,
};
use tuipay::infrastructure::notify::RecordingNotifier;
use tuipay::interfaces::csv::{
    AccountReader, BillReader, HistoryWriter, ScenarioOp, ScenarioReader,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario CSV file (issue/confirm/cancel steps)
    scenario: PathBuf,

    /// Ledger accounts CSV (payer, balance)
    #[arg(long)]
    accounts: PathBuf,

    /// Bill items CSV (id, student, amount, status, academic_year, semester)
    #[arg(long)]
    bills: PathBuf,

    /// One-time code validity in seconds
    #[arg(long, default_value_t = 300)]
    code_ttl_secs: u64,

    /// Number of digits in a one-time code
    #[arg(long, default_value_t = 6)]
    code_length: usize,

    /// Path to persistent database (optional). If provided, transactions and
    /// challenges are stored in RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings {
        code_ttl: Duration::from_secs(cli.code_ttl_secs),
        code_length: cli.code_length,
        ..Settings::default()
    };

    let accounts_file = File::open(&cli.accounts).into_diagnostic()?;
    let accounts = AccountReader::new(accounts_file)
        .accounts()
        .collect::<tuipay::error::Result<Vec<_>>>()
        .into_diagnostic()?;

    let bills_file = File::open(&cli.bills).into_diagnostic()?;
    let bill_items = BillReader::new(bills_file)
        .bills()
        .collect::<tuipay::error::Result<Vec<_>>>()
        .into_diagnostic()?;

    let ledger = Arc::new(InMemoryLedgerStore::seeded(accounts).await);
    let bills = Arc::new(InMemoryBillRegistry::seeded(bill_items).await);
    let inbox = Arc::new(RecordingNotifier::new());

    #[cfg(feature = "storage-rocksdb")]
    let (transactions, challenges): (TransactionLedgerRef, ChallengeStoreRef) =
        if let Some(db_path) = cli.db_path {
            let store = tuipay::infrastructure::rocksdb::RocksStore::open(
                db_path,
                settings.code_ttl,
                settings.code_length,
            )
            .into_diagnostic()?;
            (Arc::new(store.clone()), Arc::new(store))
        } else {
            (
                Arc::new(InMemoryTransactionLedger::new()),
                Arc::new(InMemoryChallengeStore::new(
                    settings.code_ttl,
                    settings.code_length,
                )),
            )
        };
    #[cfg(not(feature = "storage-rocksdb"))]
    let (transactions, challenges): (TransactionLedgerRef, ChallengeStoreRef) = (
        Arc::new(InMemoryTransactionLedger::new()),
        Arc::new(InMemoryChallengeStore::new(
            settings.code_ttl,
            settings.code_length,
        )),
    );

    let orchestrator = PaymentOrchestrator::new(
        transactions,
        challenges,
        ledger,
        bills,
        Arc::clone(&inbox) as _,
        settings,
    );

    let scenario_file = File::open(&cli.scenario).into_diagnostic()?;
    let mut payers: Vec<PayerId> = Vec::new();
    for (index, step) in ScenarioReader::new(scenario_file).steps().enumerate() {
        let request = index as u64 + 1;
        let step = match step {
            Ok(step) => step,
            Err(e) => {
                warn!(request, error = %e, "skipping malformed scenario step");
                continue;
            }
        };
        if !payers.contains(&step.payer) {
            payers.push(step.payer);
        }
        let ctx = Context::new(step.payer, request);

        match step.op {
            ScenarioOp::Issue => {
                let Some(student) = step.student else {
                    warn!(request, "issue step missing student");
                    continue;
                };
                match orchestrator.request_challenge(ctx, student).await {
                    Ok(ticket) => info!(
                        request,
                        transaction = ticket.transaction,
                        bill_item = ticket.bill.id,
                        "challenge requested"
                    ),
                    Err(e) => warn!(request, error = %e, "challenge request failed"),
                }
            }
            ScenarioOp::Confirm => {
                let Some(student) = step.student else {
                    warn!(request, "confirm step missing student");
                    continue;
                };
                // An empty code column means "whatever was last delivered"
                let code = match step.code {
                    Some(code) => code,
                    None => match inbox.last_code(step.payer).await {
                        Some(code) => code,
                        None => {
                            warn!(request, payer = step.payer, "no delivered code to confirm with");
                            continue;
                        }
                    },
                };
                match orchestrator.confirm_payment(ctx, &code, student).await {
                    Ok(receipt) => info!(
                        request,
                        transaction = receipt.transaction.id,
                        new_balance = %receipt.new_balance,
                        "payment confirmed"
                    ),
                    Err(e) => warn!(request, error = %e, "confirmation failed"),
                }
            }
            ScenarioOp::Cancel => {
                let Some(transaction) = step.transaction else {
                    warn!(request, "cancel step missing transaction");
                    continue;
                };
                if let Err(e) = orchestrator.cancel_transaction(ctx, transaction).await {
                    warn!(request, error = %e, "cancellation failed");
                }
            }
        }
    }

    let mut entries = Vec::with_capacity(payers.len());
    for payer in payers {
        let history = orchestrator
            .history(Context::new(payer, 0))
            .await
            .into_diagnostic()?;
        entries.push((payer, history));
    }

    let stdout = io::stdout();
    let mut writer = HistoryWriter::new(stdout.lock());
    writer.write_history(entries).into_diagnostic()?;

    Ok(())
}
