use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::domain::account::Balance;
use crate::domain::bill::BillSummary;
use crate::domain::ports::{
    BillRegistryRef, ChallengeStoreRef, LedgerStoreRef, Notice, NotifierRef, TransactionLedgerRef,
};
use crate::domain::transaction::Transaction;
use crate::domain::{BillItemId, Context, StudentId, TransactionId};
use crate::error::{PaymentError, Result};

/// Response to a challenge request: the pending transaction plus a display
/// summary of the billed item. The code itself travels out-of-band.
#[derive(Debug, Clone)]
pub struct ChallengeTicket {
    pub transaction: TransactionId,
    pub bill: BillSummary,
    pub expires_in: Duration,
}

/// Response to a successful confirmation.
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub transaction: Transaction,
    pub new_balance: Balance,
}

/// Coordinates the payment confirmation saga across the four stores.
///
/// The orchestrator owns no durable state of its own: everything it knows is
/// what it writes into the transaction ledger and the challenge store. All
/// collaborators are reached through the narrow ports, each call bounded by
/// the configured timeout.
pub struct PaymentOrchestrator {
    transactions: TransactionLedgerRef,
    challenges: ChallengeStoreRef,
    ledger: LedgerStoreRef,
    bills: BillRegistryRef,
    notifier: NotifierRef,
    settings: Settings,
}

impl PaymentOrchestrator {
    pub fn new(
        transactions: TransactionLedgerRef,
        challenges: ChallengeStoreRef,
        ledger: LedgerStoreRef,
        bills: BillRegistryRef,
        notifier: NotifierRef,
        settings: Settings,
    ) -> Self {
        Self {
            transactions,
            challenges,
            ledger,
            bills,
            notifier,
            settings,
        }
    }

    /// Issues a one-time code for the payer's next payable bill.
    ///
    /// Superseding an earlier pending attempt for the same item (the resend
    /// path) is best-effort: its failure is logged, never surfaced.
    pub async fn request_challenge(
        &self,
        ctx: Context,
        student: StudentId,
    ) -> Result<ChallengeTicket> {
        let item = self
            .call("bill registry", self.bills.get_payable(student))
            .await?
            .ok_or(PaymentError::NoPayableItem)?;

        self.supersede_pending(ctx, item.id).await;

        let tx = self
            .transactions
            .create(ctx.payer, item.id, item.amount)
            .await?;
        let challenge = self
            .call("challenge store", self.challenges.create(tx.id))
            .await?;
        info!(
            request = ctx.request,
            payer = ctx.payer,
            transaction = tx.id,
            bill_item = item.id,
            "challenge issued"
        );

        let bill = BillSummary::from(&item);
        let delivery = self
            .call(
                "notifier",
                self.notifier.send(
                    ctx.payer,
                    Notice::OneTimeCode {
                        code: challenge.code.clone(),
                        bill: bill.clone(),
                        valid_for: self.settings.code_ttl,
                    },
                ),
            )
            .await;
        if let Err(e) = delivery {
            // The transaction and challenge stay valid until they expire
            warn!(
                request = ctx.request,
                payer = ctx.payer,
                transaction = tx.id,
                error = %e,
                "code delivery failed"
            );
        }

        Ok(ChallengeTicket {
            transaction: tx.id,
            bill,
            expires_in: self.settings.code_ttl,
        })
    }

    /// Confirms a payment with a one-time code.
    ///
    /// Everything up to and including the ledger deduction fails closed: the
    /// transaction stays pending and nothing has moved. A mark-paid failure
    /// after the deduction is the one non-compensable state and comes back as
    /// [`PaymentError::NeedsReconciliation`].
    pub async fn confirm_payment(
        &self,
        ctx: Context,
        code: &str,
        student: StudentId,
    ) -> Result<PaymentReceipt> {
        let tx_id = self
            .call("challenge store", self.challenges.verify_and_consume(code))
            .await?;

        // Row lock held for the rest of the confirmation; concurrent
        // attempts and cancellations for this id queue up behind it.
        let Some((tx, _row)) = self.transactions.lock_for_update(tx_id, ctx.payer).await? else {
            return Err(PaymentError::TransactionNotFound);
        };

        // The bill set may have changed since the code was issued
        let payable = self
            .call("bill registry", self.bills.get_payable(student))
            .await?;
        if payable.as_ref().map(|item| item.id) != Some(tx.bill_item) {
            return Err(PaymentError::StaleBill);
        }

        // Advisory read; the store re-checks under its own lock on deduction
        let account = self
            .call("ledger", self.ledger.get(ctx.payer))
            .await?
            .ok_or(PaymentError::AccountNotFound)?;
        if !account.balance.covers(tx.amount) {
            return Err(PaymentError::InsufficientBalance {
                balance: account.balance.value(),
                required: tx.amount.value(),
            });
        }

        let new_balance = self
            .call(
                "ledger",
                self.ledger.conditional_deduct(ctx.payer, tx.amount),
            )
            .await?;
        // Logged before mark-paid so the partial state is reconstructable
        // from the log alone
        info!(
            request = ctx.request,
            payer = ctx.payer,
            transaction = tx.id,
            amount = %tx.amount,
            new_balance = %new_balance,
            "balance deducted"
        );

        if let Err(e) = self
            .call("bill registry", self.bills.mark_paid(tx.bill_item))
            .await
        {
            error!(
                request = ctx.request,
                payer = ctx.payer,
                transaction = tx.id,
                bill_item = tx.bill_item,
                error = %e,
                "deduction applied but bill not marked paid; transaction left pending for reconciliation"
            );
            return Err(PaymentError::NeedsReconciliation {
                transaction: tx.id,
                payer: ctx.payer,
                bill_item: tx.bill_item,
                amount: tx.amount.value(),
            });
        }

        let completed = self.transactions.complete(tx.id).await?;
        info!(
            request = ctx.request,
            payer = ctx.payer,
            transaction = completed.id,
            code = %completed.code(),
            "payment completed"
        );

        // Receipt delivery is detached; its failure never unwinds the payment
        let notifier = Arc::clone(&self.notifier);
        let receipt_tx = completed.clone();
        let payer = ctx.payer;
        tokio::spawn(async move {
            if let Err(e) = notifier
                .send(
                    payer,
                    Notice::Receipt {
                        transaction: receipt_tx,
                        new_balance,
                    },
                )
                .await
            {
                warn!(payer, error = %e, "receipt delivery failed");
            }
        });

        Ok(PaymentReceipt {
            transaction: completed,
            new_balance,
        })
    }

    /// Cancels a pending transaction and expires its challenge.
    ///
    /// Cancelling a transaction that is gone or already completed is a no-op
    /// success; the delete takes the row lock, so it cannot race a running
    /// confirmation.
    pub async fn cancel_transaction(&self, ctx: Context, transaction: TransactionId) -> Result<()> {
        let deleted = self.transactions.delete_pending(transaction).await?;
        if deleted {
            info!(
                request = ctx.request,
                payer = ctx.payer,
                transaction,
                "pending transaction cancelled"
            );
            if let Err(e) = self.challenges.expire_by_transaction(transaction).await {
                warn!(
                    request = ctx.request,
                    transaction,
                    error = %e,
                    "challenge expiry failed during cancel"
                );
            }
        }
        Ok(())
    }

    /// All payment attempts for the payer, newest first.
    pub async fn history(&self, ctx: Context) -> Result<Vec<Transaction>> {
        self.transactions.list_by_payer(ctx.payer).await
    }

    /// Best-effort cleanup of earlier pending attempts for the same item.
    async fn supersede_pending(&self, ctx: Context, bill_item: BillItemId) {
        let stale = match self.transactions.find_pending(ctx.payer, bill_item).await {
            Ok(stale) => stale,
            Err(e) => {
                warn!(
                    request = ctx.request,
                    payer = ctx.payer,
                    bill_item,
                    error = %e,
                    "pending cleanup skipped"
                );
                return;
            }
        };

        for old in stale {
            match self.transactions.delete_pending(old.id).await {
                Ok(true) => {
                    info!(
                        request = ctx.request,
                        payer = ctx.payer,
                        transaction = old.id,
                        "superseded pending transaction"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        request = ctx.request,
                        transaction = old.id,
                        error = %e,
                        "failed to delete superseded transaction"
                    );
                }
            }
            if let Err(e) = self.challenges.expire_by_transaction(old.id).await {
                warn!(
                    request = ctx.request,
                    transaction = old.id,
                    error = %e,
                    "failed to expire superseded challenge"
                );
            }
        }
    }

    /// Bounds a collaborator call with the configured timeout.
    async fn call<T>(
        &self,
        service: &'static str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.settings.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::DownstreamUnavailable { service }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{Amount, Balance, LedgerAccount};
    use crate::domain::bill::{BillItem, BillStatus};
    use crate::domain::ports::{BillRegistry, LedgerStore};
    use crate::domain::transaction::TransactionState;
    use crate::infrastructure::in_memory::{
        InMemoryBillRegistry, InMemoryChallengeStore, InMemoryLedgerStore,
        InMemoryTransactionLedger,
    };
    use crate::infrastructure::notify::RecordingNotifier;
    use rust_decimal_macros::dec;

    struct Harness {
        orchestrator: PaymentOrchestrator,
        inbox: Arc<RecordingNotifier>,
        bills: Arc<InMemoryBillRegistry>,
        ledger: Arc<InMemoryLedgerStore>,
    }

    async fn harness(balance: rust_decimal::Decimal, fee: rust_decimal::Decimal) -> Harness {
        let settings = Settings::default();
        let bills = Arc::new(
            InMemoryBillRegistry::seeded([BillItem {
                id: 100,
                student: 7,
                amount: Amount::new(fee).unwrap(),
                status: BillStatus::Unpaid,
                academic_year: "2024-2025".to_string(),
                semester: 1,
            }])
            .await,
        );
        let ledger = Arc::new(
            InMemoryLedgerStore::seeded([LedgerAccount::new(1, Balance::new(balance))]).await,
        );
        let inbox = Arc::new(RecordingNotifier::new());
        let orchestrator = PaymentOrchestrator::new(
            Arc::new(InMemoryTransactionLedger::new()),
            Arc::new(InMemoryChallengeStore::new(
                settings.code_ttl,
                settings.code_length,
            )),
            Arc::clone(&ledger) as _,
            Arc::clone(&bills) as _,
            Arc::clone(&inbox) as _,
            settings,
        );
        Harness {
            orchestrator,
            inbox,
            bills,
            ledger,
        }
    }

    fn ctx() -> Context {
        Context::new(1, 1)
    }

    #[tokio::test]
    async fn happy_path_completes_payment() {
        let h = harness(dec!(200000), dec!(150000)).await;

        let ticket = h.orchestrator.request_challenge(ctx(), 7).await.unwrap();
        assert_eq!(ticket.bill.id, 100);

        let code = h.inbox.last_code(1).await.unwrap();
        let receipt = h.orchestrator.confirm_payment(ctx(), &code, 7).await.unwrap();

        assert_eq!(receipt.new_balance, Balance::new(dec!(50000)));
        assert_eq!(receipt.transaction.state, TransactionState::Completed);
        assert_eq!(h.bills.get(100).await.unwrap().status, BillStatus::Paid);
    }

    #[tokio::test]
    async fn insufficient_balance_leaves_everything_unchanged() {
        let h = harness(dec!(100000), dec!(150000)).await;

        let ticket = h.orchestrator.request_challenge(ctx(), 7).await.unwrap();
        let code = h.inbox.last_code(1).await.unwrap();

        let err = h
            .orchestrator
            .confirm_payment(ctx(), &code, 7)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InsufficientBalance { .. }));

        let account = h.ledger.get(1).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(100000)));
        assert_eq!(h.bills.get(100).await.unwrap().status, BillStatus::Unpaid);

        let history = h.orchestrator.history(ctx()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, ticket.transaction);
        assert!(history[0].is_pending());
    }

    #[tokio::test]
    async fn no_payable_item_fails_challenge_request() {
        let h = harness(dec!(200000), dec!(150000)).await;
        h.bills.mark_paid(100).await.unwrap();

        let err = h.orchestrator.request_challenge(ctx(), 7).await.unwrap_err();
        assert!(matches!(err, PaymentError::NoPayableItem));
    }

    #[tokio::test]
    async fn wrong_code_is_rejected() {
        let h = harness(dec!(200000), dec!(150000)).await;
        h.orchestrator.request_challenge(ctx(), 7).await.unwrap();

        let code = h.inbox.last_code(1).await.unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };
        let err = h
            .orchestrator
            .confirm_payment(ctx(), wrong, 7)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidOrExpiredCode));
    }

    #[tokio::test]
    async fn confirming_for_another_payer_is_not_found() {
        let h = harness(dec!(200000), dec!(150000)).await;
        h.orchestrator.request_challenge(ctx(), 7).await.unwrap();
        let code = h.inbox.last_code(1).await.unwrap();

        let other = Context::new(2, 9);
        let err = h
            .orchestrator
            .confirm_payment(other, &code, 7)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TransactionNotFound));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let h = harness(dec!(200000), dec!(150000)).await;
        let ticket = h.orchestrator.request_challenge(ctx(), 7).await.unwrap();
        let code = h.inbox.last_code(1).await.unwrap();

        h.orchestrator
            .cancel_transaction(ctx(), ticket.transaction)
            .await
            .unwrap();
        // Second cancel and cancel of an unknown id are no-op successes
        h.orchestrator
            .cancel_transaction(ctx(), ticket.transaction)
            .await
            .unwrap();
        h.orchestrator.cancel_transaction(ctx(), 999).await.unwrap();

        // The cancelled attempt's code no longer verifies
        let err = h
            .orchestrator
            .confirm_payment(ctx(), &code, 7)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidOrExpiredCode));
        assert!(h.orchestrator.history(ctx()).await.unwrap().is_empty());
    }
}
