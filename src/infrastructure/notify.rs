use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::PayerId;
use crate::domain::ports::{Notice, Notifier};
use crate::error::Result;

/// Notifier that writes deliveries to the log.
///
/// Stands in for the mail channel: the code and receipt land in the
/// operational log instead of an inbox.
#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, payer: PayerId, notice: Notice) -> Result<()> {
        match notice {
            Notice::OneTimeCode {
                code,
                bill,
                valid_for,
            } => {
                info!(
                    payer,
                    code = %code,
                    bill_item = bill.id,
                    academic_year = %bill.academic_year,
                    semester = bill.semester,
                    amount = %bill.amount,
                    valid_minutes = valid_for.as_secs() / 60,
                    "one-time code delivered"
                );
            }
            Notice::Receipt {
                transaction,
                new_balance,
            } => {
                info!(
                    payer,
                    transaction = transaction.id,
                    code = %transaction.code(),
                    amount = %transaction.amount,
                    new_balance = %new_balance,
                    "payment receipt delivered"
                );
            }
        }
        Ok(())
    }
}

/// Notifier that remembers the last notice per payer.
///
/// Plays the role of the customer's inbox for the CLI and for tests: the
/// scenario runner reads the delivered code back out of it.
#[derive(Default)]
pub struct RecordingNotifier {
    inbox: Arc<RwLock<HashMap<PayerId, Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn last_notice(&self, payer: PayerId) -> Option<Notice> {
        let inbox = self.inbox.read().await;
        inbox.get(&payer).cloned()
    }

    /// The code most recently delivered to a payer, if the last notice
    /// carried one.
    pub async fn last_code(&self, payer: PayerId) -> Option<String> {
        match self.last_notice(payer).await {
            Some(Notice::OneTimeCode { code, .. }) => Some(code),
            _ => None,
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, payer: PayerId, notice: Notice) -> Result<()> {
        LogNotifier.send(payer, notice.clone()).await?;
        let mut inbox = self.inbox.write().await;
        inbox.insert(payer, notice);
        Ok(())
    }
}
