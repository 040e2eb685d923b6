use std::io::Write;

use crate::domain::PayerId;
use crate::domain::transaction::{Transaction, TransactionState};
use crate::error::Result;

/// Writes transaction history as CSV with
/// `payer, transaction, code, bill_item, amount, state, created_at` columns.
pub struct HistoryWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> HistoryWriter<W> {
    pub fn new(dest: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new().from_writer(dest),
        }
    }

    pub fn write_history(
        &mut self,
        entries: impl IntoIterator<Item = (PayerId, Vec<Transaction>)>,
    ) -> Result<()> {
        self.writer.write_record([
            "payer",
            "transaction",
            "code",
            "bill_item",
            "amount",
            "state",
            "created_at",
        ])?;

        for (payer, transactions) in entries {
            for tx in transactions {
                let state = match tx.state {
                    TransactionState::Pending => "pending",
                    TransactionState::Completed => "completed",
                };
                self.writer.write_record([
                    payer.to_string(),
                    tx.id.to_string(),
                    tx.code(),
                    tx.bill_item.to_string(),
                    tx.amount.value().to_string(),
                    state.to_string(),
                    tx.created_at.to_rfc3339(),
                ])?;
            }
        }

        self.writer.flush()?;
        Ok(())
    }
}
