use std::io::Read;

use crate::domain::account::LedgerAccount;
use crate::error::{PaymentError, Result};

/// Reads ledger accounts from a CSV source with `payer, balance` columns.
pub struct AccountReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> AccountReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and deserializes accounts.
    pub fn accounts(self) -> impl Iterator<Item = Result<LedgerAccount>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
