use std::io::Read;

use crate::domain::bill::BillItem;
use crate::error::{PaymentError, Result};

/// Reads bill items from a CSV source with
/// `id, student, amount, status, academic_year, semester` columns.
pub struct BillReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> BillReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and deserializes bill items.
    pub fn bills(self) -> impl Iterator<Item = Result<BillItem>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
