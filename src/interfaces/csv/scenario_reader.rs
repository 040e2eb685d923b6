use serde::Deserialize;
use std::io::Read;

use crate::domain::{PayerId, StudentId, TransactionId};
use crate::error::{PaymentError, Result};

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioOp {
    Issue,
    Confirm,
    Cancel,
}

/// One step of a scripted payment scenario.
///
/// `code` empty on a confirm step means "the code most recently delivered to
/// this payer"; the runner resolves it from its notifier.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ScenarioStep {
    pub op: ScenarioOp,
    pub payer: PayerId,
    pub student: Option<StudentId>,
    pub code: Option<String>,
    pub transaction: Option<TransactionId>,
}

/// Reads scenario steps from a CSV source with
/// `op, payer, student, code, transaction` columns.
pub struct ScenarioReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn steps(self) -> impl Iterator<Item = Result<ScenarioStep>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
