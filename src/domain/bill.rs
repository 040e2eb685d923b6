use serde::{Deserialize, Serialize};

use super::account::Amount;
use super::{BillItemId, StudentId};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Unpaid,
    Paid,
}

/// One tuition line item for a student.
///
/// Items are ordered by `(academic_year, semester)` ascending; the oldest
/// unpaid item is the only one eligible for payment at any time.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BillItem {
    pub id: BillItemId,
    pub student: StudentId,
    pub amount: Amount,
    pub status: BillStatus,
    pub academic_year: String,
    pub semester: u8,
}

impl BillItem {
    /// Total order over a student's items: academic year, then semester.
    pub fn term(&self) -> (&str, u8) {
        (&self.academic_year, self.semester)
    }

    pub fn is_unpaid(&self) -> bool {
        self.status == BillStatus::Unpaid
    }
}

/// The subset of a bill item shown to the payer in notifications and
/// challenge responses.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BillSummary {
    pub id: BillItemId,
    pub academic_year: String,
    pub semester: u8,
    pub amount: Amount,
}

impl From<&BillItem> for BillSummary {
    fn from(item: &BillItem) -> Self {
        Self {
            id: item.id,
            academic_year: item.academic_year.clone(),
            semester: item.semester,
            amount: item.amount,
        }
    }
}
