mod account_reader;
mod bill_reader;
mod history_writer;
mod scenario_reader;

pub use account_reader::AccountReader;
pub use bill_reader::BillReader;
pub use history_writer::HistoryWriter;
pub use scenario_reader::{ScenarioOp, ScenarioReader, ScenarioStep};
