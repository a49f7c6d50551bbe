mod column;
mod report;
mod row;

pub use column::{Column, FILE_NAME_HEADER};
pub use report::{ParseError, Report, report_id};
pub use row::{ErrorRecord, OutputRow};
