use time::OffsetDateTime;

use crate::core::Column;

/// One CSV line: the report identifier and one cell per selected column.
///
/// `cells` is parallel to the column list the row was built for. `None` is an
/// absent value and is written as an empty cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub file_name: String,
    pub cells: Vec<Option<String>>,
}

impl OutputRow {
    pub fn new(file_name: impl Into<String>, columns: &[Column]) -> Self {
        Self {
            file_name: file_name.into(),
            cells: vec![None; columns.len()],
        }
    }

    pub fn set(&mut self, columns: &[Column], column: Column, value: Option<String>) {
        if let Some(idx) = columns.iter().position(|c| *c == column) {
            self.cells[idx] = value;
        }
    }

    pub fn get(&self, columns: &[Column], column: Column) -> Option<&str> {
        let idx = columns.iter().position(|c| *c == column)?;
        self.cells.get(idx)?.as_deref()
    }

    pub fn to_record(&self) -> Vec<&str> {
        let mut record = Vec::with_capacity(self.cells.len() + 1);
        record.push(self.file_name.as_str());
        record.extend(self.cells.iter().map(|c| c.as_deref().unwrap_or("")));
        record
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub at: OffsetDateTime,
    pub file_name: String,
    pub message: String,
}

impl ErrorRecord {
    pub fn now(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            at: OffsetDateTime::now_utc(),
            file_name: file_name.into(),
            message: message.into(),
        }
    }
}
