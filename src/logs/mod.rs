use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::core::ErrorRecord;

pub const LOGGER_NAME: &str = "Labeler";

/// Per-file failure log, `<timestamp> Labeler ERROR <message> (<fileName>)`.
///
/// Created (and truncated) once per run, so it exists even when nothing fails.
pub struct ErrorLog {
    path: PathBuf,
    out: BufWriter<File>,
    lines: usize,
}

impl ErrorLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create error log: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn record(&mut self, record: &ErrorRecord) -> Result<()> {
        writeln!(self.out, "{}", format_line(record))
            .with_context(|| format!("failed to write error log: {}", self.path.display()))?;
        self.lines += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize> {
        self.out
            .flush()
            .with_context(|| format!("failed to flush error log: {}", self.path.display()))?;
        Ok(self.lines)
    }
}

pub fn format_line(record: &ErrorRecord) -> String {
    let message = record.message.replace(['\r', '\n'], " ");
    format!(
        "{} {LOGGER_NAME} ERROR {message} ({})",
        format_timestamp(record.at),
        record.file_name
    )
}

fn format_timestamp(at: OffsetDateTime) -> String {
    let fmt = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second],[subsecond digits:3]"
    );
    at.format(&fmt).unwrap_or_else(|_| "unknown".to_string())
}
