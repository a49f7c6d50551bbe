use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::{Column, FILE_NAME_HEADER, OutputRow};

/// Output locations derived from the input folder `<dir>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub csv: PathBuf,
    pub error_log: PathBuf,
}

impl OutputPaths {
    /// `<out_dir>/<name>_info.csv` and `<out_dir>/<name>_error.log`, where
    /// `out_dir` defaults to the folder's parent.
    pub fn for_input(input_folder: &Path, out_dir: Option<&Path>) -> Result<Self> {
        let name = input_folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| {
                format!(
                    "cannot derive output names from input folder: {}",
                    input_folder.display()
                )
            })?;
        let dir = match out_dir {
            Some(dir) => dir.to_path_buf(),
            None => input_folder
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        Ok(Self {
            csv: dir.join(format!("{name}_info.csv")),
            error_log: dir.join(format!("{name}_error.log")),
        })
    }
}

pub fn header(columns: &[Column]) -> Vec<&'static str> {
    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push(FILE_NAME_HEADER);
    header.extend(columns.iter().map(|c| c.as_str()));
    header
}

pub struct CsvOutput {
    path: PathBuf,
    wtr: csv::Writer<File>,
    rows: usize,
}

impl CsvOutput {
    pub fn create(path: &Path, columns: &[Column]) -> Result<Self> {
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create CSV: {}", path.display()))?;
        wtr.write_record(header(columns))
            .with_context(|| format!("failed to write CSV header: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            wtr,
            rows: 0,
        })
    }

    pub fn write_row(&mut self, row: &OutputRow) -> Result<()> {
        self.wtr
            .write_record(row.to_record())
            .with_context(|| format!("failed to write CSV row: {}", self.path.display()))?;
        self.rows += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize> {
        self.wtr
            .flush()
            .with_context(|| format!("failed to flush CSV: {}", self.path.display()))?;
        Ok(self.rows)
    }
}
