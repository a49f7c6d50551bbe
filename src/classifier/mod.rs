//! Family labelling through an external AVClass-compatible tool.
//!
//! The tool is batch oriented: it reads a file with one compact JSON report per
//! line and prints one `<hash> <family>` line per sample it could label.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::Report;
use crate::platform::{self, CommandError};

const HASH_KEYS: [&str; 3] = ["md5", "sha1", "sha256"];

/// What the classifier needs from one report: its compact line and lookup keys.
///
/// Built right after extraction so the parsed document can be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub line: String,
    pub id: String,
    /// Lowercased `md5`/`sha1`/`sha256` values present in the report.
    pub hashes: Vec<String>,
}

impl BatchEntry {
    pub fn from_report(report: &Report) -> Self {
        let mut hashes: Vec<String> = HASH_KEYS
            .iter()
            .filter_map(|k| report.data.get(*k).and_then(|v| v.as_str()))
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        hashes.sort();
        hashes.dedup();
        Self {
            line: report.to_one_line(),
            id: report.id.clone(),
            hashes,
        }
    }
}

/// The batch handed to a classifier. Samples are addressed by batch position.
#[derive(Debug, Clone, Default)]
pub struct ClassifierRequest {
    /// One compact JSON document per report, in batch order.
    pub lines: Vec<String>,
    hashes: HashMap<String, Vec<usize>>,
    ids: HashMap<String, Vec<usize>>,
}

impl ClassifierRequest {
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a Report>) -> Self {
        let mut req = ClassifierRequest::default();
        for report in reports {
            req.push(BatchEntry::from_report(report));
        }
        req
    }

    /// Appends a sample and returns its batch position.
    pub fn push(&mut self, entry: BatchEntry) -> usize {
        let pos = self.lines.len();
        self.lines.push(entry.line);
        for hash in entry.hashes {
            self.hashes.entry(hash).or_default().push(pos);
        }
        self.ids.entry(entry.id).or_default().push(pos);
        pos
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Batch positions a classifier output key refers to.
    ///
    /// Hashes match case-insensitively; file identifiers match exactly.
    pub fn resolve(&self, key: &str) -> &[usize] {
        let key = key.trim();
        if let Some(hits) = self.hashes.get(&key.to_ascii_lowercase()) {
            return hits;
        }
        self.ids.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_hash(&self, key: &str) -> bool {
        self.hashes.contains_key(&key.trim().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierResponse {
    /// Batch position -> family label.
    pub families: BTreeMap<usize, String>,
    /// Output lines that could not be mapped back to an input report.
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub enum ClassifierError {
    Io { path: PathBuf, err: std::io::Error },
    Command(CommandError),
    Failed { exit_code: i32, stderr: String },
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierError::Io { path, err } => {
                write!(f, "failed to write classifier input {}: {err}", path.display())
            }
            ClassifierError::Command(err) => write!(f, "classifier command error: {err}"),
            ClassifierError::Failed { exit_code, stderr } => {
                write!(f, "classifier exited with code {exit_code}")?;
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ClassifierError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClassifierError::Io { err, .. } => Some(err),
            ClassifierError::Command(err) => Some(err),
            ClassifierError::Failed { .. } => None,
        }
    }
}

pub trait Classifier: Send + Sync {
    fn classify(&self, request: &ClassifierRequest) -> Result<ClassifierResponse, ClassifierError>;
}

/// Runs `<command> <args...> <batch file>` and parses its stdout.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub scratch_dir: PathBuf,
}

impl CommandClassifier {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
            scratch_dir: std::env::temp_dir(),
        }
    }

    fn batch_path(&self) -> PathBuf {
        let pid = std::process::id();
        let ts = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        self.scratch_dir
            .join(format!("vtlabel-classifier-{pid}-{ts}.jsonl"))
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, request: &ClassifierRequest) -> Result<ClassifierResponse, ClassifierError> {
        let path = self.batch_path();
        let mut body = request.lines.join("\n");
        body.push('\n');
        std::fs::write(&path, body).map_err(|err| ClassifierError::Io {
            path: path.clone(),
            err,
        })?;

        let result = run_on_batch(&self.command, &self.args, &path, self.timeout);
        let _ = std::fs::remove_file(&path);
        let output = result?;

        if output.exit_code != 0 {
            return Err(ClassifierError::Failed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(parse_output(&output.stdout, request))
    }
}

fn run_on_batch(
    command: &str,
    args: &[String],
    batch: &Path,
    timeout: Duration,
) -> Result<platform::CommandOutput, ClassifierError> {
    let batch = batch.display().to_string();
    let mut argv: Vec<&str> = args.iter().map(String::as_str).collect();
    argv.push(batch.as_str());
    platform::run_command(command, &argv, timeout).map_err(ClassifierError::Command)
}

/// Maps `<key> <family> [...]` lines back to batch positions.
///
/// A hash shared by several reports labels all of them, since they are the same
/// sample. A file identifier shared by several reports labels none of them.
pub fn parse_output(stdout: &str, request: &ClassifierRequest) -> ClassifierResponse {
    let mut response = ClassifierResponse::default();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let (Some(key), Some(family)) = (tokens.next(), tokens.next()) else {
            response
                .warnings
                .push(format!("unparseable classifier line: {line}"));
            continue;
        };
        let hits = request.resolve(key);
        if hits.is_empty() {
            response
                .warnings
                .push(format!("classifier returned unknown sample {key}"));
            continue;
        }
        if hits.len() > 1 && !request.is_hash(key) {
            response.warnings.push(format!(
                "classifier key {key} matches {} reports with the same file name, label dropped",
                hits.len()
            ));
            continue;
        }
        for &pos in hits {
            response.families.insert(pos, family.to_string());
        }
    }
    response
}
