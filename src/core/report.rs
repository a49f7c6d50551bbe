use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// One parsed VirusTotal-style scan report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// File name without the `.json` extension.
    pub id: String,
    pub path: PathBuf,
    pub data: Map<String, Value>,
}

#[derive(Debug)]
pub enum ParseError {
    Read(std::io::Error),
    Encoding(std::string::FromUtf8Error),
    Json(serde_json::Error),
    NotAnObject { found: &'static str },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Read(err) => write!(f, "Error reading JSON file: {err}"),
            ParseError::Encoding(err) => write!(f, "Error decoding JSON file (not UTF-8): {err}"),
            ParseError::Json(err) => write!(f, "Error decoding JSON file: {err}"),
            ParseError::NotAnObject { found } => {
                write!(f, "Error processing JSON file: top-level value is {found}, expected an object")
            }
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Read(err) => Some(err),
            ParseError::Encoding(err) => Some(err),
            ParseError::Json(err) => Some(err),
            ParseError::NotAnObject { .. } => None,
        }
    }
}

impl Report {
    pub fn read(path: &Path) -> Result<Report, ParseError> {
        let bytes = std::fs::read(path).map_err(ParseError::Read)?;
        let text = String::from_utf8(bytes).map_err(ParseError::Encoding)?;
        Self::parse(report_id(path), path.to_path_buf(), &text)
    }

    pub fn parse(id: String, path: PathBuf, text: &str) -> Result<Report, ParseError> {
        let value: Value = serde_json::from_str(text).map_err(ParseError::Json)?;
        let Value::Object(data) = value else {
            return Err(ParseError::NotAnObject {
                found: json_kind(&value),
            });
        };
        Ok(Report { id, path, data })
    }

    /// Compact single-line JSON, the record format the classifier reads.
    pub fn to_one_line(&self) -> String {
        // Map<String, Value> serialisation cannot fail.
        serde_json::to_string(&self.data).unwrap_or_default()
    }
}

/// File name with a trailing `.json` removed.
pub fn report_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.strip_suffix(".json") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
