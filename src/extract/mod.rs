use std::fmt;

use serde_json::Value;

use crate::core::{Column, Report};

pub const CPU_TYPE_PATH: &[&str] = &["additional_info", "gandelf", "header", "machine"];
pub const FIRST_SEEN_PATH: &[&str] = &["first_seen"];
pub const SIZE_PATH: &[&str] = &["size"];
pub const MD5_PATH: &[&str] = &["md5"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    MissingKey { path: String },
    NotScalar { path: String },
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::MissingKey { path } => write!(f, "missing key: {path}"),
            ExtractionError::NotScalar { path } => {
                write!(f, "value at {path} is not a scalar")
            }
        }
    }
}

impl std::error::Error for ExtractionError {}

pub type Extractor = fn(&Report) -> Result<String, ExtractionError>;

/// The extractor for a report-field column. `Family` comes from the classifier
/// and has none.
pub fn extractor_for(column: Column) -> Option<Extractor> {
    match column {
        Column::Family => None,
        Column::CpuType => Some(cpu_type),
        Column::FirstSeen => Some(first_seen),
        Column::Size => Some(size),
        Column::Md5 => Some(md5),
    }
}

pub fn cpu_type(report: &Report) -> Result<String, ExtractionError> {
    lookup(report, CPU_TYPE_PATH)
}

pub fn first_seen(report: &Report) -> Result<String, ExtractionError> {
    lookup(report, FIRST_SEEN_PATH)
}

pub fn size(report: &Report) -> Result<String, ExtractionError> {
    lookup(report, SIZE_PATH)
}

pub fn md5(report: &Report) -> Result<String, ExtractionError> {
    lookup(report, MD5_PATH)
}

fn lookup(report: &Report, path: &[&str]) -> Result<String, ExtractionError> {
    let missing = || ExtractionError::MissingKey {
        path: path.join("."),
    };

    let (first, rest) = path.split_first().ok_or_else(missing)?;
    let mut value = report.data.get(*first).ok_or_else(missing)?;
    for key in rest {
        value = value.get(*key).ok_or_else(missing)?;
    }

    match value {
        Value::Null => Err(missing()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(_) | Value::Object(_) => Err(ExtractionError::NotScalar {
            path: path.join("."),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn report(text: &str) -> Report {
        Report::parse("r".to_string(), PathBuf::from("r.json"), text).expect("parse")
    }

    #[test]
    fn extracts_all_fields_from_full_report() {
        let r = report(
            r#"{
                "md5": "d41d8cd98f00b204e9800998ecf8427e",
                "size": 100000,
                "first_seen": "2019-03-01 10:11:12",
                "additional_info": {"gandelf": {"header": {"machine": "Advanced Micro Devices X86-64"}}}
            }"#,
        );
        assert_eq!(md5(&r).as_deref(), Ok("d41d8cd98f00b204e9800998ecf8427e"));
        assert_eq!(size(&r).as_deref(), Ok("100000"));
        assert_eq!(first_seen(&r).as_deref(), Ok("2019-03-01 10:11:12"));
        assert_eq!(
            cpu_type(&r).as_deref(),
            Ok("Advanced Micro Devices X86-64")
        );
    }

    #[test]
    fn missing_nested_key_names_the_full_path() {
        let r = report(r#"{"additional_info": {"gandelf": {}}}"#);
        assert_eq!(
            cpu_type(&r),
            Err(ExtractionError::MissingKey {
                path: "additional_info.gandelf.header.machine".to_string()
            })
        );
    }

    #[test]
    fn null_counts_as_missing() {
        let r = report(r#"{"first_seen": null}"#);
        assert!(matches!(
            first_seen(&r),
            Err(ExtractionError::MissingKey { .. })
        ));
    }

    #[test]
    fn intermediate_non_object_is_missing_not_a_panic() {
        let r = report(r#"{"additional_info": "n/a"}"#);
        assert!(matches!(cpu_type(&r), Err(ExtractionError::MissingKey { .. })));
    }

    #[test]
    fn object_values_are_rejected() {
        let r = report(r#"{"size": {"bytes": 1}}"#);
        assert_eq!(
            size(&r),
            Err(ExtractionError::NotScalar {
                path: "size".to_string()
            })
        );
    }

    #[test]
    fn family_has_no_field_extractor() {
        assert!(extractor_for(Column::Family).is_none());
        for column in [Column::CpuType, Column::FirstSeen, Column::Size, Column::Md5] {
            assert!(extractor_for(column).is_some(), "{column}");
        }
    }
}
