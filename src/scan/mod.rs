use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::core::report_id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct InputListing {
    pub files: Vec<InputFile>,
    /// Directory entries that could not be read while walking.
    pub walk_errors: Vec<String>,
}

/// Every `*.json` file under `root`, recursively, sorted by identifier then path.
pub fn list_reports(root: &Path) -> InputListing {
    let mut listing = InputListing::default();

    for entry in WalkDir::new(root).follow_links(false).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                listing.walk_errors.push(err.to_string());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let is_json = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(".json"));
        if !is_json {
            continue;
        }
        let path = entry.into_path();
        listing.files.push(InputFile {
            id: report_id(&path),
            path,
        });
    }

    listing
        .files
        .sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.path.cmp(&b.path)));
    listing
}
