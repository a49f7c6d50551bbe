use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::classifier::{BatchEntry, Classifier, ClassifierRequest};
use crate::core::{Column, ErrorRecord, OutputRow, ParseError, Report};
use crate::extract::extractor_for;
use crate::logs::ErrorLog;
use crate::output::{CsvOutput, OutputPaths};
use crate::scan::{InputFile, list_reports};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Selected columns, in output order.
    pub columns: Vec<Column>,
    /// Worker threads; 0 lets rayon pick one per CPU.
    pub jobs: usize,
    pub show_progress: bool,
}

/// Where one input file is in the pipeline.
///
/// `Pending -> Parsed -> Extracted -> Written` or `Pending -> ParseFailed -> Logged`.
/// The parsed document does not outlive `Extracted`; only the classifier batch
/// entry is kept, and only when the family column is selected.
#[derive(Debug)]
pub enum FileState {
    Pending,
    Parsed(Report),
    Extracted {
        row: OutputRow,
        batch: Option<BatchEntry>,
    },
    ParseFailed(ParseError),
    Written,
    Logged,
}

impl FileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileState::Written | FileState::Logged)
    }
}

#[derive(Debug)]
pub struct FileTask {
    pub input: InputFile,
    pub state: FileState,
    /// Columns whose value was absent, with the reason.
    pub missing: Vec<String>,
}

impl FileTask {
    fn new(input: InputFile) -> Self {
        Self {
            input,
            state: FileState::Pending,
            missing: Vec::new(),
        }
    }

    fn parse(&mut self) {
        if !matches!(self.state, FileState::Pending) {
            return;
        }
        self.state = match Report::read(&self.input.path) {
            Ok(report) => FileState::Parsed(report),
            Err(err) => FileState::ParseFailed(err),
        };
    }

    fn extract(&mut self, columns: &[Column], wants_family: bool) {
        let state = std::mem::replace(&mut self.state, FileState::Pending);
        let FileState::Parsed(report) = state else {
            self.state = state;
            return;
        };

        let mut row = OutputRow::new(report.id.clone(), columns);
        for &column in columns {
            let Some(extract) = extractor_for(column) else {
                continue;
            };
            match extract(&report) {
                Ok(value) => row.set(columns, column, Some(value)),
                Err(err) => self.missing.push(format!("{column}: {err}")),
            }
        }
        let batch = wants_family.then(|| BatchEntry::from_report(&report));
        self.state = FileState::Extracted { row, batch };
    }
}

#[derive(Debug, Clone, Default)]
pub struct LabelSummary {
    pub files: usize,
    pub written: usize,
    pub logged: usize,
    pub labelled: usize,
    /// Non-fatal problems for the operator: classifier failures, unmapped
    /// classifier output, unreadable directory entries.
    pub warnings: Vec<String>,
    /// Per-file absent fields, for `--verbose`.
    pub missing_fields: Vec<String>,
    pub elapsed: Duration,
}

pub struct Engine {
    opts: EngineOptions,
}

impl Engine {
    pub fn new(opts: EngineOptions) -> Self {
        Self { opts }
    }

    fn wants_family(&self) -> bool {
        self.opts.columns.contains(&Column::Family)
    }

    /// Labels every report under `input_folder` and writes the CSV and error log.
    ///
    /// `classifier` is only consulted when the family column is selected.
    pub fn run(
        &self,
        input_folder: &Path,
        paths: &OutputPaths,
        classifier: &dyn Classifier,
    ) -> Result<LabelSummary> {
        let started = Instant::now();
        let mut summary = LabelSummary::default();

        let mut csv = CsvOutput::create(&paths.csv, &self.opts.columns)?;
        let mut errors = ErrorLog::create(&paths.error_log)?;

        let listing = list_reports(input_folder);
        summary
            .warnings
            .extend(listing.walk_errors.iter().map(|e| format!("skipped directory entry: {e}")));
        summary.files = listing.files.len();

        let mut tasks: Vec<FileTask> = listing.files.into_iter().map(FileTask::new).collect();
        self.parse_and_extract(&mut tasks)?;

        if self.wants_family() {
            self.classify(&mut tasks, classifier, &mut summary);
        }

        for task in &mut tasks {
            let state = std::mem::replace(&mut task.state, FileState::Pending);
            task.state = match state {
                FileState::Extracted { row, .. } => {
                    csv.write_row(&row)?;
                    summary
                        .missing_fields
                        .extend(task.missing.iter().map(|m| format!("{}: {m}", task.input.id)));
                    FileState::Written
                }
                FileState::ParseFailed(err) => {
                    errors.record(&ErrorRecord::now(task.input.id.clone(), err.to_string()))?;
                    FileState::Logged
                }
                other => other,
            };
            debug_assert!(task.state.is_terminal(), "{:?}", task.state);
        }

        summary.written = csv.finish()?;
        summary.logged = errors.finish()?;
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    fn parse_and_extract(&self, tasks: &mut [FileTask]) -> Result<()> {
        let columns = self.opts.columns.as_slice();
        let wants_family = self.wants_family();
        let pb = crate::ui::progress_bar(self.opts.show_progress, tasks.len() as u64, "labeling");

        let work = |tasks: &mut [FileTask]| {
            tasks.par_iter_mut().for_each(|task| {
                task.parse();
                task.extract(columns, wants_family);
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
            });
        };

        if self.opts.jobs > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.opts.jobs)
                .build()
                .context("failed to build worker pool")?;
            pool.install(|| work(tasks));
        } else {
            work(tasks);
        }

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        Ok(())
    }

    fn classify(&self, tasks: &mut [FileTask], classifier: &dyn Classifier, summary: &mut LabelSummary) {
        let columns = self.opts.columns.as_slice();
        // owners[pos] is the task behind batch position `pos`.
        let mut owners = Vec::new();
        let mut request = ClassifierRequest::default();
        for (i, task) in tasks.iter_mut().enumerate() {
            if let FileState::Extracted { batch, .. } = &mut task.state {
                if let Some(entry) = batch.take() {
                    request.push(entry);
                    owners.push(i);
                }
            }
        }
        if request.is_empty() {
            return;
        }

        let response = match classifier.classify(&request) {
            Ok(response) => response,
            Err(err) => {
                summary
                    .warnings
                    .push(format!("family labelling skipped: {err}"));
                return;
            }
        };
        drop(request);
        summary.warnings.extend(response.warnings);

        let mut families = response.families;
        for (pos, &i) in owners.iter().enumerate() {
            let task = &mut tasks[i];
            let FileState::Extracted { row, .. } = &mut task.state else {
                continue;
            };
            match families.remove(&pos) {
                Some(family) => {
                    row.set(columns, Column::Family, Some(family));
                    summary.labelled += 1;
                }
                None => task.missing.push(format!("{}: no label from classifier", Column::Family)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierError, ClassifierResponse};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FixedClassifier {
        families: Vec<(&'static str, &'static str)>,
        seen: Mutex<Vec<usize>>,
    }

    impl Classifier for FixedClassifier {
        fn classify(&self, request: &ClassifierRequest) -> Result<ClassifierResponse, ClassifierError> {
            self.seen.lock().expect("lock").push(request.len());
            let mut response = ClassifierResponse::default();
            for (key, family) in &self.families {
                for &pos in request.resolve(key) {
                    response.families.insert(pos, family.to_string());
                }
            }
            Ok(response)
        }
    }

    struct BrokenClassifier;

    impl Classifier for BrokenClassifier {
        fn classify(&self, _request: &ClassifierRequest) -> Result<ClassifierResponse, ClassifierError> {
            Err(ClassifierError::Failed {
                exit_code: 1,
                stderr: "avclass: missing label file".to_string(),
            })
        }
    }

    fn make_temp_dir() -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "vtlabel-engine-test-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("reports")).expect("create dir");
        dir
    }

    fn write_reports(dir: &Path) {
        std::fs::write(
            dir.join("reports/a.json"),
            r#"{"md5": "aa11", "size": 100000, "additional_info": {"gandelf": {"header": {"machine": "x86"}}}}"#,
        )
        .expect("write a");
        std::fs::write(dir.join("reports/b.json"), "{ not json").expect("write b");
        std::fs::write(dir.join("reports/c.json"), r#"{"md5": "cc33", "first_seen": "2020-01-02 03:04:05"}"#)
            .expect("write c");
    }

    fn engine(columns: Vec<Column>) -> Engine {
        Engine::new(EngineOptions {
            columns,
            jobs: 2,
            show_progress: false,
        })
    }

    #[test]
    fn rows_plus_errors_cover_every_input() {
        let dir = make_temp_dir();
        write_reports(&dir);
        let input = dir.join("reports");
        let paths = OutputPaths::for_input(&input, None).expect("paths");

        let summary = engine(vec![Column::Size, Column::CpuType])
            .run(&input, &paths, &BrokenClassifier)
            .expect("run");

        assert_eq!(summary.files, 3);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.logged, 1);
        assert!(summary.warnings.is_empty(), "{:?}", summary.warnings);

        let csv = std::fs::read_to_string(&paths.csv).expect("read csv");
        assert_eq!(csv, "fileName,size,cpuType\na,100000,x86\nc,,\n");

        let log = std::fs::read_to_string(&paths.error_log).expect("read log");
        assert_eq!(log.lines().count(), 1, "{log}");
        assert!(log.contains(" Labeler ERROR Error decoding JSON file"), "{log}");
        assert!(log.trim_end().ends_with("(b)"), "{log}");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn family_is_merged_from_a_single_batch_call() {
        let dir = make_temp_dir();
        write_reports(&dir);
        let input = dir.join("reports");
        let paths = OutputPaths::for_input(&input, None).expect("paths");
        let classifier = FixedClassifier {
            families: vec![("aa11", "zbot")],
            seen: Mutex::new(Vec::new()),
        };

        let summary = engine(vec![Column::Family, Column::Md5])
            .run(&input, &paths, &classifier)
            .expect("run");

        assert_eq!(*classifier.seen.lock().expect("lock"), vec![2]);
        assert_eq!(summary.labelled, 1);
        let csv = std::fs::read_to_string(&paths.csv).expect("read csv");
        assert_eq!(csv, "fileName,family,md5\na,zbot,aa11\nc,,cc33\n");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn classifier_failure_leaves_family_empty_and_keeps_other_columns() {
        let dir = make_temp_dir();
        write_reports(&dir);
        let input = dir.join("reports");
        let paths = OutputPaths::for_input(&input, None).expect("paths");

        let summary = engine(vec![Column::Md5, Column::Family])
            .run(&input, &paths, &BrokenClassifier)
            .expect("run");

        assert_eq!(summary.written, 2);
        assert_eq!(summary.logged, 1);
        assert_eq!(summary.warnings.len(), 1, "{:?}", summary.warnings);
        assert!(summary.warnings[0].contains("missing label file"));

        let csv = std::fs::read_to_string(&paths.csv).expect("read csv");
        assert_eq!(csv, "fileName,md5,family\na,aa11,\nc,cc33,\n");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn classifier_is_not_called_without_family_column() {
        let dir = make_temp_dir();
        write_reports(&dir);
        let input = dir.join("reports");
        let paths = OutputPaths::for_input(&input, None).expect("paths");
        let classifier = FixedClassifier {
            families: vec![],
            seen: Mutex::new(Vec::new()),
        };

        engine(vec![Column::Md5]).run(&input, &paths, &classifier).expect("run");
        assert!(classifier.seen.lock().expect("lock").is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_folder_still_produces_both_files() {
        let dir = make_temp_dir();
        let input = dir.join("reports");
        let paths = OutputPaths::for_input(&input, None).expect("paths");

        let summary = engine(vec![]).run(&input, &paths, &BrokenClassifier).expect("run");
        assert_eq!(summary.files, 0);
        assert_eq!(std::fs::read_to_string(&paths.csv).expect("csv"), "fileName\n");
        assert_eq!(std::fs::read_to_string(&paths.error_log).expect("log"), "");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_fields_are_reported_per_file() {
        let dir = make_temp_dir();
        write_reports(&dir);
        let input = dir.join("reports");
        let paths = OutputPaths::for_input(&input, None).expect("paths");

        let summary = engine(vec![Column::FirstSeen])
            .run(&input, &paths, &BrokenClassifier)
            .expect("run");
        assert_eq!(
            summary.missing_fields,
            vec!["a: firstSeen: missing key: first_seen".to_string()]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reports_with_the_same_file_name_get_their_own_family() {
        let dir = make_temp_dir();
        let input = dir.join("reports");
        std::fs::create_dir_all(input.join("x")).expect("mkdir x");
        std::fs::create_dir_all(input.join("y")).expect("mkdir y");
        std::fs::write(input.join("x/a.json"), r#"{"md5": "1111"}"#).expect("write x");
        std::fs::write(input.join("y/a.json"), r#"{"md5": "2222"}"#).expect("write y");
        let paths = OutputPaths::for_input(&input, None).expect("paths");
        let classifier = FixedClassifier {
            families: vec![("1111", "zbot"), ("2222", "mirai")],
            seen: Mutex::new(Vec::new()),
        };

        let summary = engine(vec![Column::Family, Column::Md5])
            .run(&input, &paths, &classifier)
            .expect("run");

        assert_eq!(summary.labelled, 2);
        let csv = std::fs::read_to_string(&paths.csv).expect("read csv");
        assert_eq!(csv, "fileName,family,md5\na,zbot,1111\na,mirai,2222\n");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn extraction_keeps_a_batch_entry_only_for_family() {
        let dir = make_temp_dir();
        write_reports(&dir);
        let input = InputFile {
            id: "a".to_string(),
            path: dir.join("reports/a.json"),
        };

        let mut task = FileTask::new(input.clone());
        task.parse();
        task.extract(&[Column::Md5], false);
        assert!(matches!(task.state, FileState::Extracted { batch: None, .. }));

        let mut task = FileTask::new(input);
        task.parse();
        task.extract(&[Column::Family], true);
        match &task.state {
            FileState::Extracted { batch: Some(entry), .. } => {
                assert_eq!(entry.hashes, vec!["aa11".to_string()]);
            }
            other => panic!("unexpected state: {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&dir);
    }
}
