use anyhow::Error;
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use crate::engine::LabelSummary;
use crate::output::OutputPaths;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub stderr_is_tty: bool,
    pub quiet: bool,
    pub verbose: bool,
}

impl UiConfig {
    pub fn detect(quiet: bool, verbose: bool) -> Self {
        Self {
            stderr_is_tty: io::stderr().is_terminal(),
            quiet,
            verbose,
        }
    }
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "see `label --help` for usage");
}

pub fn eprintln_warning(cfg: &UiConfig, message: &str) {
    if cfg.quiet {
        return;
    }
    let _ = writeln!(io::stderr().lock(), "warning: {message}");
}

/// Bar on stderr, only when it is a terminal.
pub fn progress_bar(enabled: bool, len: u64, message: &'static str) -> Option<indicatif::ProgressBar> {
    if !enabled || !io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new(len);
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_style(bar_style());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

const BAR_TEMPLATE: &str = "{msg} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({eta})";

fn bar_style() -> indicatif::ProgressStyle {
    indicatif::ProgressStyle::with_template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
}

pub fn print_summary(summary: &LabelSummary, paths: &OutputPaths, cfg: &UiConfig) {
    for warning in &summary.warnings {
        eprintln_warning(cfg, warning);
    }
    if cfg.verbose {
        let mut stderr = io::stderr().lock();
        for missing in &summary.missing_fields {
            let _ = writeln!(stderr, "note: {missing}");
        }
    }
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let _ = writeln!(out, "Output file path: {}", paths.csv.display());
    let _ = writeln!(out, "Error log path: {}", paths.error_log.display());
    let _ = writeln!(
        out,
        "Files: {} written, {} failed, {} total",
        summary.written, summary.logged, summary.files
    );
    let _ = writeln!(
        out,
        "Execution Time: {:.2} seconds",
        summary.elapsed.as_secs_f64()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_template_shows_message_and_counts() {
        assert!(indicatif::ProgressStyle::with_template(BAR_TEMPLATE).is_ok());
        assert!(BAR_TEMPLATE.contains("{msg}"));
        assert!(BAR_TEMPLATE.contains("{pos}/{len}"));
    }
}
