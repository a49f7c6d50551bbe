use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

use crate::classifier::CommandClassifier;
use crate::core::Column;
use crate::engine::{Engine, EngineOptions};
use crate::output::OutputPaths;
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "label",
    version,
    about = "Extract family, CPU type, first-seen date, size and MD5 from a folder of VirusTotal JSON reports into a CSV"
)]
pub struct Cli {
    /// Folder of JSON reports (searched recursively).
    #[arg(
        long = "input_folder",
        short = 'i',
        alias = "input-folder",
        required_unless_present_any = ["completions", "show_config"]
    )]
    pub input_folder: Option<PathBuf>,

    /// Malware family from the external classifier.
    #[arg(long, short = 'f')]
    pub family: bool,
    /// CPU architecture from the ELF header metadata.
    #[arg(long = "cpu_type", short = 'c', visible_alias = "cpu", alias = "cpu-type")]
    pub cpu_type: bool,
    /// First-seen timestamp.
    #[arg(long = "first_seen", short = 's', alias = "first-seen")]
    pub first_seen: bool,
    /// File size in bytes.
    #[arg(long, short = 'z')]
    pub size: bool,
    /// MD5 hash.
    #[arg(long, short = 'm')]
    pub md5: bool,

    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Classifier timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Worker threads (0 = one per CPU).
    #[arg(long)]
    pub jobs: Option<usize>,
    #[arg(long)]
    pub quiet: bool,
    #[arg(long)]
    pub verbose: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long = "show-config")]
    pub show_config: bool,
    /// Print a shell completion script (bash|zsh|fish) and exit.
    #[arg(long, value_name = "SHELL")]
    pub completions: Option<String>,
}

pub fn run() -> Result<()> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    if let Some(shell) = &cli.completions {
        let shell = parse_shell(shell)?;
        let mut cmd = Cli::command();
        let mut out = std::io::stdout().lock();
        clap_complete::generate(shell, &mut cmd, "label", &mut out);
        return Ok(());
    }

    let home_dir = std::env::var_os("HOME").map(PathBuf::from);
    let env_config_path = std::env::var_os("VTLABEL_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        home_dir.as_deref(),
    )
    .map_err(crate::exit::invalid_args_err)?;

    if cli.show_config {
        println!("{}", render_config(&cfg)?);
        return Ok(());
    }

    let ui_cfg = UiConfig::detect(cli.quiet, cli.verbose);

    let input_folder = cli
        .input_folder
        .as_deref()
        .ok_or_else(|| crate::exit::invalid_args("--input_folder is required"))?;
    let input_folder = resolve_input_folder(input_folder)?;

    let paths = OutputPaths::for_input(&input_folder, cfg.output.dir.as_deref())
        .map_err(crate::exit::invalid_args_err)?;
    if let Some(dir) = &cfg.output.dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory: {}", dir.display()))
            .map_err(crate::exit::output_failed_err)?;
    }

    let columns = selected_columns(&cli, &matches);
    let engine = Engine::new(EngineOptions {
        columns,
        jobs: cli.jobs.unwrap_or(cfg.pipeline.jobs),
        show_progress: cfg.ui.progress && ui_cfg.stderr_is_tty && !cli.quiet,
    });

    let classifier = CommandClassifier::new(
        cfg.classifier.command.clone(),
        cfg.classifier.args.clone(),
        Duration::from_secs(cli.timeout.unwrap_or(cfg.classifier.timeout_secs)),
    );

    let summary = engine
        .run(&input_folder, &paths, &classifier)
        .map_err(crate::exit::output_failed_err)?;

    crate::ui::print_summary(&summary, &paths, &ui_cfg);
    Ok(())
}

/// `--show-config` output. A render failure is an output failure (exit 10).
fn render_config(cfg: &crate::config::EffectiveConfig) -> Result<String> {
    toml::to_string_pretty(cfg)
        .context("failed to render effective configuration")
        .map_err(crate::exit::output_failed_err)
}

fn resolve_input_folder(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(crate::exit::invalid_args(format!(
            "input folder does not exist: {}",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Err(crate::exit::invalid_args(format!(
            "input path must be a directory: {}",
            path.display()
        )));
    }
    std::fs::canonicalize(path)
        .with_context(|| format!("failed to resolve input folder: {}", path.display()))
        .map_err(crate::exit::invalid_args_err)
}

/// Selected columns in the order their flags appear on the command line.
pub fn selected_columns(cli: &Cli, matches: &ArgMatches) -> Vec<Column> {
    let mut selected: Vec<(usize, Column)> = Column::ALL
        .into_iter()
        .filter(|c| is_selected(cli, *c))
        .map(|c| {
            let idx = if matches.value_source(c.flag_id()) == Some(ValueSource::CommandLine) {
                matches.index_of(c.flag_id()).unwrap_or(usize::MAX)
            } else {
                usize::MAX
            };
            (idx, c)
        })
        .collect();
    // Stable: ties keep the declaration order of `Column::ALL`.
    selected.sort_by_key(|(idx, _)| *idx);
    selected.into_iter().map(|(_, c)| c).collect()
}

fn is_selected(cli: &Cli, column: Column) -> bool {
    match column {
        Column::Family => cli.family,
        Column::CpuType => cli.cpu_type,
        Column::FirstSeen => cli.first_seen,
        Column::Size => cli.size,
        Column::Md5 => cli.md5,
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish)"
        ))),
    }
}
