use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifierConfig {
    pub command: String,
    /// Leading arguments; the batch file path is appended after them.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Worker threads for reading reports. 0 means one per CPU.
    pub jobs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub progress: bool,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            classifier: ClassifierConfig {
                command: "avclass".to_string(),
                args: vec!["-f".to_string()],
                timeout_secs: 300,
            },
            pipeline: PipelineConfig { jobs: 0 },
            output: OutputConfig { dir: None },
            ui: UiConfig { progress: true },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    classifier: Option<RawClassifierConfig>,
    pipeline: Option<RawPipelineConfig>,
    output: Option<RawOutputConfig>,
    ui: Option<RawUiConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawClassifierConfig {
    command: Option<String>,
    args: Option<Vec<String>>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPipelineConfig {
    jobs: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOutputConfig {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUiConfig {
    progress: Option<bool>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/vtlabel/config.toml")
}

/// Defaults, then the config file (explicit path, else `~/.config/vtlabel/config.toml`
/// when it exists), then `VTLABEL_*` environment variables.
pub fn load(config_path: Option<&Path>, home_dir: Option<&Path>) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(anyhow::anyhow!(
                    "config file does not exist: {}",
                    path.display()
                ));
            }
            Some(path.to_path_buf())
        }
        None => home_dir
            .map(default_config_path)
            .filter(|p| p.exists()),
    };

    if let Some(path) = path {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s)
            .with_context(|| format!("failed to parse config file (TOML): {}", path.display()))?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(classifier) = raw.classifier {
        if let Some(command) = classifier.command {
            cfg.classifier.command = command;
        }
        if let Some(args) = classifier.args {
            cfg.classifier.args = args;
        }
        if let Some(timeout_secs) = classifier.timeout_secs {
            cfg.classifier.timeout_secs = timeout_secs;
        }
    }

    if let Some(pipeline) = raw.pipeline {
        if let Some(jobs) = pipeline.jobs {
            cfg.pipeline.jobs = jobs;
        }
    }

    if let Some(output) = raw.output {
        if let Some(dir) = output.dir {
            cfg.output.dir = Some(dir);
        }
    }

    if let Some(ui) = raw.ui {
        if let Some(progress) = ui.progress {
            cfg.ui.progress = progress;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("VTLABEL_CLASSIFIER_COMMAND") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.classifier.command = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("VTLABEL_CLASSIFIER_ARGS") {
        cfg.classifier.args = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
    }
    if let Ok(v) = std::env::var("VTLABEL_CLASSIFIER_TIMEOUT_SECS") {
        cfg.classifier.timeout_secs = v
            .trim()
            .parse::<u64>()
            .with_context(|| "VTLABEL_CLASSIFIER_TIMEOUT_SECS")?;
    }
    if let Ok(v) = std::env::var("VTLABEL_PIPELINE_JOBS") {
        cfg.pipeline.jobs = v
            .trim()
            .parse::<usize>()
            .with_context(|| "VTLABEL_PIPELINE_JOBS")?;
    }
    if let Ok(v) = std::env::var("VTLABEL_OUTPUT_DIR") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.output.dir = Some(PathBuf::from(v));
        }
    }
    if let Ok(v) = std::env::var("VTLABEL_UI_PROGRESS") {
        cfg.ui.progress = parse_bool(&v).with_context(|| "VTLABEL_UI_PROGRESS")?;
    }

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}
