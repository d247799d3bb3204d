//! Configuration for grantscrape.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (`--data-dir`)
//! 2. Environment variables (GRANTSCRAPE_DATA_DIR)
//! 3. Config file (`--config`, GRANTSCRAPE_CONFIG, or .grantscrape/config.yaml)
//! 4. Defaults (./data, built-in sources)
//!
//! Config file discovery:
//! - Searches current directory and parents for .grantscrape/config.yaml
//! - `data_dir` in the config file is relative to the project root (the
//!   directory containing .grantscrape/)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::EuSourceConfig;
use crate::core::{PipelineSettings, RetryPolicy};

pub const CONFIG_DIR: &str = ".grantscrape";
pub const CONFIG_FILE: &str = "config.yaml";
pub const DATA_DIR_ENV: &str = "GRANTSCRAPE_DATA_DIR";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_version")]
    pub version: String,
    /// Root of all per-source output directories
    pub data_dir: Option<String>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Overrides for built-in sources, or additional EU listings
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub checkpoint_flush_every: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub min_detail_bytes: Option<usize>,
    pub min_title_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    pub framework_programme: Option<String>,
    pub page_size: Option<u32>,
    pub max_pages: Option<u32>,
    pub programme_period: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Schema version of the config file (default when none was found)
    pub version: String,
    /// Root of per-source output directories
    pub data_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Settings shared by every pipeline run
    pub pipeline: PipelineSettings,
    /// Known sources by name
    pub sources: BTreeMap<String, EuSourceConfig>,
}

impl ResolvedConfig {
    /// Output directory for one source
    pub fn source_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Look up a source, optionally restricted to open calls
    pub fn source(&self, name: &str, open_only: bool) -> Option<EuSourceConfig> {
        let config = self.sources.get(name)?.clone();
        Some(if open_only { config.open_only() } else { config })
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Project root for a config file: the parent of .grantscrape/
fn project_root(config_path: &Path) -> &Path {
    config_path
        .parent()
        .and_then(|p| p.parent())
        .unwrap_or(Path::new("."))
}

/// Load configuration from all sources.
///
/// `explicit` skips discovery; a missing explicit file is an error.
pub fn load(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_path = match explicit {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.to_path_buf())
        }
        None => find_config_file(),
    };

    let file = config_path
        .as_deref()
        .map(load_config_file)
        .transpose()?
        .unwrap_or_default();

    resolve(file, config_path, std::env::var(DATA_DIR_ENV).ok())
}

fn resolve(
    file: ConfigFile,
    config_file: Option<PathBuf>,
    env_data_dir: Option<String>,
) -> Result<ResolvedConfig> {
    let data_dir = if let Some(env_dir) = env_data_dir.filter(|d| !d.is_empty()) {
        PathBuf::from(env_dir)
    } else {
        let base = config_file
            .as_deref()
            .map(project_root)
            .unwrap_or(Path::new("."));
        resolve_path(base, file.data_dir.as_deref().unwrap_or("data"))
    };

    let pipeline = pipeline_settings(&file.pipeline);
    let version = if file.version.is_empty() {
        default_version()
    } else {
        file.version
    };

    let mut sources: BTreeMap<String, EuSourceConfig> = [
        EuSourceConfig::horizon_europe(),
        EuSourceConfig::digital_europe(),
    ]
    .into_iter()
    .map(|s| (s.name.clone(), s))
    .collect();

    for (name, overrides) in file.sources {
        let mut source = match (sources.remove(&name), &overrides.framework_programme) {
            (Some(mut builtin), Some(programme)) => {
                builtin.framework_programme = programme.clone();
                builtin
            }
            (Some(builtin), None) => builtin,
            (None, Some(programme)) => EuSourceConfig::new(name.clone(), programme.clone()),
            (None, None) => anyhow::bail!(
                "Source '{}' is not built in and has no framework_programme",
                name
            ),
        };

        if let Some(page_size) = overrides.page_size {
            source.page_size = page_size;
        }
        if let Some(max_pages) = overrides.max_pages {
            source.max_pages = max_pages;
        }
        if let Some(period) = overrides.programme_period {
            source.programme_period = period;
        }

        sources.insert(name, source);
    }

    if let Some(timeout) = file.pipeline.request_timeout_secs {
        for source in sources.values_mut() {
            source.request_timeout_secs = timeout;
        }
    }

    Ok(ResolvedConfig {
        version,
        data_dir,
        config_file,
        pipeline,
        sources,
    })
}

fn pipeline_settings(config: &PipelineConfig) -> PipelineSettings {
    let defaults = PipelineSettings::default();
    let delay_ms = config.delay_ms.unwrap_or(defaults.request_delay_ms);

    let mut validator = defaults.validator;
    if let Some(bytes) = config.min_detail_bytes {
        validator.min_detail_bytes = bytes;
    }
    if let Some(chars) = config.min_title_chars {
        validator.min_title_chars = chars;
    }

    PipelineSettings {
        retry: RetryPolicy::new(
            config.max_attempts.unwrap_or(defaults.retry.max_attempts),
            Duration::from_millis(delay_ms),
        ),
        request_delay_ms: delay_ms,
        checkpoint_flush_every: config
            .checkpoint_flush_every
            .unwrap_or(defaults.checkpoint_flush_every)
            .max(1),
        validator,
    }
}
