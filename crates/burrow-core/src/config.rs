use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BurrowError, Result};

const CONFIG_ENV: &str = "BURROW_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurrowConfig {
    /// Root of the backup catalog.
    pub backup_dir: PathBuf,
    /// Instance used when `--instance` is not given.
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Worker threads for file reconstruction. 0 uses every core.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
        }
    }
}

fn default_threads() -> usize {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Recovery window such as "7d". Backups older than the window only
    /// merge with `--merge-expired`.
    #[serde(default)]
    pub window: Option<String>,
}

impl BurrowConfig {
    /// Pick the instance: explicit choice first, then the configured default.
    pub fn instance_name<'a>(&'a self, explicit: Option<&'a str>) -> Result<&'a str> {
        explicit.or(self.instance.as_deref()).ok_or_else(|| {
            BurrowError::Config("no instance given and none configured".into())
        })
    }
}

/// Where the config file came from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    CliArg(PathBuf),
    EnvVar(PathBuf),
    SearchOrder { path: PathBuf, level: &'static str },
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::CliArg(p) | ConfigSource::EnvVar(p) => p,
            ConfigSource::SearchOrder { path, .. } => path,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::CliArg(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::EnvVar(p) => write!(f, "{} ({CONFIG_ENV})", p.display()),
            ConfigSource::SearchOrder { path, level } => {
                write!(f, "{} ({level})", path.display())
            }
        }
    }
}

/// Candidate config files, highest priority first: working directory, user
/// config dir, system.
pub fn default_config_search_paths() -> Vec<(PathBuf, &'static str)> {
    let mut paths = vec![(PathBuf::from("burrow.yaml"), "project")];
    if let Some(dir) = dirs::config_dir() {
        paths.push((dir.join("burrow").join("config.yaml"), "user"));
    }
    paths.push((PathBuf::from("/etc/burrow/config.yaml"), "system"));
    paths
}

/// `--config` wins, then `$BURROW_CONFIG`, then the first existing search path.
pub fn resolve_config_path(cli_config: Option<&str>) -> Option<ConfigSource> {
    if let Some(path) = cli_config {
        return Some(ConfigSource::CliArg(PathBuf::from(path)));
    }
    if let Some(val) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(ConfigSource::EnvVar(PathBuf::from(val)));
    }
    default_config_search_paths()
        .into_iter()
        .find(|(path, _)| path.exists())
        .map(|(path, level)| ConfigSource::SearchOrder { path, level })
}

pub fn load_config(path: &Path) -> Result<BurrowConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| BurrowError::Config(format!("cannot read '{}': {e}", path.display())))?;
    let config: BurrowConfig = serde_yaml::from_str(&contents)
        .map_err(|e| BurrowError::Config(format!("invalid config '{}': {e}", path.display())))?;
    if config.backup_dir.as_os_str().is_empty() {
        return Err(BurrowError::Config(format!(
            "'{}': backup_dir must not be empty",
            path.display()
        )));
    }
    Ok(config)
}

pub fn minimal_config_template() -> &'static str {
    r#"# burrow configuration
backup_dir: /var/lib/burrow
instance: main

merge:
  threads: 4

# retention:
#   window: 14d
"#
}
