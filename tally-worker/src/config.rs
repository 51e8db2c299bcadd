use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tally_core::TallyConfig;

/// Default database file, relative to the working directory.
pub const DEFAULT_DATABASE_PATH: &str = "tally.db";

/// Default pause between recounts in watch mode.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Final worker configuration with defaults applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub database: DatabaseConfig,
    pub recount: RecountConfig,
    pub classifier: Option<ClassifierConfig>,
    pub engine: TallyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Local libSQL database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecountConfig {
    /// Passes in flight at once
    pub concurrency: usize,
    /// Seconds between recounts with `--watch`
    pub interval_secs: u64,
}

impl Default for RecountConfig {
    fn default() -> Self {
        Self {
            concurrency: tally_core::recount::DEFAULT_CONCURRENCY,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// Term-matching spam classifier used in production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Case-insensitive terms that mark a body as spam
    pub terms: Vec<String>,
    /// Penalty added per matching term
    pub penalty_per_match: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            penalty_per_match: 25.0,
        }
    }
}

/// Configuration as stored in one TOML file. A section present in a later layer replaces the
/// whole section from earlier layers.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawWorkerConfig {
    database: Option<DatabaseConfig>,
    recount: Option<RecountConfig>,
    classifier: Option<ClassifierConfig>,
    engine: Option<TallyConfig>,
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.recount.concurrency == 0 {
            bail!("recount.concurrency must be at least 1");
        }
        if self.recount.interval_secs == 0 {
            bail!("recount.interval_secs must be at least 1");
        }
        if let Some(classifier) = &self.classifier
            && !(classifier.penalty_per_match.is_finite() && classifier.penalty_per_match >= 0.0)
        {
            bail!("classifier.penalty_per_match must be a non-negative number");
        }
        self.engine.validate()?;
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user, then project, then an explicit file)
    pub fn load(explicit: Option<&Path>) -> Result<WorkerConfig> {
        let mut layers = Vec::new();
        if let Some(user_path) = Self::user_config_path() {
            layers.push(user_path);
        }
        layers.push(Self::project_config_path());

        let mut config = Self::load_layers(&layers)?;
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("config file not found: {}", path.display());
            }
            config = Self::apply(config, Self::read_layer(path)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Merge every existing file in `paths`, in order. Missing files are skipped.
    pub fn load_layers(paths: &[PathBuf]) -> Result<WorkerConfig> {
        let mut config = WorkerConfig::default();
        for path in paths.iter().filter(|p| p.exists()) {
            config = Self::apply(config, Self::read_layer(path)?);
        }
        Ok(config)
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tally").map(|dirs| dirs.config_dir().join("worker.toml"))
    }

    /// Get project config path
    /// Can be overridden with TALLY_CONFIG_DIR env var
    pub fn project_config_path() -> PathBuf {
        Self::project_config_path_in(std::env::var_os("TALLY_CONFIG_DIR").map(PathBuf::from))
    }

    fn project_config_path_in(dir: Option<PathBuf>) -> PathBuf {
        dir.unwrap_or_else(|| PathBuf::from(".tally"))
            .join("worker.toml")
    }

    fn read_layer(path: &Path) -> Result<RawWorkerConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config in {}", path.display()))
    }

    fn apply(base: WorkerConfig, overlay: RawWorkerConfig) -> WorkerConfig {
        WorkerConfig {
            database: overlay.database.unwrap_or(base.database),
            recount: overlay.recount.unwrap_or(base.recount),
            classifier: overlay.classifier.or(base.classifier),
            engine: overlay.engine.unwrap_or(base.engine),
        }
    }
}
