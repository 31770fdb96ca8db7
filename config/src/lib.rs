//! Configuration file model for benchwatch.
//!
//! ```toml
//! [run]
//! parallelism = 4
//! timeout_seconds = 600
//! filter = "Sort"
//! reporter = "terminal"
//!
//! [discovery]
//! patterns = ["*_test.go"]
//! default_root = "benchmarks"
//!
//! [watch]
//! debounce_ms = 100
//! extensions = ["go"]
//! initial_run = true
//!
//! [command]
//! program = "go"
//! args = ["test", "-bench", "{filter}", "-benchmem"]
//! max_output_bytes = 65536
//!
//! [ui]
//! ascii_only = false
//! high_contrast = false
//! reduced_motion = false
//! ```
//!
//! Every section and field is optional. Values given on the command line win
//! over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use benchwatch_types::{ReporterKind, UiOptions};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
pub const DEFAULT_INTAKE_CAPACITY: usize = 64;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

// Default value function for serde (bool::default() is false, so only true needs a fn)
const fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Invalid { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub run: RunConfig,
    pub discovery: DiscoveryConfig,
    pub watch: WatchConfig,
    pub command: CommandConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Worker count. Must be at least 1.
    pub parallelism: usize,
    pub timeout_seconds: u64,
    /// Regex applied to target display names.
    pub filter: String,
    pub reporter: ReporterKind,
    pub intake_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            filter: ".".to_string(),
            reporter: ReporterKind::default(),
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
        }
    }
}

impl RunConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Glob patterns matched against file names.
    pub patterns: Vec<String>,
    /// Root scanned when no directories are given on the command line.
    pub default_root: PathBuf,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["*_test.go".to_string()],
            default_root: PathBuf::from("benchmarks"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
    /// File extensions (without the dot) whose changes are reported.
    pub extensions: Vec<String>,
    /// Run every discovered target once before waiting for changes.
    #[serde(default = "default_true")]
    pub initial_run: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            extensions: vec!["go".to_string()],
            initial_run: true,
        }
    }
}

impl WatchConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// External command template.
///
/// `args` may use the placeholders `{filter}`, `{path}`, `{dir}`, and `{name}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
    pub max_output_bytes: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: "go".to_string(),
            args: ["test", "-bench", "{filter}", "-benchmem"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Dashboard appearance.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub ascii_only: bool,
    pub high_contrast: bool,
    pub reduced_motion: bool,
}

impl UiConfig {
    #[must_use]
    pub fn options(&self) -> UiOptions {
        UiOptions {
            ascii_only: self.ascii_only,
            high_contrast: self.high_contrast,
            reduced_motion: self.reduced_motion,
        }
    }
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unclosed reference stays literal.
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl BenchConfig {
    /// Load the config from the default location.
    ///
    /// Returns `Ok(None)` when there is no home directory or no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    /// Load and validate the config at `path`. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        let mut config: Self = match toml::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        config.expand_env();
        config.validate(path)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    fn expand_env(&mut self) {
        self.run.filter = expand_env_vars(&self.run.filter);
        self.discovery.default_root =
            PathBuf::from(expand_env_vars(&self.discovery.default_root.to_string_lossy()));
        for pattern in &mut self.discovery.patterns {
            *pattern = expand_env_vars(pattern);
        }
        self.command.program = expand_env_vars(&self.command.program);
        for arg in &mut self.command.args {
            *arg = expand_env_vars(arg);
        }
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if self.run.parallelism == 0 {
            return Err(invalid("run.parallelism must be at least 1"));
        }
        if self.run.intake_capacity == 0 {
            return Err(invalid("run.intake_capacity must be at least 1"));
        }
        if self.run.timeout_seconds == 0 {
            return Err(invalid("run.timeout_seconds must be at least 1"));
        }
        if self.command.program.trim().is_empty() {
            return Err(invalid("command.program must not be empty"));
        }
        if self.discovery.patterns.is_empty() {
            return Err(invalid("discovery.patterns must not be empty"));
        }
        Ok(())
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".benchwatch").join("config.toml"))
}
