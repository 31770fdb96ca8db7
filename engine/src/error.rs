use std::path::PathBuf;

use benchwatch_config::ConfigError;
use thiserror::Error;

/// Fatal problems detected before any target runs.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("benchmark root {} does not exist", path.display())]
    MissingRoot {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("benchmark root {} is not a directory", path.display())]
    NotADirectory { path: PathBuf },
    #[error("invalid filter `{pattern}`: {source}")]
    Filter {
        pattern: String,
        source: regex::Error,
    },
    #[error("invalid discovery pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
    #[error("parallelism must be at least 1")]
    ZeroParallelism,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Watch(#[from] WatchError),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to initialize file watcher: {0}")]
    Init(#[source] notify::Error),
    #[error("none of the roots could be watched")]
    NoRoots,
    #[error("change events were already taken")]
    EventsTaken,
}
