use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum WatchError {
    /// I/O related failure while reading configuration text
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No usable rule set is loaded, updates cannot be evaluated
    #[error("Event config is empty.")]
    EmptyConfig,

    /// Update payload had the wrong shape
    #[error("Incorrect payload data type: {0}")]
    Input(String),
}

/// Convenient alias over [`Result`] using [`WatchError`]
pub type Result<T> = std::result::Result<T, WatchError>;
