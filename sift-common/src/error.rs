//! Error types shared across the sift crates.

use std::io;

use thiserror::Error;

/// Invalid input to a status lookup or assignment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    /// The name matched no status alias.
    #[error("unknown status name: {0:?}")]
    InvalidStatusName(String),
}

/// Invalid input to reply construction or translation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyError {
    /// Reply codes outside the 4xx/5xx rejection classes carry no verdict.
    #[error("reply code {0} is outside the rejection classes (4xx/5xx)")]
    InvalidCode(u16),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
