//! Engine configuration.
//!
//! Everything here is deliberately small: the engine's tunables are the
//! fallback verdict, the finished-session retention cap, and the number of
//! worker loops. Listener specs, codec options and TLS belong to the
//! runtime that embeds the engine.

use std::path::Path;

use serde::Deserialize;

use crate::{error::ConfigError, status::Status};

/// Configuration for a filter engine instance, loadable from TOML:
///
/// ```toml
/// fallback_status = "accept"
/// finished_session_retention = 128
/// workers = 4
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Verdict substituted when handler code fails, chosen so mail is not
    /// silently lost on filter bugs.
    pub fallback_status: Status,

    /// How many recently finished session records each dispatcher retains
    /// for bookkeeping. Exceeding the cap evicts oldest first.
    pub finished_session_retention: usize,

    /// Number of worker event loops to run. Each worker owns a private
    /// dispatcher; connections are not shared between workers.
    pub workers: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            fallback_status: Status::Accept,
            finished_session_retention: 128,
            workers: 1,
        }
    }
}

impl FilterConfig {
    /// Parse a configuration document.
    ///
    /// # Errors
    /// Fails if the document is not valid TOML for this schema.
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(Into::into)
    }

    /// Load a configuration file.
    ///
    /// # Errors
    /// Fails if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_toml(&contents)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = FilterConfig::default();
        assert_eq!(config.fallback_status, Status::Accept);
        assert_eq!(config.finished_session_retention, 128);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn empty_document_is_the_default() {
        assert_eq!(FilterConfig::from_toml("").unwrap(), FilterConfig::default());
    }

    #[test]
    fn status_aliases_resolve() {
        let config = FilterConfig::from_toml("fallback_status = \"temporary-failure\"").unwrap();
        assert_eq!(config.fallback_status, Status::TemporaryFailure);

        let config = FilterConfig::from_toml("fallback_status = \"TEMPORARY_FAILURE\"").unwrap();
        assert_eq!(config.fallback_status, Status::TemporaryFailure);
    }

    #[test]
    fn invalid_status_alias_fails() {
        assert!(FilterConfig::from_toml("fallback_status = \"acept\"").is_err());
    }

    #[test]
    fn unknown_keys_fail() {
        assert!(FilterConfig::from_toml("falback_status = \"accept\"").is_err());
    }

    #[test]
    fn load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sift.toml");
        std::fs::write(&path, "workers = 4\nfinished_session_retention = 2\n").unwrap();

        let config = FilterConfig::from_path(&path).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.finished_session_retention, 2);

        let missing = FilterConfig::from_path(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
