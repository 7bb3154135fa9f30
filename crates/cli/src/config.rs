//! Server configuration.
//!
//! Loaded from a TOML file; a missing file yields the defaults. Selected
//! keys can be overridden from the environment:
//! - `CIVIC_API_KEY` sets `server.api_key` (empty string disables auth)
//! - `CIVIC_RATE_LIMIT` sets `server.rate_limit`

use std::path::{Path, PathBuf};

use civic_engine::{ListingPolicy, WorkflowPolicy};
use serde::{Deserialize, Serialize};

/// Default listen port.
pub(crate) const DEFAULT_PORT: u16 = 8080;

/// Default rate limit: 60 requests per minute per IP.
pub(crate) const DEFAULT_RATE_LIMIT: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ServerSection {
    pub(crate) port: u16,
    pub(crate) rate_limit: u64,
    pub(crate) api_key: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            rate_limit: DEFAULT_RATE_LIMIT,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ClassifierSection {
    /// Endpoint of the external category classifier. Unset disables
    /// classification at intake.
    pub(crate) url: Option<String>,
    pub(crate) timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ServerConfig {
    pub(crate) server: ServerSection,
    pub(crate) workflow: WorkflowPolicy,
    pub(crate) listing: ListingPolicy,
    pub(crate) classifier: ClassifierSection,
}

impl ServerConfig {
    /// Load from `path`, falling back to defaults when no file exists there.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }

    /// Load from a file that must exist.
    pub(crate) fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `CIVIC_*` overrides from the process environment.
    pub(crate) fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(key) = lookup("CIVIC_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Some(raw) = lookup("CIVIC_RATE_LIMIT") {
            self.server.rate_limit = raw.parse().map_err(|_| ConfigError::Invalid {
                key: "CIVIC_RATE_LIMIT",
                message: format!("'{}' is not a positive integer", raw),
            })?;
        }
        // An empty key means "no auth", same as leaving it unset.
        self.server.api_key = self.server.api_key.filter(|k| !k.is_empty());
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.server.rate_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "server.rate_limit",
                message: "must be at least 1".into(),
            });
        }
        if self.workflow.dispatch_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "workflow.dispatch_attempts",
                message: "must be at least 1".into(),
            });
        }
        let confidence = self.workflow.classifier_min_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ConfigError::Invalid {
                key: "workflow.classifier_min_confidence",
                message: format!("{} is outside 0.0..=1.0", confidence),
            });
        }
        if let Some(url) = &self.classifier.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    key: "classifier.url",
                    message: format!("'{}' is not an http(s) URL", url),
                });
            }
        }
        Ok(())
    }
}
