//! Startup-time configuration errors.
//!
//! These are the only fatal errors in the system: a malformed `listen` spec
//! or a config file missing its `server`/`policy` sections aborts startup
//! before the proxy ever binds a socket.

use thiserror::Error;

/// Errors raised while loading or validating `AppConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `server.listen` did not contain a `:` separator.
    #[error("listen address `{0}` must be in host:port format")]
    BadListenSpec(String),

    /// The config file's top-level `server` or `policy` key was absent.
    #[error("config must include server and policy sections")]
    Invalid,

    /// The config file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file's contents did not parse as JSON.
    #[error("failed to parse config as JSON: {0}")]
    Json(#[source] serde_json::Error),

    /// The config file's contents did not parse as YAML.
    #[error("failed to parse config as YAML: {0}")]
    Yaml(#[source] serde_yaml::Error),
}
