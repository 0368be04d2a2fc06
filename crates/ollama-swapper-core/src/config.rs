//! Typed representation of the proxy's `server` + `policy` config file.
//!
//! Dispatched on file extension: `.yaml`/`.yml` loads through `serde_yaml`,
//! everything else through `serde_json`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// `server.keep_alive` / per-model `keep_alive` may be a bare integer number
/// of seconds or a duration string like `"60s"`. Both are forwarded to the
/// upstream untouched, so we keep whichever shape the config used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeepAlive {
    Seconds(i64),
    Duration(String),
}

/// `server` section of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// `host:port` string the proxy binds to.
    pub listen: String,
    /// Absolute base URL of the default upstream.
    pub upstream: String,
}

/// Policy values applied when no per-model override is present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyDefaults {
    #[serde(default)]
    pub num_ctx: Option<u64>,
    #[serde(default)]
    pub keep_alive: Option<KeepAlive>,
}

/// Per-model policy override, keyed by exact model name in `PolicyConfig::models`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelPolicy {
    #[serde(default)]
    pub num_ctx: Option<u64>,
    #[serde(default)]
    pub keep_alive: Option<KeepAlive>,
    #[serde(default)]
    pub upstream: Option<String>,
}

/// `policy` section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub defaults: PolicyDefaults,
    #[serde(default)]
    pub models: HashMap<String, ModelPolicy>,
}

/// The full, immutable config loaded at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub policy: PolicyConfig,
}

/// A parsed `host:port` listen spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenAddress<'a> {
    pub host: &'a str,
    pub port: u16,
}

/// Split `listen` on its last `:` into host and port.
///
/// # Errors
///
/// Returns [`ConfigError::BadListenSpec`] if `listen` has no `:` separator
/// or the trailing segment is not a valid port number.
pub fn parse_listen(listen: &str) -> Result<ListenAddress<'_>, ConfigError> {
    let (host, port_str) = listen
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::BadListenSpec(listen.to_string()))?;
    let port: u16 = port_str
        .parse()
        .map_err(|_| ConfigError::BadListenSpec(listen.to_string()))?;
    Ok(ListenAddress { host, port })
}

fn read_raw(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        serde_yaml::from_str(&text).map_err(ConfigError::Yaml)
    } else {
        serde_json::from_str(&text).map_err(ConfigError::Json)
    }
}

/// Load and validate `AppConfig` from a JSON or YAML file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, a parse error if
/// the contents are malformed, and [`ConfigError::Invalid`] if either
/// top-level `server` or `policy` key is missing.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let raw = read_raw(path.as_ref())?;

    let has_server = raw.get("server").is_some_and(|v| !v.is_null());
    let has_policy = raw.get("policy").is_some_and(|v| !v.is_null());
    if !has_server || !has_policy {
        return Err(ConfigError::Invalid);
    }

    let config: AppConfig = serde_json::from_value(raw).map_err(ConfigError::Json)?;
    tracing::debug!(
        listen = %config.server.listen,
        upstream = %config.server.upstream,
        models = config.policy.models.len(),
        "config loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listen_parses_host_port() {
        let parsed = parse_listen("127.0.0.1:11434").unwrap();
        assert_eq!(parsed.host, "127.0.0.1");
        assert_eq!(parsed.port, 11434);
    }

    #[test]
    fn parse_listen_requires_port() {
        assert!(parse_listen("127.0.0.1").is_err());
    }

    #[test]
    fn load_config_yaml_parses_policy_and_models() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
server:
  listen: "127.0.0.1:11434"
  upstream: "http://127.0.0.1:11436"
policy:
  defaults:
    num_ctx: 8192
    keep_alive: 0
  models:
    "llama3.1:8b-instruct-q4_K_M":
      num_ctx: 32768
      keep_alive: "60s"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:11434");
        assert_eq!(config.policy.defaults.num_ctx, Some(8192));
        assert_eq!(
            config.policy.models["llama3.1:8b-instruct-q4_K_M"].keep_alive,
            Some(KeepAlive::Duration("60s".to_string()))
        );
    }

    #[test]
    fn load_config_rejects_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server": {"listen": "a:1", "upstream": "b"}}"#).unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid));
    }
}
