//! Environment Configuration Loader
//!
//! Loads environment variables from `/etc/ovn-driver/environment` (or one of
//! the fallbacks) and builds the typed [`DriverConfig`].
//!
//! ## Usage
//!
//! Call `load_environment()` early in main() before reading the config:
//!
//! ```rust,no_run
//! use ovn_driver::config::{load_environment, DriverConfig};
//!
//! load_environment();
//! let config = DriverConfig::from_env().expect("invalid configuration");
//! ```

use ovn_ovsdb::{Endpoint, RetryPolicy};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DriverError, Result};

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/ovn-driver/environment";

/// Paths checked in order of priority
pub const ENV_FILE_PATHS: &[&str] = &["/etc/ovn-driver/environment", "/etc/ovn-driver.env", ".env"];

/// Overrides the environment file location
pub const ENV_FILE_VAR: &str = "OVN_DRIVER_ENV_FILE";

pub const DEFAULT_NB_HOST: &str = "127.0.0.1";
pub const DEFAULT_NB_PORT: u16 = 6641;
pub const DEFAULT_OVS_SOCKET: &str = "/var/run/openvswitch/db.sock";
pub const DEFAULT_INTEGRATION_BRIDGE: &str = "br-int";
pub const DEFAULT_PLUGIN_SOCKET: &str = "/run/docker/plugins/ovn.sock";
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Load environment variables from the first environment file found.
///
/// Existing variables are never overridden. Returns the path that was
/// loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var(ENV_FILE_VAR) {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                if let Some((key, value)) = parse_env_line(line) {
                    if std::env::var(&key).is_err() {
                        std::env::set_var(&key, &value);
                        loaded_count += 1;
                        debug!("Loaded: {}={}", key, value);
                    } else {
                        skipped_count += 1;
                        debug!("Skipped (already set): {}", key);
                    }
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );
            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse `KEY=VALUE`, `KEY="VALUE"` or `KEY='VALUE'`
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Capability scope reported to the container engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    Local,
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Local => "local",
            Scope::Global => "global",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Scope::Local),
            "global" => Ok(Scope::Global),
            other => Err(DriverError::validation(format!(
                "invalid scope '{}' (expected local or global)",
                other
            ))),
        }
    }
}

/// Process configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub nb_endpoint: Endpoint,
    pub ovs_endpoint: Endpoint,
    pub integration_bridge: String,
    pub scope: Scope,
    pub plugin_socket: PathBuf,
    pub docker_socket: PathBuf,
    pub transaction_timeout: Duration,
    pub retry: RetryPolicy,
    pub debug: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            nb_endpoint: Endpoint::tcp(DEFAULT_NB_HOST, DEFAULT_NB_PORT),
            ovs_endpoint: Endpoint::unix(DEFAULT_OVS_SOCKET),
            integration_bridge: DEFAULT_INTEGRATION_BRIDGE.to_string(),
            scope: Scope::Local,
            plugin_socket: PathBuf::from(DEFAULT_PLUGIN_SOCKET),
            docker_socket: PathBuf::from(DEFAULT_DOCKER_SOCKET),
            transaction_timeout: ovn_ovsdb::DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            debug: false,
        }
    }
}

impl DriverConfig {
    /// Build from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or empty keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        let nb_host = get("OVN_NB_HOST").unwrap_or_else(|| DEFAULT_NB_HOST.to_string());
        let nb_port = parse_number("OVN_NB_PORT", get("OVN_NB_PORT"), DEFAULT_NB_PORT)?;
        config.nb_endpoint = Endpoint::tcp(nb_host, nb_port);

        if let Some(socket) = get("OVS_DB_SOCKET") {
            config.ovs_endpoint = Endpoint::unix(socket);
        }
        if let Some(bridge) = get("OVN_INTEGRATION_BRIDGE") {
            config.integration_bridge = bridge;
        }
        if let Some(scope) = get("OVN_DRIVER_SCOPE") {
            config.scope = scope.parse()?;
        }
        if let Some(socket) = get("OVN_PLUGIN_SOCKET") {
            config.plugin_socket = PathBuf::from(socket);
        }
        if let Some(socket) = get("DOCKER_SOCKET") {
            config.docker_socket = PathBuf::from(socket);
        }

        let timeout = parse_number("OVN_TRANSACTION_TIMEOUT_SECS", get("OVN_TRANSACTION_TIMEOUT_SECS"), 30u64)?;
        if timeout == 0 {
            return Err(DriverError::validation(
                "OVN_TRANSACTION_TIMEOUT_SECS must be greater than zero",
            ));
        }
        config.transaction_timeout = Duration::from_secs(timeout);

        config.retry = RetryPolicy {
            attempts: parse_number("OVN_CONNECT_RETRIES", get("OVN_CONNECT_RETRIES"), 3u32)?,
            delay: Duration::from_secs(parse_number(
                "OVN_CONNECT_RETRY_DELAY_SECS",
                get("OVN_CONNECT_RETRY_DELAY_SECS"),
                5u64,
            )?),
        };

        config.debug = get("OVN_DRIVER_DEBUG")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
            .unwrap_or(false);

        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(v) => v.trim().parse().map_err(|_| {
            DriverError::validation(format!("{} must be a number, got '{}'", key, v))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_env_line_simple() {
        let (k, v) = parse_env_line("FOO=bar").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_quoted() {
        let (_, v) = parse_env_line("FOO=\"bar baz\"").unwrap();
        assert_eq!(v, "bar baz");
        let (_, v) = parse_env_line("export FOO='bar'").unwrap();
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_empty() {
        assert!(parse_env_line("").is_none());
        assert!(parse_env_line("=value").is_none());
    }

    #[test]
    fn test_defaults() {
        let config = DriverConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DriverConfig::default());
        assert_eq!(config.nb_endpoint.to_string(), "tcp:127.0.0.1:6641");
        assert_eq!(config.scope, Scope::Local);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.transaction_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = DriverConfig::from_lookup(lookup(&[
            ("OVN_NB_HOST", "10.1.1.1"),
            ("OVN_NB_PORT", "16641"),
            ("OVN_DRIVER_SCOPE", "global"),
            ("OVN_INTEGRATION_BRIDGE", "br-ovn"),
            ("OVN_CONNECT_RETRIES", "5"),
            ("OVN_DRIVER_DEBUG", "yes"),
        ]))
        .unwrap();
        assert_eq!(config.nb_endpoint, Endpoint::tcp("10.1.1.1", 16641));
        assert_eq!(config.scope, Scope::Global);
        assert_eq!(config.integration_bridge, "br-ovn");
        assert_eq!(config.retry.attempts, 5);
        assert!(config.debug);
    }

    #[test]
    fn test_invalid_values() {
        assert!(DriverConfig::from_lookup(lookup(&[("OVN_NB_PORT", "not-a-port")])).is_err());
        assert!(DriverConfig::from_lookup(lookup(&[("OVN_DRIVER_SCOPE", "swarm")])).is_err());
        assert!(DriverConfig::from_lookup(lookup(&[("OVN_TRANSACTION_TIMEOUT_SECS", "0")])).is_err());
    }

    #[test]
    fn test_env_file_does_not_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "OVN_DRIVER_TEST_LOADED=from-file").unwrap();
        writeln!(file, "OVN_DRIVER_TEST_PRESET=from-file").unwrap();
        std::env::set_var("OVN_DRIVER_TEST_PRESET", "from-env");

        let path = file.path().to_str().unwrap().to_string();
        assert_eq!(try_load_env_file(&path), Some(path.clone()));
        assert_eq!(std::env::var("OVN_DRIVER_TEST_LOADED").unwrap(), "from-file");
        assert_eq!(std::env::var("OVN_DRIVER_TEST_PRESET").unwrap(), "from-env");
    }
}
