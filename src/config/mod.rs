//! Configuration loading and management
//!
//! A [`ServerConfig`] is built once, validated, and handed to
//! [`WsServer::new`](crate::server::WsServer::new). There is no way to change
//! it afterwards.
//!
//! ```yaml
//! listen_addr: "0.0.0.0:8080"
//! base_path: /ws
//! health_path: /health
//! origin_policy:
//!   mode: allow_list
//!   origins: ["https://app.example.com"]
//! handlers: [echo, broadcast, healthcheck]
//! readiness:
//!   attempts: 10
//!   delay_ms: 1000
//! shutdown_timeout_ms: 5000
//! ```

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Built-in message handlers that can be switched on by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinHandler {
    /// `echo`: reply to the sender with the same payload
    Echo,
    /// `broadcast`: forward the payload to every connection
    Broadcast,
    /// `healthcheck`: reply with a fixed acknowledgment
    #[serde(rename = "healthcheck")]
    HealthCheck,
}

impl BuiltinHandler {
    pub fn all() -> Vec<BuiltinHandler> {
        vec![
            BuiltinHandler::Echo,
            BuiltinHandler::Broadcast,
            BuiltinHandler::HealthCheck,
        ]
    }

    /// The envelope `type` this handler answers to
    pub fn message_type(&self) -> &'static str {
        use crate::server::websocket::protocol::{BROADCAST, ECHO, HEALTH_CHECK};
        match self {
            BuiltinHandler::Echo => ECHO,
            BuiltinHandler::Broadcast => BROADCAST,
            BuiltinHandler::HealthCheck => HEALTH_CHECK,
        }
    }
}

/// Which browser origins may open a connection
///
/// Requests without an `Origin` header (non-browser clients) are always
/// accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OriginPolicy {
    /// Accept every origin
    Any,
    /// Accept only origins whose host matches the `Host` header
    #[default]
    SameOrigin,
    /// Accept only the listed origins (exact match, e.g. `https://a.example`)
    AllowList { origins: Vec<String> },
}

impl OriginPolicy {
    /// Decide whether an upgrade from `origin` may proceed
    pub fn allows(&self, origin: Option<&str>, host: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::AllowList { origins } => origins
                .iter()
                .any(|a| a.trim_end_matches('/').eq_ignore_ascii_case(origin.trim_end_matches('/'))),
            OriginPolicy::SameOrigin => {
                let Some(host) = host else {
                    return false;
                };
                let Ok(url) = url::Url::parse(origin) else {
                    return false;
                };
                let Some(origin_host) = url.host_str() else {
                    return false;
                };
                let origin_authority = match url.port() {
                    Some(port) => format!("{origin_host}:{port}"),
                    None => origin_host.to_string(),
                };
                origin_authority.eq_ignore_ascii_case(host)
            }
        }
    }
}

/// Readiness probe budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Number of probe attempts before giving up
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Pause between attempts, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl ReadinessConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Path of the WebSocket upgrade endpoint
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Path of the plain HTTP liveness endpoint; `None` disables it
    #[serde(default = "default_health_path")]
    pub health_path: Option<String>,

    #[serde(default)]
    pub origin_policy: OriginPolicy,

    /// Built-in handlers to enable
    #[serde(default = "BuiltinHandler::all")]
    pub handlers: Vec<BuiltinHandler>,

    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// How long `stop()` waits for the listener to finish
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_health_path() -> Option<String> {
    Some("/health".to_string())
}

fn default_attempts() -> u32 {
    10
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            base_path: default_base_path(),
            health_path: default_health_path(),
            origin_policy: OriginPolicy::default(),
            handlers: BuiltinHandler::all(),
            readiness: ReadinessConfig::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from the `port/path` shorthand
    ///
    /// `"8080"` listens on `0.0.0.0:8080` at `/`; `"8080/ws"` serves `/ws`.
    pub fn from_port_and_path(input: &str) -> Result<Self> {
        let (port, path) = match input.split_once('/') {
            Some((port, path)) => (port, path),
            None => (input, ""),
        };
        let port: u16 = port
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid port in '{}'", input))?;

        let config = Self {
            listen_addr: format!("0.0.0.0:{port}"),
            base_path: format!("/{path}"),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Check the config can actually be served
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            bail!("listen_addr must not be empty");
        }
        check_route_path("base_path", &self.base_path)?;
        if let Some(health) = &self.health_path {
            check_route_path("health_path", health)?;
            if *health == self.base_path {
                bail!("health_path and base_path must differ");
            }
        }
        if self.readiness.attempts == 0 {
            bail!("readiness.attempts must be at least 1");
        }
        if let OriginPolicy::AllowList { origins } = &self.origin_policy
            && origins.is_empty()
        {
            bail!("origin_policy.origins must not be empty");
        }
        Ok(())
    }
}

/// A literal route: leading `/`, no capture or wildcard segments
fn check_route_path(field: &str, path: &str) -> Result<()> {
    if !path.starts_with('/') {
        bail!("{field} must start with '/': {path}");
    }
    if path.contains(['{', '}']) {
        bail!("{field} must be a literal path, not a pattern: {path}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.base_path, "/");
        assert_eq!(config.health_path.as_deref(), Some("/health"));
        assert_eq!(config.handlers.len(), 3);
        assert_eq!(config.readiness.attempts, 10);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_with_defaults() {
        let config = ServerConfig::from_yaml_str("base_path: /ws\n").unwrap();
        assert_eq!(config.base_path, "/ws");
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.origin_policy, OriginPolicy::SameOrigin);
    }

    #[test]
    fn test_yaml_full() {
        let yaml = r#"
listen_addr: "0.0.0.0:9000"
base_path: /socket
health_path: ~
origin_policy:
  mode: allow_list
  origins: ["https://app.example.com"]
handlers: [echo, healthcheck]
readiness:
  attempts: 3
  delay_ms: 50
shutdown_timeout_ms: 1500
"#;
        let config = ServerConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert!(config.health_path.is_none());
        assert_eq!(
            config.handlers,
            vec![BuiltinHandler::Echo, BuiltinHandler::HealthCheck]
        );
        assert_eq!(config.readiness.delay(), Duration::from_millis(50));
        assert_eq!(config.shutdown_timeout_ms, 1500);
    }

    #[test]
    fn test_yaml_origin_any() {
        let config = ServerConfig::from_yaml_str("origin_policy:\n  mode: any\n").unwrap();
        assert_eq!(config.origin_policy, OriginPolicy::Any);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = ServerConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert_eq!(ServerConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_port_and_path_shorthand() {
        let config = ServerConfig::from_port_and_path("8080/ws").unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.base_path, "/ws");

        let config = ServerConfig::from_port_and_path("9001").unwrap();
        assert_eq!(config.base_path, "/");

        let config = ServerConfig::from_port_and_path("9001/").unwrap();
        assert_eq!(config.base_path, "/");

        assert!(ServerConfig::from_port_and_path("http/ws").is_err());
    }

    #[test]
    fn test_validation_failures() {
        let bad_path = ServerConfig {
            base_path: "ws".to_string(),
            ..ServerConfig::default()
        };
        assert!(bad_path.validate().is_err());

        let clash = ServerConfig {
            base_path: "/health".to_string(),
            ..ServerConfig::default()
        };
        assert!(clash.validate().is_err());

        let no_attempts = ServerConfig {
            readiness: ReadinessConfig {
                attempts: 0,
                delay_ms: 10,
            },
            ..ServerConfig::default()
        };
        assert!(no_attempts.validate().is_err());

        let empty_list = ServerConfig {
            origin_policy: OriginPolicy::AllowList { origins: vec![] },
            ..ServerConfig::default()
        };
        assert!(empty_list.validate().is_err());
    }

    #[test]
    fn test_route_patterns_are_rejected() {
        for path in ["/{id}", "/ws/{*rest}", "/a}"] {
            let config = ServerConfig {
                base_path: path.to_string(),
                ..ServerConfig::default()
            };
            assert!(config.validate().is_err(), "base_path {path} should fail");

            let config = ServerConfig {
                health_path: Some(path.to_string()),
                ..ServerConfig::default()
            };
            assert!(config.validate().is_err(), "health_path {path} should fail");
        }
        assert!(ServerConfig::from_port_and_path("8080/{room}").is_err());
    }

    #[test]
    fn test_origin_policy_without_origin_header() {
        for policy in [
            OriginPolicy::Any,
            OriginPolicy::SameOrigin,
            OriginPolicy::AllowList {
                origins: vec!["https://a.example".to_string()],
            },
        ] {
            assert!(policy.allows(None, Some("localhost:8080")));
        }
    }

    #[test]
    fn test_same_origin_policy() {
        let policy = OriginPolicy::SameOrigin;
        assert!(policy.allows(Some("http://localhost:8080"), Some("localhost:8080")));
        assert!(policy.allows(Some("https://Example.com"), Some("example.com")));
        assert!(!policy.allows(Some("http://evil.example"), Some("localhost:8080")));
        assert!(!policy.allows(Some("http://localhost:9999"), Some("localhost:8080")));
        assert!(!policy.allows(Some("not a url"), Some("localhost:8080")));
        assert!(!policy.allows(Some("http://localhost:8080"), None));
    }

    #[test]
    fn test_allow_list_policy() {
        let policy = OriginPolicy::AllowList {
            origins: vec!["https://app.example.com".to_string()],
        };
        assert!(policy.allows(Some("https://app.example.com"), None));
        assert!(policy.allows(Some("https://app.example.com/"), None));
        assert!(!policy.allows(Some("https://other.example.com"), None));
    }

    #[test]
    fn test_builtin_message_types() {
        assert_eq!(BuiltinHandler::Echo.message_type(), "echo");
        assert_eq!(BuiltinHandler::Broadcast.message_type(), "broadcast");
        assert_eq!(BuiltinHandler::HealthCheck.message_type(), "healthcheck");
    }
}
