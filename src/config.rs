//! Wolfpack Configuration
//!
//! Configuration structures for a wolfpack node: where the coordination
//! service lives and which paths the cluster primitives operate under.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main wolfpack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfpackConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Coordination service connection configuration
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Cluster path configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier (generated at startup when omitted)
    #[serde(default)]
    pub id: Option<String>,

    /// Address other cluster members use to reach this node
    pub advertise_address: String,
}

/// Coordination service connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Comma-separated coordination service addresses (host:port)
    #[serde(default = "default_servers")]
    pub servers: String,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

/// Cluster path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Parent path for candidacy nodes
    #[serde(default = "default_election_path")]
    pub election_path: String,

    /// Parent path for service registry nodes
    #[serde(default = "default_registry_path")]
    pub registry_path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_servers() -> String {
    "localhost:2181".to_string()
}

fn default_session_timeout_ms() -> u64 {
    3000
}

fn default_election_path() -> String {
    "/election".to_string()
}

fn default_registry_path() -> String {
    "/service_registry".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            election_path: default_election_path(),
            registry_path: default_registry_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WolfpackConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WolfpackConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: WolfpackConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.node.advertise_address.is_empty() {
            return Err(Error::Config(
                "node.advertise_address must not be empty".to_string(),
            ));
        }

        if self.coordination.servers.is_empty() {
            return Err(Error::Config(
                "coordination.servers must not be empty".to_string(),
            ));
        }

        if self.coordination.session_timeout_ms == 0 {
            return Err(Error::Config(
                "coordination.session_timeout_ms must be greater than zero".to_string(),
            ));
        }

        validate_path("cluster.election_path", &self.cluster.election_path)?;
        validate_path("cluster.registry_path", &self.cluster.registry_path)?;

        if self.cluster.election_path == self.cluster.registry_path {
            return Err(Error::Config(
                "cluster.election_path and cluster.registry_path must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Session timeout as a [`Duration`]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.coordination.session_timeout_ms)
    }
}

/// Check that a configured coordination path is absolute and normalized
fn validate_path(field: &str, path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::Config(format!("{} must start with '/'", field)));
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(Error::Config(format!("{} must not end with '/'", field)));
    }
    if path == "/" {
        return Err(Error::Config(format!("{} must not be the root path", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_defaults() {
        let config = WolfpackConfig::from_str(
            r#"
            [node]
            advertise_address = "10.0.10.115:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.node.id, None);
        assert_eq!(config.coordination.servers, "localhost:2181");
        assert_eq!(config.coordination.session_timeout_ms, 3000);
        assert_eq!(config.cluster.election_path, "/election");
        assert_eq!(config.cluster.registry_path, "/service_registry");
        assert_eq!(config.session_timeout(), Duration::from_millis(3000));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [node]
            id = "node-1"
            advertise_address = "10.0.10.115:9000"

            [coordination]
            servers = "zk1:2181,zk2:2181"
            session_timeout_ms = 5000
            "#
        )
        .unwrap();

        let config = WolfpackConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node.id.as_deref(), Some("node-1"));
        assert_eq!(config.coordination.servers, "zk1:2181,zk2:2181");
        assert_eq!(config.coordination.session_timeout_ms, 5000);
    }

    #[test]
    fn test_rejects_relative_path() {
        let result = WolfpackConfig::from_str(
            r#"
            [node]
            advertise_address = "10.0.10.115:9000"

            [cluster]
            election_path = "election"
            "#,
        );

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_shared_paths() {
        let result = WolfpackConfig::from_str(
            r#"
            [node]
            advertise_address = "10.0.10.115:9000"

            [cluster]
            election_path = "/cluster"
            registry_path = "/cluster"
            "#,
        );

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
