use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// This node's identity: the `client` section of the config file.
///
/// Sent as the argument of `ServerRegister`, and used by the registry for
/// group admission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
  /// Address the management RPC service listens on, e.g. `127.0.0.1:2234`.
  pub uri: String,
  pub name: String,
  /// Group this node serves. Empty accepts jobs of every group.
  #[serde(default)]
  pub group: String,
}

impl NodeIdentity {
  pub fn new(name: &str, group: &str, uri: &str) -> Self {
    Self {
      uri: uri.to_string(),
      name: name.to_string(),
      group: group.to_string(),
    }
  }
}

/// The central server to register with: the `server` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
  /// `host:port` or a full `http(s)://` base URL.
  pub uri: String,
  pub name: String,
  /// Heartbeat interval in seconds.
  #[serde(default = "default_interval")]
  pub interval: u64,
}

fn default_interval() -> u64 {
  DEFAULT_HEARTBEAT_INTERVAL_SECS
}

impl ServerConfig {
  pub fn new(name: &str, uri: &str, interval_secs: u64) -> Self {
    Self {
      uri: uri.to_string(),
      name: name.to_string(),
      interval: interval_secs,
    }
  }

  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval)
  }

  /// Base URL for outbound calls; a bare `host:port` is treated as plain HTTP.
  pub fn base_url(&self) -> String {
    base_url(&self.uri)
  }
}

pub(crate) fn base_url(uri: &str) -> String {
  let uri = uri.trim_end_matches('/');
  if uri.starts_with("http://") || uri.starts_with("https://") {
    uri.to_string()
  } else {
    format!("http://{}", uri)
  }
}

/// The `log` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
  /// File the agent appends its log to, in addition to stdout.
  #[serde(default)]
  pub filename: Option<PathBuf>,
}

/// The whole agent configuration file.
///
/// ```yaml
/// client:
///   uri: "127.0.0.1:2234"
///   name: "node-1"
///   group: "teamA"
/// server:
///   uri: "127.0.0.1:1234"
///   name: "central"
///   interval: 5
/// log:
///   filename: "cronkeeper.log"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
  pub client: NodeIdentity,
  pub server: ServerConfig,
  #[serde(default)]
  pub log: LogConfig,
}

impl AgentConfig {
  /// Reads and validates the YAML file at `path`.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_yaml(&contents, path)
  }

  /// Parses and validates YAML already in memory. `origin` is only used in errors.
  pub fn from_yaml(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
    let config: AgentConfig =
      serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
      })?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.client.name.trim().is_empty() {
      return Err(ConfigError::Invalid("client.name must not be empty".into()));
    }
    if self.client.uri.trim().is_empty() {
      return Err(ConfigError::Invalid("client.uri must not be empty".into()));
    }
    if self.server.uri.trim().is_empty() {
      return Err(ConfigError::Invalid("server.uri must not be empty".into()));
    }
    if self.server.interval == 0 {
      return Err(ConfigError::Invalid(
        "server.interval must be at least 1 second".into(),
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
client:
  uri: "127.0.0.1:2234"
  name: "node-1"
  group: "teamA"
server:
  uri: "127.0.0.1:1234"
  name: "central"
  interval: 3
log:
  filename: "/var/log/cronkeeper.log"
"#;

  #[test]
  fn parses_full_config() {
    let config = AgentConfig::from_yaml(SAMPLE, Path::new("sample.yml")).unwrap();
    assert_eq!(config.client, NodeIdentity::new("node-1", "teamA", "127.0.0.1:2234"));
    assert_eq!(config.server.interval(), Duration::from_secs(3));
    assert_eq!(config.server.base_url(), "http://127.0.0.1:1234");
    assert_eq!(
      config.log.filename.as_deref(),
      Some(Path::new("/var/log/cronkeeper.log"))
    );
  }

  #[test]
  fn optional_sections_default() {
    let yaml = "client: {uri: '0.0.0.0:2234', name: n}\nserver: {uri: 'https://central/', name: c}\n";
    let config = AgentConfig::from_yaml(yaml, Path::new("min.yml")).unwrap();
    assert!(config.client.group.is_empty());
    assert!(config.log.filename.is_none());
    assert_eq!(config.server.interval, DEFAULT_HEARTBEAT_INTERVAL_SECS);
    assert_eq!(config.server.base_url(), "https://central");
  }

  #[test]
  fn zero_interval_is_rejected() {
    let yaml = "client: {uri: 'a:1', name: n}\nserver: {uri: 'b:2', name: c, interval: 0}\n";
    let err = AgentConfig::from_yaml(yaml, Path::new("bad.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
  }

  #[test]
  fn malformed_yaml_names_the_file() {
    let err = AgentConfig::from_yaml("client: [", Path::new("broken.yml")).unwrap_err();
    assert!(err.to_string().contains("broken.yml"));
  }
}
