//! cfgrid.toml configuration parser.
//!
//! Every section and field has a default, so an empty file is a valid
//! single-replica configuration. Durations are written as `"500ms"`, `"10s"`,
//! `"2m"` or `"1h"`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render configuration")]
    Render(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CfgridConfig {
    pub node: NodeConfig,
    pub store: StoreConfig,
    pub repository: RepositoryConfig,
    pub rollout: RolloutConfig,
    pub status: StatusConfig,
}

/// Identity of this replica and where it listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Service fleet this replica belongs to.
    pub service: String,
    /// Replica id; a random one is generated when unset.
    pub replica: Option<String>,
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service: "config".to_string(),
            replica: None,
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the shared redb database. Only the owning replica opens it.
    pub path: PathBuf,
    /// `host:port` of the replica that owns the database. When set, this
    /// replica sends every store operation there instead of opening `path`.
    pub remote: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/cfgrid/shared.redb"),
            remote: None,
        }
    }
}

/// Version-controlled configuration source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Remote to clone. Without it only canned-bundle rollouts work.
    pub url: Option<String>,
    /// Where the single working tree is kept.
    pub work_dir: PathBuf,
    /// Reference checked out at startup.
    pub default_ref: Option<String>,
    /// Sub-path of the snapshot that file lookups are relative to.
    pub serving_root: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: None,
            work_dir: PathBuf::from("/var/lib/cfgrid/repo"),
            default_ref: None,
            serving_root: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Name of the locked configuration resource.
    pub resource: String,
    /// Pub/sub channel carrying new config hashes.
    pub channel: String,
    /// Lifetime of job records; also the lock TTL.
    #[serde(with = "duration_str")]
    pub job_ttl: Duration,
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    #[serde(with = "duration_str")]
    pub convergence_timeout: Duration,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            resource: "config".to_string(),
            channel: "config-updates".to_string(),
            job_ttl: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(2),
            convergence_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Name of the shared status hash table.
    pub table: String,
    #[serde(with = "duration_str")]
    pub publish_interval: Duration,
    /// Entries older than this are ignored by every reader.
    #[serde(with = "duration_str")]
    pub max_age: Duration,
    /// TTL refreshed on the whole table at every publish.
    #[serde(with = "duration_str")]
    pub table_ttl: Duration,
    /// UTC hour at which the table is reset once per day.
    pub reset_hour_utc: u8,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            table: "status".to_string(),
            publish_interval: Duration::from_secs(10),
            max_age: Duration::from_secs(30),
            table_ttl: Duration::from_secs(3600),
            reset_hour_utc: 3,
        }
    }
}

impl CfgridConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CfgridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Configured replica id, or a freshly generated one.
    pub fn replica_id(&self) -> String {
        self.node
            .replica
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.node.service, uuid::Uuid::new_v4()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node.service.is_empty() || self.node.service.contains(':') {
            return Err(ConfigError::Invalid(
                "node.service must be non-empty and must not contain ':'".to_string(),
            ));
        }
        if self
            .store
            .remote
            .as_deref()
            .is_some_and(|addr| !addr.contains(':'))
        {
            return Err(ConfigError::Invalid(
                "store.remote must be a host:port address".to_string(),
            ));
        }
        if self.rollout.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "rollout.poll_interval must be positive".to_string(),
            ));
        }
        if self.status.publish_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "status.publish_interval must be positive".to_string(),
            ));
        }
        if self.status.reset_hour_utc > 23 {
            return Err(ConfigError::Invalid(
                "status.reset_hour_utc must be between 0 and 23".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse `"250ms"`, `"10s"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    let (last, _) = s.char_indices().last()?;
    let (number, unit) = s.split_at(last);
    let value: u64 = number.trim().parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

fn format_duration(d: &Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        format!("{ms}ms")
    } else {
        let secs = d.as_secs();
        if secs != 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs != 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid duration '{raw}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = CfgridConfig::from_toml_str("").unwrap();
        assert_eq!(config.node.service, "config");
        assert_eq!(config.rollout.resource, "config");
        assert_eq!(config.rollout.poll_interval, Duration::from_secs(2));
        assert_eq!(config.status.max_age, Duration::from_secs(30));
    }

    #[test]
    fn parse_sections() {
        let toml_str = r#"
[node]
service = "search"
replica = "search-3"
port = 9000

[repository]
url = "https://git.example.com/platform/config.git"
default_ref = "main"
serving_root = "live"

[rollout]
poll_interval = "500ms"
convergence_timeout = "1m"

[status]
reset_hour_utc = 4
"#;
        let config = CfgridConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.node.service, "search");
        assert_eq!(config.replica_id(), "search-3");
        assert_eq!(config.node.port, 9000);
        assert_eq!(config.repository.serving_root, "live");
        assert_eq!(config.rollout.poll_interval, Duration::from_millis(500));
        assert_eq!(config.rollout.convergence_timeout, Duration::from_secs(60));
        assert_eq!(config.status.reset_hour_utc, 4);
    }

    #[test]
    fn store_remote_points_at_the_owner() {
        let config = CfgridConfig::from_toml_str("").unwrap();
        assert_eq!(config.store.remote, None);

        let config =
            CfgridConfig::from_toml_str("[store]\nremote = \"10.0.0.5:8080\"").unwrap();
        assert_eq!(config.store.remote.as_deref(), Some("10.0.0.5:8080"));
        assert!(CfgridConfig::from_toml_str("[store]\nremote = \"owner\"").is_err());
    }

    #[test]
    fn generated_replica_id_carries_service() {
        let config = CfgridConfig::default();
        assert!(config.replica_id().starts_with("config-"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(CfgridConfig::from_toml_str("[rollout]\npoll_interval = \"0s\"").is_err());
        assert!(CfgridConfig::from_toml_str("[rollout]\npoll_interval = \"soon\"").is_err());
        assert!(CfgridConfig::from_toml_str("[node]\nservice = \"a:b\"").is_err());
        assert!(CfgridConfig::from_toml_str("[status]\nreset_hour_utc = 24").is_err());
    }

    #[test]
    fn durations_render_back() {
        let rendered = CfgridConfig::default().to_toml_string().unwrap();
        assert!(rendered.contains("job_ttl = \"1h\""));
        assert!(rendered.contains("convergence_timeout = \"2m\""));
        let reparsed = CfgridConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed.rollout.job_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration(""), None);
    }
}
