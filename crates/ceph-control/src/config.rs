use core::time::Duration;
use std::env;
use std::fs::read_to_string;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::description::ClusterDescription;
use crate::poll::PollPolicy;

/// Environment variable naming the test configuration file.
pub const CONFIG_ENV: &str = "CEPH_CONTROL_CONFIG";

pub const DEFAULT_OSDS_PER_HOST: usize = 4;
pub const DEFAULT_BASE_PORT: u16 = 8761;
pub const DEFAULT_BOOTSTRAP_PORT: u16 = 8000;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read configuration from {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {origin}")]
    Toml {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid cluster description in {origin}")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Embedded,
    External,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Ssh,
    Local,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TestConfig {
    pub testing: TestingConfig,
    pub embedded: EmbeddedConfig,
    pub external: ExternalConfig,
    pub poll: PollPolicy,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TestingConfig {
    pub ceph_control: BackendKind,
    pub external_cluster_path: Option<Utf8PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    pub osds_per_host: usize,
    pub base_port: u16,
    #[serde(rename = "settle_delay_ms", with = "minion_sim::serde_duration")]
    pub settle_delay: Duration,
    #[serde(rename = "heartbeat_interval_ms", with = "minion_sim::serde_duration")]
    pub heartbeat_interval: Duration,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            osds_per_host: DEFAULT_OSDS_PER_HOST,
            base_port: DEFAULT_BASE_PORT,
            settle_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub transport: Transport,
    pub ssh_user: String,
    pub ssh_options: Vec<String>,
    #[serde(
        rename = "command_timeout_ms",
        with = "minion_sim::serde_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub command_timeout: Option<Duration>,
    pub cluster_name: String,
    pub admin_role: String,
    pub agent_service: String,
    pub bootstrap_port: u16,
    pub pool_pg_num: u32,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            ssh_user: "ubuntu".to_owned(),
            ssh_options: Vec::new(),
            command_timeout: None,
            cluster_name: "ceph".to_owned(),
            admin_role: "client.0".to_owned(),
            agent_service: "salt-minion".to_owned(),
            bootstrap_port: DEFAULT_BOOTSTRAP_PORT,
            pool_pg_num: minion_sim::DEFAULT_PG_NUM,
        }
    }
}

impl TestConfig {
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let content = read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        Self::from_toml(&content, path.as_str())
    }

    /// Loads the file named by [`CONFIG_ENV`], or the defaults when it is
    /// unset.
    pub fn load_default() -> Result<Self, ConfigError> {
        match env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load(Utf8Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Toml {
            origin: origin.to_owned(),
            source,
        })?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval.is_zero() {
            return Err(ConfigError::Invalid("poll.interval_ms must be positive".to_owned()));
        }

        if self.embedded.osds_per_host == 0 {
            return Err(ConfigError::Invalid(
                "embedded.osds_per_host must be positive".to_owned(),
            ));
        }

        if self.external.pool_pg_num == 0 {
            return Err(ConfigError::Invalid(
                "external.pool_pg_num must be positive".to_owned(),
            ));
        }

        if self.testing.ceph_control == BackendKind::External
            && self.testing.external_cluster_path.is_none()
        {
            return Err(ConfigError::Invalid(
                "testing.external_cluster_path is required for the external backend".to_owned(),
            ));
        }

        Ok(())
    }

    /// Loads and validates the external cluster description.
    pub fn cluster_description(&self) -> Result<ClusterDescription, ConfigError> {
        let path = self.testing.external_cluster_path.as_deref().ok_or_else(|| {
            ConfigError::Invalid("testing.external_cluster_path is not set".to_owned())
        })?;

        let description = ClusterDescription::load(path)?;
        description.validate(&self.external.admin_role)?;

        Ok(description)
    }
}
