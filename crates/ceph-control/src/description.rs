//! Description of the real cluster the external backend drives, in the
//! teuthology target layout:
//!
//! ```yaml
//! master_fqdn: calamari.example.com
//! cluster:
//!   ubuntu@node1.example.com:
//!     roles: [mon.0, osd.0, client.0]
//! ```

use std::collections::BTreeMap;
use std::fs::read_to_string;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::model::Fsid;
use crate::ServiceType;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostRoles {
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClusterDescription {
    /// Management server the agents are bootstrapped from.
    pub master_fqdn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fsid: Option<Fsid>,
    /// Keyed by `user@fqdn` targets.
    pub cluster: BTreeMap<String, HostRoles>,
}

impl ClusterDescription {
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let content = read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        Self::from_yaml(&content, path.as_str())
    }

    pub fn from_yaml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            origin: origin.to_owned(),
            source,
        })
    }

    pub fn validate(&self, admin_role: &str) -> Result<(), ConfigError> {
        if self.master_fqdn.trim().is_empty() {
            return Err(ConfigError::Invalid("master_fqdn is empty".to_owned()));
        }

        if self.cluster.is_empty() {
            return Err(ConfigError::Invalid("cluster lists no hosts".to_owned()));
        }

        let _admin = self.admin_fqdn(admin_role)?;

        Ok(())
    }

    /// Host names in target order, with the `user@` prefix stripped.
    #[must_use]
    pub fn server_fqdns(&self) -> Vec<String> {
        self.cluster.keys().map(|target| host_of(target).to_owned()).collect()
    }

    /// Hosts carrying at least one `{service}.N` role.
    #[must_use]
    pub fn service_fqdns(&self, service: ServiceType) -> Vec<String> {
        let prefix = format!("{}.", service.as_str());

        self.cluster
            .iter()
            .filter(|(_, host)| host.roles.iter().any(|role| role.starts_with(&prefix)))
            .map(|(target, _)| host_of(target).to_owned())
            .collect()
    }

    /// The host that carries `admin_role`; cluster-wide commands run there.
    pub fn admin_fqdn(&self, admin_role: &str) -> Result<&str, ConfigError> {
        self.cluster
            .iter()
            .find(|(_, host)| host.roles.iter().any(|role| role == admin_role))
            .map(|(target, _)| host_of(target))
            .ok_or_else(|| ConfigError::Invalid(format!("no host carries the '{admin_role}' role")))
    }
}

fn host_of(target: &str) -> &str {
    target.rsplit_once('@').map_or(target, |(_, host)| host)
}
