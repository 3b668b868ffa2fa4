use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{BackendKind, TestConfig, Transport};
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::embedded::EmbeddedCephControl;
use crate::executor::{CommandExecutor, LocalShellExecutor, SshExecutor};
use crate::external::ExternalCephControl;
use crate::model::{Fsid, OsdRecord};
use crate::{Result, ServiceType};

/// What a test may ask of the cluster it runs against.
///
/// Every call returns only once its effect (or its failure) is determined;
/// `go_dark` is the exception in that the loss of connectivity is only
/// eventually visible to observers of the cluster.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Provides `cluster_count` clean clusters of `server_count` hosts each.
    ///
    /// Fails with [`ControlError::Skip`](crate::ControlError::Skip) when the
    /// backend cannot provide that shape at all.
    async fn configure(&mut self, server_count: usize, cluster_count: usize)
        -> Result<Vec<Fsid>>;

    async fn shutdown(&mut self) -> Result<()>;

    async fn mark_osd_in(&mut self, fsid: &Fsid, osd_id: u32, osd_in: bool) -> Result<()>;

    /// Every host across every managed cluster.
    fn server_fqdns(&self) -> Vec<String>;

    fn fqdns(&self, fsid: &Fsid) -> Result<Vec<String>>;

    fn service_fqdns(&self, fsid: &Fsid, service: ServiceType) -> Result<Vec<String>>;

    /// Cuts (`dark`) or restores management-agent connectivity for one host,
    /// or for every host of the cluster when `minion_id` is `None`.
    async fn go_dark(&mut self, fsid: &Fsid, dark: bool, minion_id: Option<&str>) -> Result<()>;

    async fn osd_map(&self, fsid: &Fsid) -> Result<Vec<OsdRecord>>;
}

/// The backend selected by `[testing] ceph_control`.
#[derive(Debug)]
pub enum CephControl {
    Embedded(EmbeddedCephControl),
    External(ExternalCephControl),
}

impl CephControl {
    pub fn from_config(config: &TestConfig) -> Result<Self> {
        Self::from_config_with_sink(config, Arc::new(TracingSink))
    }

    pub fn from_config_with_sink(
        config: &TestConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        let control = match config.testing.ceph_control {
            BackendKind::Embedded => Self::Embedded(EmbeddedCephControl::new(
                config.embedded.clone(),
                config.poll,
                sink,
            )),
            BackendKind::External => {
                let description = config.cluster_description()?;
                let ssh = SshExecutor::new(
                    config.external.ssh_user.clone(),
                    config.external.ssh_options.clone(),
                    config.external.command_timeout,
                );
                let executor: Box<dyn CommandExecutor> = match config.external.transport {
                    Transport::Ssh => Box::new(ssh),
                    Transport::Local => Box::new(LocalShellExecutor::new(
                        description
                            .admin_fqdn(&config.external.admin_role)?
                            .to_owned(),
                        ssh,
                        config.external.command_timeout,
                    )),
                };

                Self::External(ExternalCephControl::new(
                    description,
                    config.external.clone(),
                    config.poll,
                    executor,
                    sink,
                )?)
            }
        };

        info!(backend = ?control.kind(), "selected cluster control backend");

        Ok(control)
    }

    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Embedded(_) => BackendKind::Embedded,
            Self::External(_) => BackendKind::External,
        }
    }
}

#[async_trait]
impl ClusterControl for CephControl {
    async fn configure(
        &mut self,
        server_count: usize,
        cluster_count: usize,
    ) -> Result<Vec<Fsid>> {
        match self {
            Self::Embedded(control) => control.configure(server_count, cluster_count).await,
            Self::External(control) => control.configure(server_count, cluster_count).await,
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        match self {
            Self::Embedded(control) => control.shutdown().await,
            Self::External(control) => control.shutdown().await,
        }
    }

    async fn mark_osd_in(&mut self, fsid: &Fsid, osd_id: u32, osd_in: bool) -> Result<()> {
        match self {
            Self::Embedded(control) => control.mark_osd_in(fsid, osd_id, osd_in).await,
            Self::External(control) => control.mark_osd_in(fsid, osd_id, osd_in).await,
        }
    }

    fn server_fqdns(&self) -> Vec<String> {
        match self {
            Self::Embedded(control) => control.server_fqdns(),
            Self::External(control) => control.server_fqdns(),
        }
    }

    fn fqdns(&self, fsid: &Fsid) -> Result<Vec<String>> {
        match self {
            Self::Embedded(control) => control.fqdns(fsid),
            Self::External(control) => control.fqdns(fsid),
        }
    }

    fn service_fqdns(&self, fsid: &Fsid, service: ServiceType) -> Result<Vec<String>> {
        match self {
            Self::Embedded(control) => control.service_fqdns(fsid, service),
            Self::External(control) => control.service_fqdns(fsid, service),
        }
    }

    async fn go_dark(&mut self, fsid: &Fsid, dark: bool, minion_id: Option<&str>) -> Result<()> {
        match self {
            Self::Embedded(control) => control.go_dark(fsid, dark, minion_id).await,
            Self::External(control) => control.go_dark(fsid, dark, minion_id).await,
        }
    }

    async fn osd_map(&self, fsid: &Fsid) -> Result<Vec<OsdRecord>> {
        match self {
            Self::Embedded(control) => control.osd_map(fsid).await,
            Self::External(control) => control.osd_map(fsid).await,
        }
    }
}
