use core::time::Duration;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use minion_sim::{MinionSim, SimCluster, SimConfig, DEFAULT_PG_NUM};
use tempfile::TempDir;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::EmbeddedConfig;
use crate::control::ClusterControl;
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink};
use crate::model::{pgs_active_and_clean, Fsid, OsdRecord, PoolPlan, CANONICAL_POOLS};
use crate::poll::{wait_until, wait_until_true, PollPolicy};
use crate::{ControlError, Result, ServiceType};

const CONFIG_DIR_PREFIX: &str = "minion-sim-";

#[derive(Debug)]
struct SimulatedCluster {
    fsid: Fsid,
    sim: MinionSim,
    config_dir: TempDir,
}

/// Runs every requested cluster in-process on top of `minion-sim`.
#[derive(Debug)]
pub struct EmbeddedCephControl {
    config: EmbeddedConfig,
    poll: PollPolicy,
    sink: Arc<dyn DiagnosticSink>,
    clusters: Vec<SimulatedCluster>,
}

impl EmbeddedCephControl {
    #[must_use]
    pub fn new(config: EmbeddedConfig, poll: PollPolicy, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            config,
            poll,
            sink,
            clusters: Vec::new(),
        }
    }

    /// The simulator behind `fsid`, for assertions the control interface
    /// does not cover.
    pub fn simulator(&self, fsid: &Fsid) -> Result<&MinionSim> {
        self.cluster(fsid).map(|cluster| &cluster.sim)
    }

    #[must_use]
    pub fn fsids(&self) -> Vec<Fsid> {
        self.clusters.iter().map(|cluster| cluster.fsid.clone()).collect()
    }

    fn cluster(&self, fsid: &Fsid) -> Result<&SimulatedCluster> {
        self.clusters
            .iter()
            .find(|cluster| cluster.fsid == *fsid)
            .ok_or_else(|| ControlError::UnknownCluster(fsid.clone()))
    }

    fn cluster_mut(&mut self, fsid: &Fsid) -> Result<&mut SimulatedCluster> {
        self.clusters
            .iter_mut()
            .find(|cluster| cluster.fsid == *fsid)
            .ok_or_else(|| ControlError::UnknownCluster(fsid.clone()))
    }

    async fn launch(&self, index: usize, port: u16, server_count: usize) -> Result<SimulatedCluster> {
        let config_dir = tempfile::Builder::new()
            .prefix(CONFIG_DIR_PREFIX)
            .tempdir()
            .map_err(|source| ControlError::Io {
                action: "create a simulator config directory".to_owned(),
                source,
            })?;

        let path = Utf8PathBuf::from_path_buf(config_dir.path().to_owned()).map_err(|path| {
            ControlError::Io {
                action: "use the simulator config directory".to_owned(),
                source: io::Error::other(format!("{} is not valid UTF-8", path.display())),
            }
        })?;

        let sim_config = SimConfig::new(
            path,
            server_count,
            self.config.osds_per_host,
            port,
            format!("cluster{index}.com"),
        )
        .with_heartbeat_interval(self.config.heartbeat_interval);

        let mut sim = MinionSim::new(sim_config)?;
        sim.start().await?;

        Ok(SimulatedCluster {
            fsid: Fsid::from(sim.fsid()),
            sim,
            config_dir,
        })
    }

    /// Brings a simulated cluster to the baseline state: every OSD up and in,
    /// exactly the canonical pools, and every placement group active+clean.
    async fn normalize(&self, cluster: &SimCluster) -> Result<()> {
        for osd in cluster.osd_map() {
            if !osd.is_healthy() {
                cluster.set_osd_up(osd.id, true)?;
                cluster.set_osd_state(osd.id, true)?;
            }
        }

        let plan = PoolPlan::reconcile(&cluster.pools().into_iter().collect(), CANONICAL_POOLS);
        for pool in &plan.create {
            let _created = cluster.create_pool(pool, DEFAULT_PG_NUM);
        }
        for pool in &plan.delete {
            let _deleted = cluster.delete_pool(pool);
        }

        let _pgs = wait_until(
            "all pgs active+clean",
            self.poll,
            || async { Ok(cluster.pg_stat()) },
            pgs_active_and_clean,
        )
        .await?;

        debug!(fsid = %cluster.fsid(), epoch = cluster.epoch(), "simulated cluster normalized");

        Ok(())
    }

    /// Releases whatever a failed `configure` had already provisioned and
    /// hands back the error that stopped it.
    async fn abandon(&mut self, err: ControlError) -> ControlError {
        warn!(
            %err,
            clusters = self.clusters.len(),
            "releasing partially provisioned clusters"
        );

        if let Err(teardown) = self.teardown().await {
            warn!(%teardown, "partially provisioned clusters were not fully released");
        }

        err
    }

    /// Stops and removes every held cluster. Every cluster is attempted;
    /// failures are collected and reported together.
    async fn teardown(&mut self) -> Result<()> {
        if self.clusters.is_empty() {
            return Ok(());
        }

        info!(clusters = self.clusters.len(), "tearing down simulated clusters");

        for cluster in &self.clusters {
            cluster.sim.stop();
        }

        self.settle("simulated cluster shutdown").await;

        let mut failures = Vec::new();

        for cluster in &mut self.clusters {
            let units = cluster.sim.lingering();
            if !units.is_empty() {
                self.sink.record(DiagnosticEvent::Lingering {
                    fsid: cluster.fsid.clone(),
                    units,
                });
            }

            match timeout(self.poll.timeout, cluster.sim.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push(format!("{}: {err}", cluster.fsid)),
                Err(_) => failures.push(format!(
                    "{}: background tasks still running after {:?}",
                    cluster.fsid, self.poll.timeout
                )),
            }
        }

        for SimulatedCluster {
            fsid,
            sim,
            config_dir,
        } in self.clusters.drain(..)
        {
            drop(sim);

            let path = config_dir.path().display().to_string();
            if let Err(err) = config_dir.close() {
                failures.push(format!("{fsid}: failed to remove {path}: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            for failure in &failures {
                warn!(%failure, "teardown failure");
            }
            Err(ControlError::Teardown { failures })
        }
    }

    async fn settle(&self, reason: &str) {
        let delay = self.config.settle_delay;

        self.sink.record(DiagnosticEvent::Settling {
            reason: reason.to_owned(),
            delay,
        });

        if delay > Duration::ZERO {
            sleep(delay).await;
        }
    }
}

#[async_trait]
impl ClusterControl for EmbeddedCephControl {
    async fn configure(
        &mut self,
        server_count: usize,
        cluster_count: usize,
    ) -> Result<Vec<Fsid>> {
        if server_count == 0 || cluster_count == 0 {
            return Err(ControlError::skip(format!(
                "cannot simulate {cluster_count} cluster(s) of {server_count} server(s)"
            )));
        }

        let base_port = self.config.base_port;
        let ports: Option<Vec<u16>> = (0..cluster_count)
            .map(|index| {
                u16::try_from(index)
                    .ok()
                    .and_then(|offset| base_port.checked_add(offset))
            })
            .collect();
        let Some(ports) = ports else {
            return Err(ControlError::skip(format!(
                "{cluster_count} clusters starting at port {base_port} do not fit the port range"
            )));
        };

        self.teardown().await?;

        for (index, port) in ports.into_iter().enumerate() {
            let cluster = match self.launch(index, port, server_count).await {
                Ok(cluster) => cluster,
                Err(err) => return Err(self.abandon(err).await),
            };
            let normalized = self.normalize(cluster.sim.cluster()).await;
            self.clusters.push(cluster);
            if let Err(err) = normalized {
                return Err(self.abandon(err).await);
            }
            debug!(port, "simulated cluster ready");
        }

        Ok(self.fsids())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.teardown().await
    }

    async fn mark_osd_in(&mut self, fsid: &Fsid, osd_id: u32, osd_in: bool) -> Result<()> {
        self.cluster(fsid)?.sim.cluster().set_osd_state(osd_id, osd_in)?;
        Ok(())
    }

    fn server_fqdns(&self) -> Vec<String> {
        self.clusters
            .iter()
            .flat_map(|cluster| cluster.sim.minion_fqdns())
            .collect()
    }

    fn fqdns(&self, fsid: &Fsid) -> Result<Vec<String>> {
        Ok(self.cluster(fsid)?.sim.minion_fqdns())
    }

    fn service_fqdns(&self, fsid: &Fsid, service: ServiceType) -> Result<Vec<String>> {
        Ok(self.cluster(fsid)?.sim.cluster().service_fqdns(service))
    }

    async fn go_dark(&mut self, fsid: &Fsid, dark: bool, minion_id: Option<&str>) -> Result<()> {
        let poll = self.poll;
        let sim = &mut self.cluster_mut(fsid)?.sim;

        match (dark, minion_id) {
            (true, Some(minion_id)) => sim.halt_minion(minion_id).await?,
            (true, None) => sim.halt_minions().await?,
            (false, Some(minion_id)) => sim.start_minion(minion_id)?,
            (false, None) => sim.start_minions()?,
        }

        let sim = &*sim;
        wait_until_true("heartbeat queue to drain", poll, || sim.in_flight() == 0).await?;

        self.settle(if dark { "minions going dark" } else { "minions returning" })
            .await;

        Ok(())
    }

    async fn osd_map(&self, fsid: &Fsid) -> Result<Vec<OsdRecord>> {
        Ok(self
            .cluster(fsid)?
            .sim
            .cluster()
            .osd_map()
            .into_iter()
            .map(|osd| OsdRecord {
                id: osd.id,
                up: osd.up,
                r#in: osd.r#in,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;

    fn control(sink: &MemorySink) -> EmbeddedCephControl {
        let config = EmbeddedConfig {
            settle_delay: Duration::ZERO,
            heartbeat_interval: Duration::from_millis(10),
            ..EmbeddedConfig::default()
        };
        let poll = PollPolicy::new(Duration::from_millis(10), Duration::from_secs(5));

        EmbeddedCephControl::new(config, poll, Arc::new(sink.clone()))
    }

    #[tokio::test]
    async fn test_impossible_shapes_are_skipped() {
        let sink = MemorySink::new();
        let mut control = control(&sink);

        for (servers, clusters) in [(0, 1), (3, 0)] {
            let err = control
                .configure(servers, clusters)
                .await
                .expect_err("empty shapes cannot be simulated");
            assert!(err.is_skip(), "({servers}, {clusters}) is skipped, got {err:?}");
        }

        let err = control
            .configure(1, 70_000)
            .await
            .expect_err("ports would overflow");
        assert!(err.is_skip(), "port overflow is skipped, got {err:?}");
        assert!(control.server_fqdns().is_empty(), "nothing was provisioned");
    }

    #[tokio::test]
    async fn test_reconfigure_replaces_clusters() {
        let sink = MemorySink::new();
        let mut control = control(&sink);

        let first = control.configure(2, 2).await.expect("two clusters");
        let second = control.configure(1, 1).await.expect("one cluster");

        assert_eq!(second.len(), 1, "one handle");
        assert!(
            first.iter().all(|fsid| !second.contains(fsid)),
            "previous clusters are gone"
        );
        assert_eq!(
            control.server_fqdns(),
            vec!["node1.cluster0.com"],
            "only the new cluster's hosts remain"
        );
        assert!(
            matches!(
                control.fqdns(&first[0]),
                Err(ControlError::UnknownCluster(_))
            ),
            "old handles are unknown"
        );

        control.shutdown().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_normalize_restores_the_baseline() {
        let sink = MemorySink::new();
        let mut control = control(&sink);
        let fsids = control.configure(2, 1).await.expect("one cluster");
        let cluster = control.simulator(&fsids[0]).expect("known handle").cluster();

        cluster.set_osd_up(1, false).expect("osd 1 exists");
        cluster.set_osd_state(2, false).expect("osd 2 exists");
        assert!(cluster.create_pool("scratch", 8), "scratch is new");
        assert!(cluster.delete_pool("rbd"), "rbd existed");
        assert!(
            !pgs_active_and_clean(&cluster.pg_stat()).expect("pg stat parses"),
            "the cluster is dirty"
        );

        control.normalize(cluster).await.expect("baseline restored");

        assert!(
            cluster.osd_map().iter().all(|osd| osd.up && osd.r#in),
            "every osd is up and in"
        );
        assert_eq!(cluster.pools(), CANONICAL_POOLS, "only the canonical pools remain");
        assert!(
            pgs_active_and_clean(&cluster.pg_stat()).expect("pg stat parses"),
            "every pg is active+clean"
        );

        control.shutdown().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_failed_configure_releases_earlier_clusters() {
        let sink = MemorySink::new();
        let mut control = control(&sink);

        let cluster = control.launch(0, 8761, 2).await.expect("cluster 0 launches");
        let dir = cluster.config_dir.path().to_owned();
        control.clusters.push(cluster);

        let err = control
            .abandon(ControlError::skip("cluster 1 failed to launch"))
            .await;

        assert!(err.is_skip(), "the launch error is handed back, got {err:?}");
        assert!(control.clusters.is_empty(), "cluster 0 is released");
        assert!(control.server_fqdns().is_empty(), "no host is held");
        assert!(!dir.exists(), "cluster 0's config dir is removed");
    }

    #[tokio::test]
    async fn test_unknown_minion_fails() {
        let sink = MemorySink::new();
        let mut control = control(&sink);
        let fsids = control.configure(1, 1).await.expect("one cluster");

        let err = control
            .go_dark(&fsids[0], true, Some("node7.cluster0.com"))
            .await
            .expect_err("no such minion");
        assert!(
            matches!(err, ControlError::Simulator(_)),
            "unknown minions surface as simulator errors, got {err:?}"
        );

        control.shutdown().await.expect("clean shutdown");
    }
}
