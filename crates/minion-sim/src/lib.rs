//! In-process simulated Ceph clusters.
//!
//! A [`MinionSim`] owns one [`SimCluster`] and one agent ("minion") per host.
//! Running minions send heartbeats over a bounded channel to a control-plane
//! task; [`MinionSim::in_flight`] reports how many are still queued, which is
//! the signal callers use to decide that a halted fleet has gone quiet.

use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::fs::{create_dir_all, write};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod cluster;
mod error;
mod minion;
pub mod serde_duration;

pub use cluster::{Host, OsdState, ServiceType, SimCluster, DEFAULT_PG_NUM, DEFAULT_POOLS};
pub use error::SimError;
use minion::{Heartbeat, Minion};

/// Capacity of the heartbeat channel between minions and the control plane.
pub const HEARTBEAT_QUEUE_DEPTH: usize = 256;

pub const MANIFEST_FILE: &str = "cluster.toml";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SimConfig {
    pub config_dir: Utf8PathBuf,
    pub server_count: usize,
    pub osds_per_host: usize,
    pub port: u16,
    pub domain: String,
    #[serde(rename = "heartbeat_interval_ms", with = "serde_duration")]
    pub heartbeat_interval: Duration,
}

impl SimConfig {
    #[must_use]
    pub fn new(
        config_dir: Utf8PathBuf,
        server_count: usize,
        osds_per_host: usize,
        port: u16,
        domain: String,
    ) -> Self {
        Self {
            config_dir,
            server_count,
            osds_per_host,
            port,
            domain,
            heartbeat_interval: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub const fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    fsid: &'a str,
    domain: &'a str,
    port: u16,
    hosts: &'a [Host],
}

#[derive(Debug)]
pub struct MinionSim {
    config: SimConfig,
    cluster: Arc<SimCluster>,
    minions: BTreeMap<String, Minion>,
    bus_tx: mpsc::Sender<Heartbeat>,
    bus_rx: Option<mpsc::Receiver<Heartbeat>>,
    bus: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl MinionSim {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        if config.server_count == 0 {
            return Err(SimError::NoServers);
        }

        let cluster = Arc::new(SimCluster::new(
            generate_fsid(),
            &config.domain,
            config.server_count,
            config.osds_per_host,
        ));

        let minions = cluster
            .minion_fqdns()
            .into_iter()
            .map(|fqdn| (fqdn.clone(), Minion::new(fqdn)))
            .collect();

        let (bus_tx, bus_rx) = mpsc::channel(HEARTBEAT_QUEUE_DEPTH);

        Ok(Self {
            config,
            cluster,
            minions,
            bus_tx,
            bus_rx: Some(bus_rx),
            bus: None,
            shutdown: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn fsid(&self) -> &str {
        self.cluster.fsid()
    }

    #[must_use]
    pub fn cluster(&self) -> &SimCluster {
        &self.cluster
    }

    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    #[must_use]
    pub fn minion_fqdns(&self) -> Vec<String> {
        self.cluster.minion_fqdns()
    }

    /// Writes the cluster manifest and minion configs, then starts the
    /// control plane and every minion.
    pub async fn start(&mut self) -> Result<(), SimError> {
        let Some(mut bus_rx) = self.bus_rx.take() else {
            return Err(SimError::AlreadyStarted);
        };

        self.write_configs().await?;

        let cluster = Arc::clone(&self.cluster);
        let token = self.shutdown.clone();

        self.bus = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Some(heartbeat) = bus_rx.recv() => {
                        cluster.record_heartbeat(&heartbeat.minion);
                    }
                    () = token.cancelled() => break,
                }
            }

            while let Ok(heartbeat) = bus_rx.try_recv() {
                cluster.record_heartbeat(&heartbeat.minion);
            }
        }));

        self.start_minions()?;

        info!(
            fsid = %self.fsid(),
            domain = %self.config.domain,
            port = self.config.port,
            servers = self.config.server_count,
            "simulated cluster started"
        );

        Ok(())
    }

    /// Signals the control plane and every minion to stop. Use [`join`]
    /// to wait for them.
    ///
    /// [`join`]: MinionSim::join
    pub fn stop(&self) {
        debug!(fsid = %self.fsid(), "stopping simulated cluster");
        for minion in self.minions.values() {
            minion.signal_stop();
        }
        self.shutdown.cancel();
    }

    /// Waits for every background task to exit. Safe to call repeatedly.
    pub async fn join(&mut self) -> Result<(), SimError> {
        let mut first_error = None;

        for minion in self.minions.values_mut() {
            if let Err(err) = minion.halt().await {
                let _ignored = first_error.get_or_insert(err);
            }
        }

        if let Some(bus) = self.bus.take() {
            if let Err(source) = bus.await {
                let _ignored = first_error.get_or_insert(SimError::Join {
                    name: "bus".to_owned(),
                    source,
                });
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    pub async fn halt_minion(&mut self, minion_id: &str) -> Result<(), SimError> {
        self.minions
            .get_mut(minion_id)
            .ok_or_else(|| SimError::UnknownMinion(minion_id.to_owned()))?
            .halt()
            .await
    }

    pub fn start_minion(&mut self, minion_id: &str) -> Result<(), SimError> {
        if !self.is_running() {
            return Err(SimError::NotRunning);
        }

        self.minions
            .get_mut(minion_id)
            .ok_or_else(|| SimError::UnknownMinion(minion_id.to_owned()))?
            .start(
                &self.shutdown,
                self.bus_tx.clone(),
                self.config.heartbeat_interval,
            );

        Ok(())
    }

    pub async fn halt_minions(&mut self) -> Result<(), SimError> {
        for minion in self.minions.values_mut() {
            minion.halt().await?;
        }
        Ok(())
    }

    pub fn start_minions(&mut self) -> Result<(), SimError> {
        if !self.is_running() {
            return Err(SimError::NotRunning);
        }

        for minion in self.minions.values_mut() {
            minion.start(
                &self.shutdown,
                self.bus_tx.clone(),
                self.config.heartbeat_interval,
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn is_minion_running(&self, minion_id: &str) -> Option<bool> {
        self.minions.get(minion_id).map(Minion::is_running)
    }

    /// Heartbeats sent by minions that the control plane has not consumed yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.bus_tx
            .max_capacity()
            .saturating_sub(self.bus_tx.capacity())
    }

    /// Background tasks that are still executing. After [`stop`] these are
    /// the units that have not yet honoured the stop signal.
    ///
    /// [`stop`]: MinionSim::stop
    #[must_use]
    pub fn lingering(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .minions
            .iter()
            .filter(|(_, minion)| minion.is_running())
            .map(|(fqdn, _)| format!("minion:{fqdn}"))
            .collect();

        if self.bus.as_ref().is_some_and(|bus| !bus.is_finished()) {
            names.push("bus".to_owned());
        }

        names
    }

    fn is_running(&self) -> bool {
        self.bus.is_some() && !self.shutdown.is_cancelled()
    }

    async fn write_configs(&self) -> Result<(), SimError> {
        let dir = &self.config.config_dir;

        let manifest = toml::to_string_pretty(&Manifest {
            fsid: self.fsid(),
            domain: &self.config.domain,
            port: self.config.port,
            hosts: self.cluster.hosts(),
        })?;
        write_file(&dir.join(MANIFEST_FILE), manifest).await?;

        for fqdn in self.minions.keys() {
            let minion_dir = dir.join(fqdn);
            create_dir_all(&minion_dir)
                .await
                .map_err(|source| SimError::Io {
                    path: minion_dir.clone(),
                    source,
                })?;

            let minion_config = format!(
                "id: {fqdn}\nmaster: localhost\nmaster_port: {}\n",
                self.config.port
            );
            write_file(&minion_dir.join("minion"), minion_config).await?;
        }

        Ok(())
    }
}

impl Drop for MinionSim {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn write_file(path: &Utf8Path, contents: String) -> Result<(), SimError> {
    write(path, contents).await.map_err(|source| SimError::Io {
        path: path.to_owned(),
        source,
    })
}

fn generate_fsid() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();

    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
