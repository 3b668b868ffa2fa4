use core::fmt::{self, Display, Formatter};
use core::str::FromStr;
use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::SimError;

/// Pools every freshly built simulated cluster starts with.
pub const DEFAULT_POOLS: [&str; 3] = ["data", "metadata", "rbd"];

/// Placement groups per pool on a fresh cluster.
pub const DEFAULT_PG_NUM: u32 = 64;

/// Hosts (counted from the first) that run a monitor.
const MON_HOSTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Mon,
    Osd,
}

impl ServiceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mon => "mon",
            Self::Osd => "osd",
        }
    }
}

impl Display for ServiceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mon" => Ok(Self::Mon),
            "osd" => Ok(Self::Osd),
            other => Err(SimError::UnknownService(other.to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub fqdn: String,
    pub services: Vec<ServiceType>,
    pub osds: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdState {
    pub id: u32,
    pub host: String,
    pub up: bool,
    pub r#in: bool,
}

impl OsdState {
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.up && self.r#in
    }
}

#[derive(Debug)]
struct ClusterState {
    osds: BTreeMap<u32, OsdState>,
    pools: BTreeMap<String, u32>,
    epoch: u64,
    heartbeats: u64,
}

/// The black-box Ceph cluster behind a [`MinionSim`](crate::MinionSim).
///
/// State is shared between the control API and the heartbeat bus, so every
/// accessor takes the internal lock for the duration of the call only.
#[derive(Debug)]
pub struct SimCluster {
    fsid: String,
    hosts: Vec<Host>,
    state: Mutex<ClusterState>,
}

impl SimCluster {
    pub(crate) fn new(fsid: String, domain: &str, server_count: usize, osds_per_host: usize) -> Self {
        let mut hosts = Vec::with_capacity(server_count);
        let mut osds = BTreeMap::new();
        let mut next_osd = 0_u32;

        for index in 0..server_count {
            let fqdn = format!("node{}.{domain}", index.saturating_add(1));

            let mut services = vec![ServiceType::Osd];
            if index < MON_HOSTS {
                services.insert(0, ServiceType::Mon);
            }

            let mut host_osds = Vec::with_capacity(osds_per_host);
            for _ in 0..osds_per_host {
                let _prev = osds.insert(
                    next_osd,
                    OsdState {
                        id: next_osd,
                        host: fqdn.clone(),
                        up: true,
                        r#in: true,
                    },
                );
                host_osds.push(next_osd);
                next_osd = next_osd.saturating_add(1);
            }

            hosts.push(Host {
                fqdn,
                services,
                osds: host_osds,
            });
        }

        let pools = DEFAULT_POOLS
            .iter()
            .map(|name| ((*name).to_owned(), DEFAULT_PG_NUM))
            .collect();

        Self {
            fsid,
            hosts,
            state: Mutex::new(ClusterState {
                osds,
                pools,
                epoch: 1,
                heartbeats: 0,
            }),
        }
    }

    #[must_use]
    pub fn fsid(&self) -> &str {
        &self.fsid
    }

    #[must_use]
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    #[must_use]
    pub fn minion_fqdns(&self) -> Vec<String> {
        self.hosts.iter().map(|host| host.fqdn.clone()).collect()
    }

    #[must_use]
    pub fn service_fqdns(&self, service: ServiceType) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|host| host.services.contains(&service))
            .map(|host| host.fqdn.clone())
            .collect()
    }

    /// Marks one OSD in or out, the same way `ceph osd in|out` would.
    pub fn set_osd_state(&self, osd_id: u32, osd_in: bool) -> Result<(), SimError> {
        let mut state = self.state.lock();
        let osd = state
            .osds
            .get_mut(&osd_id)
            .ok_or(SimError::UnknownOsd(osd_id))?;

        if osd.r#in != osd_in {
            osd.r#in = osd_in;
            state.epoch = state.epoch.saturating_add(1);
            debug!(fsid = %self.fsid, osd_id, osd_in, "osd in flag changed");
        }

        Ok(())
    }

    pub fn set_osd_up(&self, osd_id: u32, up: bool) -> Result<(), SimError> {
        let mut state = self.state.lock();
        let osd = state
            .osds
            .get_mut(&osd_id)
            .ok_or(SimError::UnknownOsd(osd_id))?;

        if osd.up != up {
            osd.up = up;
            state.epoch = state.epoch.saturating_add(1);
            debug!(fsid = %self.fsid, osd_id, up, "osd up flag changed");
        }

        Ok(())
    }

    #[must_use]
    pub fn osd_map(&self) -> Vec<OsdState> {
        self.state.lock().osds.values().cloned().collect()
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    #[must_use]
    pub fn pools(&self) -> Vec<String> {
        self.state.lock().pools.keys().cloned().collect()
    }

    /// Returns `false` when the pool already existed.
    pub fn create_pool(&self, name: &str, pg_num: u32) -> bool {
        let mut state = self.state.lock();
        if state.pools.contains_key(name) {
            return false;
        }
        let _prev = state.pools.insert(name.to_owned(), pg_num);
        state.epoch = state.epoch.saturating_add(1);
        true
    }

    /// Returns `false` when there was no such pool.
    pub fn delete_pool(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.pools.remove(name).is_some();
        if removed {
            state.epoch = state.epoch.saturating_add(1);
        }
        removed
    }

    /// Placement group status in the layout of `ceph pg stat`.
    ///
    /// Every PG is `active+clean` while all OSDs are up and in; otherwise the
    /// whole map reports `active+degraded`.
    #[must_use]
    pub fn pg_stat(&self) -> String {
        let state = self.state.lock();
        let total: u64 = state.pools.values().map(|pg_num| u64::from(*pg_num)).sum();
        let pg_state = if state.osds.values().all(OsdState::is_healthy) {
            "active+clean"
        } else {
            "active+degraded"
        };

        format!(
            "v{}: {total} pgs: {total} {pg_state}; 0 bytes data, 0 kB used, 0 kB / 0 kB avail",
            state.epoch
        )
    }

    pub(crate) fn record_heartbeat(&self, minion: &str) {
        let mut state = self.state.lock();
        state.heartbeats = state.heartbeats.saturating_add(1);
        trace!(fsid = %self.fsid, %minion, "heartbeat received");
    }

    #[must_use]
    pub fn heartbeat_count(&self) -> u64 {
        self.state.lock().heartbeats
    }
}
