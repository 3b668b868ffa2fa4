//! Cluster records as reported by the `ceph` CLI, and the checks the
//! convergence polls run against them.

use core::fmt::{self, Display, Formatter};
use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{ControlError, Result};

/// Pools a freshly normalized cluster carries. Anything else is left over
/// from a test.
pub const CANONICAL_POOLS: [&str; 3] = minion_sim::DEFAULT_POOLS;

const ACTIVE_CLEAN: &str = "active+clean";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fsid(String);

impl Fsid {
    pub fn new(fsid: impl Into<String>) -> Self {
        Self(fsid.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fsid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fsid {
    fn from(fsid: &str) -> Self {
        Self(fsid.to_owned())
    }
}

impl From<String> for Fsid {
    fn from(fsid: String) -> Self {
        Self(fsid)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdRecord {
    #[serde(rename = "osd")]
    pub id: u32,
    #[serde(deserialize_with = "flag")]
    pub up: bool,
    #[serde(deserialize_with = "flag")]
    pub r#in: bool,
}

/// `ceph osd dump` reports flags as `0`/`1`; simulators and older tooling
/// use booleans.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
    })
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OsdDump {
    #[serde(default)]
    pub epoch: u64,
    pub osds: Vec<OsdRecord>,
}

impl OsdDump {
    pub fn parse(output: &str) -> Result<Self> {
        decode("osd dump", output)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OsdHealth {
    pub down: Vec<u32>,
    pub out: Vec<u32>,
}

impl OsdHealth {
    #[must_use]
    pub fn from_records(osds: &[OsdRecord]) -> Self {
        Self {
            down: osds.iter().filter(|osd| !osd.up).map(|osd| osd.id).collect(),
            out: osds.iter().filter(|osd| !osd.r#in).map(|osd| osd.id).collect(),
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.down.is_empty() && self.out.is_empty()
    }
}

/// True once every OSD in an `osd dump` is both up and in.
pub fn osds_in_and_up(output: &str) -> Result<bool> {
    let dump = OsdDump::parse(output)?;
    Ok(OsdHealth::from_records(&dump.osds).is_clean())
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PoolRecord {
    pub poolname: String,
    #[serde(default)]
    pub poolnum: Option<i64>,
}

pub fn parse_pools(output: &str) -> Result<BTreeSet<String>> {
    let pools: Vec<PoolRecord> = decode("pool list", output)?;
    Ok(pools.into_iter().map(|pool| pool.poolname).collect())
}

/// True once an `osd lspools` listing holds exactly the canonical pools.
pub fn default_pools_only(output: &str) -> Result<bool> {
    let existing = parse_pools(output)?;
    Ok(PoolPlan::reconcile(&existing, CANONICAL_POOLS).is_noop())
}

/// Pool commands needed to bring a cluster back to the canonical set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolPlan {
    pub create: BTreeSet<String>,
    pub delete: BTreeSet<String>,
}

impl PoolPlan {
    pub fn reconcile<'a>(existing: &BTreeSet<String>, canonical: impl IntoIterator<Item = &'a str>) -> Self {
        let canonical: BTreeSet<String> = canonical.into_iter().map(str::to_owned).collect();

        Self {
            create: canonical.difference(existing).cloned().collect(),
            delete: existing.difference(&canonical).cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

/// Parsed `ceph pg stat` line.
///
/// Both `v{epoch}: {n} pgs: {states}; {usage}` and the newer
/// `{n} pgs: {states}; {usage}` layouts are accepted. States are
/// `{count} {name}` pairs separated by commas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacementGroupSummary {
    pub total: u64,
    pub active_clean: u64,
    pub states: BTreeMap<String, u64>,
}

impl PlacementGroupSummary {
    pub fn parse(output: &str) -> Result<Self> {
        let normalized = output.trim().replace(';', ":");
        let fields: Vec<&str> = normalized.split(':').collect();

        let total_index = fields
            .iter()
            .position(|field| field.split_whitespace().nth(1) == Some("pgs"))
            .ok_or_else(|| pg_error(output, "no '<n> pgs' field"))?;

        let total = fields
            .get(total_index)
            .and_then(|field| field.split_whitespace().next())
            .ok_or_else(|| pg_error(output, "empty pg count"))?;
        let total = parse_count(total, output)?;

        let mut states = BTreeMap::new();
        let state_field = fields
            .get(total_index.saturating_add(1))
            .copied()
            .unwrap_or_default();

        for entry in state_field.split(',') {
            let mut tokens = entry.split_whitespace();
            let Some(count) = tokens.next() else {
                continue;
            };
            let name = tokens
                .next()
                .ok_or_else(|| pg_error(output, "pg state without a name"))?;

            let count = parse_count(count, output)?;
            let slot = states.entry(name.to_owned()).or_insert(0_u64);
            *slot = slot.saturating_add(count);
        }

        Ok(Self {
            total,
            active_clean: states.get(ACTIVE_CLEAN).copied().unwrap_or_default(),
            states,
        })
    }

    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.total == self.active_clean
    }
}

/// True once every placement group reported by `pg stat` is active+clean.
pub fn pgs_active_and_clean(output: &str) -> Result<bool> {
    Ok(PlacementGroupSummary::parse(output)?.is_healthy())
}

fn parse_count(token: &str, output: &str) -> Result<u64> {
    token
        .parse()
        .map_err(|_| pg_error(output, &format!("'{token}' is not a count")))
}

fn pg_error(output: &str, detail: &str) -> ControlError {
    ControlError::Parse {
        what: "pg stat",
        detail: format!("{detail} in {:?}", output.trim()),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(what: &'static str, output: &str) -> Result<T> {
    serde_json::from_str(output).map_err(|source| ControlError::Json { what, source })
}
