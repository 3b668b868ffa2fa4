//! Puts a Ceph cluster into a known state for a test and lets the test
//! manipulate it, whether the cluster is simulated in-process
//! ([`EmbeddedCephControl`]) or a real one reached over ssh
//! ([`ExternalCephControl`]).
//!
//! ```no_run
//! # async fn run() -> ceph_control::Result<()> {
//! use ceph_control::{CephControl, ClusterControl, TestConfig};
//!
//! let config = TestConfig::load_default()?;
//! let mut control = CephControl::from_config(&config)?;
//!
//! let fsids = control.configure(3, 1).await?;
//! for fsid in &fsids {
//!     println!("{fsid}: {:?}", control.fqdns(fsid)?);
//! }
//!
//! control.shutdown().await
//! # }
//! ```

pub mod config;
pub mod control;
pub mod description;
pub mod diagnostics;
pub mod embedded;
pub mod errors;
pub mod executor;
pub mod external;
pub mod model;
pub mod poll;

pub use config::{BackendKind, ConfigError, TestConfig, Transport};
pub use control::{CephControl, ClusterControl};
pub use description::ClusterDescription;
pub use diagnostics::{DiagnosticEvent, DiagnosticSink, MemorySink, TracingSink};
pub use embedded::EmbeddedCephControl;
pub use errors::{CommandFailure, ControlError, Result};
pub use executor::{CommandExecutor, CommandOutput, LocalShellExecutor, SshExecutor};
pub use external::ExternalCephControl;
pub use minion_sim::ServiceType;
pub use model::{Fsid, OsdHealth, OsdRecord, PlacementGroupSummary, PoolPlan};
pub use poll::PollPolicy;
