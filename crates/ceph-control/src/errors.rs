use core::time::Duration;

use minion_sim::SimError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::model::Fsid;

pub type Result<T, E = ControlError> = core::result::Result<T, E>;

/// A remote command finished with a non-zero exit status.
///
/// Both captured streams are kept so the caller can decide how much of them to
/// surface; stderr on its own never signals failure.
#[derive(Debug, Error)]
#[error("command `{command}` on {target} exited with status {code}")]
pub struct CommandFailure {
    pub target: String,
    pub command: String,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControlError {
    /// The requested cluster shape cannot be provided by this backend. The
    /// test does not apply here; this is not a defect.
    #[error("test skipped: {reason}")]
    Skip { reason: String },

    #[error(transparent)]
    Command(#[from] CommandFailure),

    #[error("gave up waiting for {what} after {elapsed:?}")]
    Convergence {
        what: String,
        elapsed: Duration,
        last_output: Option<String>,
    },

    /// Cleanup of a previous cluster could not be guaranteed, so the next
    /// test cannot be handed a clean one.
    #[error("failed to tear down simulated clusters: {}", failures.join("; "))]
    Teardown { failures: Vec<String> },

    #[error("unknown cluster {0}")]
    UnknownCluster(Fsid),

    #[error("no host matches '{0}'")]
    UnknownHost(String),

    #[error(transparent)]
    Simulator(#[from] SimError),

    #[error("failed to parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("failed to decode {what}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to run a command on {target}")]
    Transport {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to {action}")]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ControlError {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }

    #[must_use]
    pub const fn is_convergence(&self) -> bool {
        matches!(self, Self::Convergence { .. })
    }
}
