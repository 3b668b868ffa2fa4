use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SimError {
    #[error("a simulated cluster needs at least one server")]
    NoServers,

    #[error("unknown osd {0}")]
    UnknownOsd(u32),

    #[error("unknown minion '{0}'")]
    UnknownMinion(String),

    #[error("unknown service type '{0}'")]
    UnknownService(String),

    #[error("simulator has already been started")]
    AlreadyStarted,

    #[error("simulator is not running")]
    NotRunning,

    #[error("failed to write simulator state to {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] toml::ser::Error),

    /// A background task panicked or was aborted instead of exiting cleanly.
    #[error("background task '{name}' did not exit cleanly")]
    Join {
        name: String,
        #[source]
        source: JoinError,
    },
}
