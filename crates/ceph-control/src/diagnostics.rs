//! Where the control layer reports what it did.
//!
//! Backends never install log handlers of their own; they push events into a
//! [`DiagnosticSink`] handed to them at construction.

use core::fmt::Debug;
use core::time::Duration;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::model::Fsid;

#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DiagnosticEvent {
    CommandCompleted {
        target: String,
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Background units of a simulated cluster that were still alive when it
    /// was torn down.
    Lingering { fsid: Fsid, units: Vec<String> },
    Settling { reason: String, delay: Duration },
}

pub trait DiagnosticSink: Debug + Send + Sync {
    fn record(&self, event: DiagnosticEvent);
}

/// Forwards every event to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, event: DiagnosticEvent) {
        match event {
            DiagnosticEvent::CommandCompleted {
                target,
                command,
                code,
                stdout,
                stderr,
            } => {
                if code != 0 {
                    error!(%target, %command, code, "command failed");
                    error!(%target, "stdout: {stdout}");
                    error!(%target, "stderr: {stderr}");
                } else if !stderr.trim().is_empty() {
                    info!(%target, %command, "stderr: {stderr}");
                }
            }
            DiagnosticEvent::Lingering { fsid, units } => {
                for unit in units {
                    warn!(%fsid, %unit, "background unit still alive at teardown");
                }
            }
            DiagnosticEvent::Settling { reason, delay } => {
                info!(?delay, "waiting for {reason} to settle");
            }
        }
    }
}

/// Keeps every event in memory for later inspection.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<DiagnosticEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    /// Lingering units reported so far, flattened across clusters.
    #[must_use]
    pub fn lingering(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                DiagnosticEvent::Lingering { units, .. } => Some(units.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, event: DiagnosticEvent) {
        self.events.lock().push(event);
    }
}
