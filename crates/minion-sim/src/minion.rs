use core::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::SimError;

#[derive(Debug)]
pub(crate) struct Heartbeat {
    pub minion: String,
}

#[derive(Debug)]
struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// One salt-minion style agent. While running it reports a heartbeat to the
/// control plane every `interval`.
#[derive(Debug)]
pub(crate) struct Minion {
    fqdn: String,
    running: Option<Running>,
}

impl Minion {
    pub(crate) const fn new(fqdn: String) -> Self {
        Self {
            fqdn,
            running: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    pub(crate) fn start(
        &mut self,
        parent: &CancellationToken,
        bus: mpsc::Sender<Heartbeat>,
        period: Duration,
    ) {
        if self.is_running() {
            return;
        }

        let token = parent.child_token();
        let fqdn = self.fqdn.clone();

        let handle = tokio::spawn({
            let token = token.clone();

            async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let heartbeat = Heartbeat {
                                minion: fqdn.clone(),
                            };
                            if bus.send(heartbeat).await.is_err() {
                                break;
                            }
                            trace!(%fqdn, "heartbeat sent");
                        }
                    }
                }

                debug!(%fqdn, "minion stopped");
            }
        });

        self.running = Some(Running { token, handle });
    }

    /// Signals the agent to stop without waiting for it.
    pub(crate) fn signal_stop(&self) {
        if let Some(running) = &self.running {
            running.token.cancel();
        }
    }

    /// Stops the agent and waits for its task to exit.
    pub(crate) async fn halt(&mut self) -> Result<(), SimError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        running.token.cancel();
        running.handle.await.map_err(|source| SimError::Join {
            name: format!("minion:{}", self.fqdn),
            source,
        })
    }
}
