use clap::Parser;
use eyre::Result;
use tracing::warn;

use ceph_control::{CephControl, ClusterControl, Fsid, ServiceType};

use crate::cli::Environment;

/// Configure clusters, report what came up, and shut them down again
#[derive(Copy, Clone, Debug, Parser)]
pub struct SmokeCommand {
    /// Hosts per cluster
    #[arg(long, default_value_t = 3)]
    pub servers: usize,

    /// Number of clusters
    #[arg(long, default_value_t = 1)]
    pub clusters: usize,
}

impl SmokeCommand {
    pub async fn run(self, environment: &Environment) -> Result<()> {
        let mut control = environment.control()?;

        let fsids = control.configure(self.servers, self.clusters).await?;

        let report = report(&control, &fsids, environment).await;
        let shutdown = control.shutdown().await;

        if let Err(err) = &shutdown {
            if report.is_err() {
                warn!(%err, "shutdown failed after a reporting error");
            }
        }

        report?;
        shutdown?;

        Ok(())
    }
}

async fn report(control: &CephControl, fsids: &[Fsid], environment: &Environment) -> Result<()> {
    let output = environment.output;

    for fsid in fsids {
        output.write_header(&format!("Cluster {fsid}"), 1);

        output.write_header("Hosts", 2);
        output.write_list(control.fqdns(fsid)?);

        output.write_header("Monitors", 2);
        output.write_list(control.service_fqdns(fsid, ServiceType::Mon)?);

        output.write_header("OSDs", 2);
        let rows = control
            .osd_map(fsid)
            .await?
            .into_iter()
            .map(|osd| vec![osd.id.to_string(), osd.up.to_string(), osd.r#in.to_string()])
            .collect();
        output.write_table(&["osd", "up", "in"], rows);
    }

    Ok(())
}
