use clap::Parser;
use eyre::Result;

use ceph_control::ClusterControl;

use crate::cli::Environment;

/// Mark one OSD of the external cluster in (or out)
#[derive(Copy, Clone, Debug, Parser)]
pub struct MarkOsdCommand {
    /// OSD id
    pub id: u32,

    /// Mark the OSD out instead of in
    #[arg(long)]
    pub out: bool,
}

impl MarkOsdCommand {
    pub async fn run(self, environment: &Environment) -> Result<()> {
        let mut control = environment.external_control()?;
        let fsid = control.fsid().clone();

        control.mark_osd_in(&fsid, self.id, !self.out).await?;

        let rows = control
            .osd_map(&fsid)
            .await?
            .into_iter()
            .map(|osd| vec![osd.id.to_string(), osd.up.to_string(), osd.r#in.to_string()])
            .collect();
        environment.output.write_table(&["osd", "up", "in"], rows);

        Ok(())
    }
}
