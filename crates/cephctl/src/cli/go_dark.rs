use clap::Parser;
use const_format::concatcp;
use eyre::Result;

use ceph_control::ClusterControl;

use crate::cli::Environment;

pub const EXAMPLES: &str = r"
  # Stop the agent on every host whose name contains node2
  $ cephctl go-dark --minion node2

  # Bring every agent back
  $ cephctl go-dark --restore
";

/// Stop (or restart) the management agent on external cluster hosts
#[derive(Clone, Debug, Parser)]
#[command(after_help = concatcp!("Examples:", EXAMPLES))]
pub struct GoDarkCommand {
    /// Only hosts whose name contains this string; every host when omitted
    #[arg(long, value_name = "ID")]
    pub minion: Option<String>,

    /// Start the agents instead of stopping them
    #[arg(long)]
    pub restore: bool,
}

impl GoDarkCommand {
    pub async fn run(self, environment: &Environment) -> Result<()> {
        let mut control = environment.external_control()?;
        let fsid = control.fsid().clone();

        control
            .go_dark(&fsid, !self.restore, self.minion.as_deref())
            .await?;

        let state = if self.restore { "restored" } else { "dark" };
        let scope = self.minion.as_deref().unwrap_or("all hosts");
        environment.output.write_str(&format!("{scope}: {state}"));

        Ok(())
    }
}
