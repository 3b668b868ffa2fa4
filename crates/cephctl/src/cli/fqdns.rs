use clap::Parser;
use eyre::Result;

use ceph_control::{ClusterControl, ServiceType};

use crate::cli::Environment;

/// List the hosts of the external cluster
#[derive(Copy, Clone, Debug, Parser)]
pub struct FqdnsCommand {
    /// Only hosts running this service (mon or osd)
    #[arg(long, value_name = "SERVICE")]
    pub service: Option<ServiceType>,
}

impl FqdnsCommand {
    pub fn run(self, environment: &Environment) -> Result<()> {
        let control = environment.external_control()?;

        let hosts = match self.service {
            Some(service) => control.service_fqdns(control.fsid(), service)?,
            None => control.server_fqdns(),
        };

        environment.output.write_list(hosts);

        Ok(())
    }
}
