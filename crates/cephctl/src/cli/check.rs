use clap::Parser;
use eyre::Result;

use ceph_control::BackendKind;

use crate::cli::Environment;

/// Validate the configuration and print what would be used
#[derive(Copy, Clone, Debug, Parser)]
pub struct CheckCommand;

impl CheckCommand {
    pub fn run(self, environment: &Environment) -> Result<()> {
        let output = environment.output;
        let config = &environment.config;

        output.write_header("Configuration", 1);
        output.write_json(config)?;

        if config.testing.ceph_control == BackendKind::External {
            let description = config.cluster_description()?;

            output.write_header("External cluster", 1);
            output.write_str(&format!("master: {}", description.master_fqdn));
            output.write_str(&format!(
                "admin host: {}",
                description.admin_fqdn(&config.external.admin_role)?
            ));
            output.write_list(description.server_fqdns());
        }

        Ok(())
    }
}
