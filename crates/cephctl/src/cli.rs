use std::process::ExitCode;

use camino::Utf8PathBuf;
use ceph_control::{CephControl, ControlError, ExternalCephControl, TestConfig};
use clap::{Parser, Subcommand};
use const_format::concatcp;
use eyre::{bail, Report as EyreReport, Result};
use thiserror::Error as ThisError;

use crate::output::{OutputFormat, OutputWriter};

mod check;
mod fqdns;
mod go_dark;
mod mark_osd;
mod smoke;

use check::CheckCommand;
use fqdns::FqdnsCommand;
use go_dark::GoDarkCommand;
use mark_osd::MarkOsdCommand;
use smoke::SmokeCommand;

/// Exit status for a run the selected backend cannot serve.
const EXIT_SKIPPED: u8 = 77;

pub const EXAMPLES: &str = r"
  # Show the effective configuration
  $ cephctl --config tests.toml check

  # Bring up two simulated clusters of three hosts, list them, tear down
  $ cephctl smoke --servers 3 --clusters 2

  # Stop the management agent on one host of the external cluster
  $ cephctl --config external.toml go-dark --minion node2
";

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(after_help = concatcp!(
    "Environment variables:\n",
    "  CEPH_CONTROL_CONFIG    Test configuration file\n",
    "  RUST_LOG               Log filter directives\n\n",
    "Examples:",
    EXAMPLES
))]
pub struct RootCommand {
    #[command(flatten)]
    pub args: RootArgs,

    #[command(subcommand)]
    pub action: SubCommands,
}

#[derive(Debug, Subcommand)]
pub enum SubCommands {
    Check(CheckCommand),
    Smoke(SmokeCommand),
    Fqdns(FqdnsCommand),
    GoDark(GoDarkCommand),
    MarkOsd(MarkOsdCommand),
}

#[derive(Debug, Parser)]
pub struct RootArgs {
    /// Test configuration file; defaults apply when omitted
    #[arg(long, value_name = "PATH")]
    #[arg(env = ceph_control::config::CONFIG_ENV, hide_env_values = true)]
    pub config: Option<Utf8PathBuf>,

    #[arg(long, value_name = "FORMAT", default_value_t, value_enum)]
    pub output_format: OutputFormat,
}

#[derive(Debug)]
pub struct Environment {
    pub output: OutputWriter,
    pub config: TestConfig,
}

impl Environment {
    pub const fn new(output: OutputWriter, config: TestConfig) -> Self {
        Self { output, config }
    }

    pub fn control(&self) -> Result<CephControl> {
        Ok(CephControl::from_config(&self.config)?)
    }

    /// The external backend; commands acting on a long-lived cluster have
    /// nothing to act on in-process.
    pub fn external_control(&self) -> Result<ExternalCephControl> {
        match self.control()? {
            CephControl::External(control) => Ok(control),
            CephControl::Embedded(_) => {
                bail!("this command needs `[testing] ceph_control = \"external\"`")
            }
        }
    }
}

impl RootCommand {
    pub async fn run(self) -> Result<(), CliError> {
        let output = OutputWriter::new(self.args.output_format);

        let config = match &self.args.config {
            Some(path) => TestConfig::load(path),
            None => Ok(TestConfig::default()),
        };
        let config = match config {
            Ok(config) => config,
            Err(err) => {
                let err = CliError::Other(err.into());
                err.report(output);
                return Err(err);
            }
        };

        let environment = Environment::new(output, config);

        let result = match self.action {
            SubCommands::Check(check) => check.run(&environment),
            SubCommands::Smoke(smoke) => smoke.run(&environment).await,
            SubCommands::Fqdns(fqdns) => fqdns.run(&environment),
            SubCommands::GoDark(go_dark) => go_dark.run(&environment).await,
            SubCommands::MarkOsd(mark_osd) => mark_osd.run(&environment).await,
        };

        if let Err(err) = result {
            let err = match err.downcast::<ControlError>() {
                Ok(ControlError::Skip { reason }) => CliError::Skipped(reason),
                Ok(err) => CliError::Other(err.into()),
                Err(err) => CliError::Other(err),
            };

            err.report(environment.output);
            return Err(err);
        }

        Ok(())
    }
}

#[derive(Debug, ThisError)]
pub enum CliError {
    #[error("skipped: {0}")]
    Skipped(String),

    #[error(transparent)]
    Other(#[from] EyreReport),
}

impl CliError {
    fn report(&self, output: OutputWriter) {
        match self {
            Self::Skipped(reason) => output.write_error("SKIPPED", reason),
            Self::Other(err) => output.write_error("ERROR", &format!("{err:?}")),
        }
    }
}

impl From<CliError> for ExitCode {
    fn from(error: CliError) -> Self {
        match error {
            CliError::Skipped(_) => Self::from(EXIT_SKIPPED),
            CliError::Other(_) => Self::FAILURE,
        }
    }
}
