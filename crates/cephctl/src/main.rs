use std::env::var;
use std::process::ExitCode;

use clap::Parser;
use eyre::Result as EyreResult;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, EnvFilter};

mod cli;
mod output;

use cli::RootCommand;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = setup() {
        eprintln!("Failed to initialise cephctl: {err:?}");
        return ExitCode::FAILURE;
    }

    let command = RootCommand::parse();

    match command.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => err.into(),
    }
}

fn setup() -> EyreResult<()> {
    let directives = match var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => "cephctl=info,ceph_control=info,minion_sim=info".to_owned(),
    };

    registry()
        .with(EnvFilter::builder().parse(directives)?)
        .with(layer().with_writer(std::io::stderr))
        .init();

    color_eyre::install()?;

    Ok(())
}
