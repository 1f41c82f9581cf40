//! # Sealant
//!
//! Entry point of the `sealant` command.
//!
//! The process exits with status 1 when a leak is detected and 2 on any other
//! error, so it can gate a CI job.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::commands::Verdict;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match commands::execute_command(cli.command).await {
        Ok(Verdict::Clean) => ExitCode::SUCCESS,
        Ok(Verdict::Leak) => ExitCode::from(1),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(2)
        }
    }
}

/// Initialize tracing subscriber with environment filter.
///
/// Logs go to stderr; stdout carries the JSON result only.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
