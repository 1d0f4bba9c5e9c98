#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod session;

use std::process;

use anyhow::Context;
use swatch_variant::VariantService;

use crate::config::Cli;
use crate::session::Session;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "swatch_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "swatch_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "swatch_cli::config";
pub const TRACING_TARGET_SESSION: &str = "swatch_cli::session";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "application terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %error,
            "application terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();
    cli.init_tracing();
    cli.log();
    cli.validate()?;

    let invoker = cli.mock.clone().into_invoker();
    let service = VariantService::new(cli.variant.clone(), invoker)
        .context("failed to create variant service")?;

    let session = Session::open(service, &cli.session)
        .await
        .context("failed to open session")?;

    session.run().await
}
