//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── session: SessionConfig  # Image path, analysis mode, log format
//! ├── variant: VariantConfig  # Fan-out, worker pool, polling, eviction
//! └── mock: MockConfig        # Simulated backend text and latency
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.

mod session;

use std::process;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
pub use session::SessionConfig;
use swatch_variant::VariantConfig;
use swatch_variant::mock::MockConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "swatch")]
#[command(about = "Interactive fabric variant generation session")]
#[command(version)]
pub struct Cli {
    /// Session input and output options.
    #[clap(flatten)]
    pub session: SessionConfig,

    /// Variant generation configuration.
    #[clap(flatten)]
    pub variant: VariantConfig,

    /// Simulated backend configuration.
    #[clap(flatten)]
    pub mock: MockConfig,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    ///
    /// The .env file is loaded before clap parses arguments, so its values
    /// act as defaults for every `env`-backed option.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    ///
    /// Logs are written to standard error, as text or as JSON lines.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = self.session.log_json;

        let json_layer = json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        });
        let text_layer =
            (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

        tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .with(text_layer)
            .init();
    }

    /// Validates all configuration values.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.session
            .validate()
            .context("invalid session configuration")?;
        self.variant
            .validate()
            .context("invalid variant configuration")?;
        Ok(())
    }

    /// Logs configuration at debug level.
    pub fn log(&self) {
        Self::log_build_info();
        self.session.log();

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            fan_out = self.variant.fan_out,
            max_concurrent_calls = self.variant.max_concurrent_calls,
            poll_timeout_ms = self.variant.poll_timeout_ms,
            poll_interval_ms = self.variant.poll_interval_ms,
            job_ttl_secs = self.variant.job_ttl_secs,
            max_jobs = self.variant.max_jobs,
            "Variant configuration"
        );

        tracing::debug!(
            target: TRACING_TARGET_CONFIG,
            custom_response = self.mock.mock_response.is_some(),
            min_latency_ms = self.mock.min_latency_ms,
            max_latency_ms = self.mock.max_latency_ms,
            "Mock backend configuration"
        );
    }

    fn log_build_info() {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}
