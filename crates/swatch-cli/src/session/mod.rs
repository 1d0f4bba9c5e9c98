//! Interactive analyse/regenerate session.
//!
//! The session starts one analysis for the configured image and then turns
//! each line read from standard input into a regeneration request. Every
//! answer is written to standard output as one JSON document.

mod command;
mod shutdown;

use anyhow::Context;
use serde::Serialize;
use swatch_variant::{
    AnalysisMode, JobId, MaintenanceHandle, RegenerateRequest, RegenerateResponse, SlotIndex,
    VariantInput, VariantService,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};

use self::command::Command;
use self::shutdown::shutdown_signal;
use crate::TRACING_TARGET_SESSION;
use crate::config::SessionConfig;

/// Body written when a command cannot be served.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Body written for the `served` command.
#[derive(Debug, Serialize)]
struct ServedBody {
    job_id: JobId,
    served: Vec<SlotIndex>,
}

/// One interactive session over a single image.
pub struct Session {
    service: VariantService,
    maintenance: MaintenanceHandle,
    input: VariantInput,
    mode: AnalysisMode,
    stdout: Stdout,
}

impl Session {
    /// Loads the image and starts background maintenance.
    pub async fn open(service: VariantService, config: &SessionConfig) -> anyhow::Result<Self> {
        let data = tokio::fs::read(&config.image)
            .await
            .with_context(|| format!("failed to read image {}", config.image.display()))?;

        tracing::info!(
            target: TRACING_TARGET_SESSION,
            image = %config.image.display(),
            size = data.len(),
            "Image loaded"
        );

        let input = VariantInput::new(data, config.media_type());
        let maintenance = service.spawn_maintenance();

        Ok(Self {
            service,
            maintenance,
            input,
            mode: config.mode,
            stdout: tokio::io::stdout(),
        })
    }

    /// Runs the session until `quit`, end of input, or a shutdown signal.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let started = self
            .service
            .analyse(self.input.clone(), self.mode)
            .await;
        let mut job_id = started.job_id;
        self.emit(&started).await?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            let line = tokio::select! {
                _ = &mut shutdown => break,
                line = lines.next_line() => line.context("failed to read from stdin")?,
            };

            let Some(line) = line else {
                tracing::debug!(target: TRACING_TARGET_SESSION, "End of input");
                break;
            };

            if line.trim().is_empty() {
                continue;
            }

            let command = match line.parse::<Command>() {
                Ok(command) => command,
                Err(err) => {
                    self.emit_error("invalid_command", err.to_string()).await?;
                    continue;
                }
            };

            if command == Command::Quit {
                break;
            }

            if let Some(next_job_id) = self.execute(job_id, command).await? {
                job_id = next_job_id;
            }
        }

        self.close().await
    }

    /// Runs one command and returns the new job id after a fresh generation.
    async fn execute(
        &mut self,
        job_id: JobId,
        command: Command,
    ) -> anyhow::Result<Option<JobId>> {
        let request = match command {
            Command::Next(used_ids) => RegenerateRequest::next(job_id).with_used_ids(used_ids),
            Command::Slot(index) => RegenerateRequest::slot(job_id, index),
            Command::Fresh => RegenerateRequest::fresh(job_id),
            Command::Served => {
                let served = self.service.coordinator().served(job_id);
                self.emit(&ServedBody { job_id, served }).await?;
                return Ok(None);
            }
            Command::Help => {
                self.write_line(Command::HELP).await?;
                return Ok(None);
            }
            Command::Quit => return Ok(None),
        };

        let response = match self.service.regenerate(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET_SESSION,
                    job_id = %job_id,
                    error = %err,
                    "Regeneration request rejected"
                );
                self.emit_error("invalid_request", err.to_string()).await?;
                return Ok(None);
            }
        };

        self.emit(&response).await?;

        match response {
            RegenerateResponse::Fresh(started) => Ok(Some(started.job_id)),
            RegenerateResponse::Unavailable(_) | RegenerateResponse::Variant(_) => Ok(None),
        }
    }

    async fn emit(&mut self, value: &impl Serialize) -> anyhow::Result<()> {
        let body = serde_json::to_string_pretty(value).context("failed to encode response")?;
        self.write_line(&body).await
    }

    async fn emit_error(&mut self, error: &'static str, message: String) -> anyhow::Result<()> {
        self.emit(&ErrorBody { error, message }).await
    }

    async fn write_line(&mut self, text: &str) -> anyhow::Result<()> {
        self.stdout
            .write_all(text.as_bytes())
            .await
            .context("failed to write to stdout")?;
        self.stdout.write_all(b"\n").await?;
        self.stdout.flush().await?;
        Ok(())
    }

    /// Stops maintenance and waits for background calls to finish.
    async fn close(self) -> anyhow::Result<()> {
        tracing::info!(
            target: TRACING_TARGET_SESSION,
            active_drains = self.service.dispatcher().active_drains(),
            "Closing session"
        );

        self.maintenance
            .stop()
            .await
            .context("maintenance task failed")?;
        self.service.shutdown().await;
        Ok(())
    }
}
