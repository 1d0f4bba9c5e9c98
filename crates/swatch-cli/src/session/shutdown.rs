//! Interrupt signal handling.

use std::future::pending;
use std::io;

use crate::TRACING_TARGET_SHUTDOWN;

/// Signal that ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }
}

/// Parks forever when a handler cannot be installed, leaving the other
/// signal in charge.
async fn installed(signal: ShutdownSignal, result: io::Result<()>) -> ShutdownSignal {
    if let Err(err) = result {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            signal = signal.name(),
            error = %err,
            "Signal handler unavailable"
        );
        pending::<()>().await;
    }
    signal
}

#[cfg(unix)]
async fn terminate() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> io::Result<()> {
    pending().await
}

/// Resolves with the first of Ctrl+C or SIGTERM.
pub async fn shutdown_signal() -> ShutdownSignal {
    let interrupt = async {
        let result = tokio::signal::ctrl_c().await;
        installed(ShutdownSignal::Interrupt, result).await
    };
    let sigterm = async {
        let result = terminate().await;
        installed(ShutdownSignal::Terminate, result).await
    };

    let signal = tokio::select! {
        signal = interrupt => signal,
        signal = sigterm => signal,
    };

    tracing::info!(
        target: TRACING_TARGET_SHUTDOWN,
        signal = signal.name(),
        "Ending session on signal"
    );
    signal
}
