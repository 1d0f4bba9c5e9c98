//! Variant generation error types.

use std::borrow::Cow;

use crate::types::JobId;

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for variant operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Variant generation error type.
///
/// Failures of a single slot never surface as an [`Error`]: the dispatcher
/// absorbs them into a null payload. These variants describe everything
/// that happens around the slots.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input could not be prepared for analysis.
    #[error("invalid input: {0}")]
    InvalidInput(Cow<'static, str>),

    /// Building the per-slot prompts failed.
    #[error("prompt construction failed: {0}")]
    Prompt(Cow<'static, str>),

    /// A call to the external analysis backend failed.
    #[error("variant invocation failed: {message}")]
    Invocation {
        message: Cow<'static, str>,
        #[source]
        source: Option<BoxedError>,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(Cow<'static, str>),

    /// The job is unknown or has already been evicted.
    #[error("unknown job: {0}")]
    UnknownJob(JobId),
}

impl Error {
    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates a prompt construction error.
    pub fn prompt(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Prompt(message.into())
    }

    /// Creates an invocation error with a message.
    pub fn invocation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Invocation {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an invocation error with a message and source.
    pub fn invocation_with_source(
        message: impl Into<Cow<'static, str>>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Invocation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true if the error was caused by the caller's request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::UnknownJob(_))
    }
}
