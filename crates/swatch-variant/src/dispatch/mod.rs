//! Fan-out of one input into parallel analysis calls.
//!
//! The [`VariantDispatcher`] turns one input into `N` independent calls of a
//! [`VariantInvoker`], one per prompt produced by a [`PromptSource`]. It
//! returns the earliest completion synchronously and lets a supervised
//! background drain write the remaining completions into the
//! [`ResponseCache`](crate::ResponseCache).

mod dispatcher;
mod invoker;
mod prompt;

pub use dispatcher::{StartedJob, VariantDispatcher};
pub use invoker::VariantInvoker;
pub use prompt::{AnalysisMode, PromptSource};

/// Tracing target for dispatch operations.
pub const TRACING_TARGET: &str = "swatch_variant::dispatch";
