//! Commonly used items from swatch-variant.
//!
//! ```rust,ignore
//! use swatch_variant::prelude::*;
//! ```

pub use crate::cache::{EvictionPolicy, ResponseCache};
pub use crate::dispatch::{
    AnalysisMode, PromptSource, StartedJob, VariantDispatcher, VariantInvoker,
};
#[cfg(any(test, feature = "test-utils"))]
pub use crate::mock::{MockConfig, MockInvoker, MockReply, numbered_prompts};
pub use crate::regenerate::{NextVariant, RegenerationCoordinator, UsedId};
pub use crate::service::{
    MaintenanceHandle, RegenerateRequest, RegenerateResponse, StartResponse, Unavailable,
    UnavailableReason, VariantService,
};
pub use crate::{
    Error, JobId, PreparedInput, Result, SlotIndex, VariantConfig, VariantInput, VariantResult,
};
