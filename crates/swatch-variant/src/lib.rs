#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod cache;
mod config;
pub mod dispatch;
mod error;
#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod mock;
#[doc(hidden)]
pub mod prelude;
pub mod regenerate;
pub mod service;
mod types;

pub use cache::{EvictionPolicy, ResponseCache};
pub use config::VariantConfig;
pub use dispatch::{AnalysisMode, PromptSource, StartedJob, VariantDispatcher, VariantInvoker};
pub use error::{BoxedError, Error, Result};
pub use regenerate::{NextVariant, RegenerationCoordinator, UsedId, normalize_used_ids};
pub use service::{
    MaintenanceHandle, RegenerateRequest, RegenerateResponse, StartResponse, Unavailable,
    UnavailableReason, VariantService,
};
pub use types::{JobId, PreparedInput, SlotIndex, VariantInput, VariantResult};
