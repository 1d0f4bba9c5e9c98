//! Client-facing "give me another variant" protocol.
//!
//! The [`RegenerationCoordinator`] layers delivery history on top of the
//! [`ResponseCache`](crate::ResponseCache). It answers with a ready unseen
//! slot, with [`NextVariant::Pending`] while unseen slots are still running,
//! or with [`NextVariant::Exhausted`] once every slot has been served. It
//! never starts new calls on its own; exhaustion is resolved by the caller
//! starting a fresh job.

mod coordinator;
mod normalize;
mod served;

pub use coordinator::{NextVariant, RegenerationCoordinator};
pub use normalize::{UsedId, normalize_used_ids};

/// Tracing target for regeneration operations.
pub const TRACING_TARGET: &str = "swatch_variant::regenerate";
