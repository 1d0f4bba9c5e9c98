//! Identifiers, inputs and results shared by every component.

mod input;
mod job_id;
mod result;
mod slot;

pub use input::{PreparedInput, VariantInput};
pub use job_id::JobId;
pub use result::VariantResult;
pub use slot::SlotIndex;
