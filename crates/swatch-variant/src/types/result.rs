//! Variant result type.

use serde::{Deserialize, Serialize};

use super::SlotIndex;

/// Outcome of one slot of a job.
///
/// A `None` response covers both a failed call and a legitimately empty
/// answer; the two are deliberately indistinguishable downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantResult {
    /// Slot the result belongs to.
    #[serde(alias = "id")]
    pub slot: SlotIndex,
    /// Generated text, if any.
    pub response: Option<String>,
}

impl VariantResult {
    /// Creates a result for the given slot.
    pub fn new(slot: SlotIndex, response: Option<String>) -> Self {
        Self { slot, response }
    }

    /// Creates a result without a payload.
    pub fn empty(slot: SlotIndex) -> Self {
        Self {
            slot,
            response: None,
        }
    }

    /// Returns the generated text.
    pub fn text(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Returns true if the slot produced no text.
    pub fn is_empty(&self) -> bool {
        self.response.is_none()
    }
}
