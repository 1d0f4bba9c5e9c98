//! Per-job record of slots already handed to the client.

use std::collections::BTreeSet;

use crate::types::SlotIndex;

/// Slots of one job that were returned or reported as used.
///
/// Only grows for the lifetime of the job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServedSet {
    slots: BTreeSet<SlotIndex>,
}

impl ServedSet {
    pub fn insert(&mut self, slot: SlotIndex) -> bool {
        self.slots.insert(slot)
    }

    pub fn extend(&mut self, slots: impl IntoIterator<Item = SlotIndex>) {
        self.slots.extend(slots);
    }

    pub fn contains(&self, slot: SlotIndex) -> bool {
        self.slots.contains(&slot)
    }

    /// Returns true once every slot in `1..=width` has been served.
    pub fn covers(&self, width: usize) -> bool {
        SlotIndex::all(width).all(|slot| self.slots.contains(&slot))
    }

    pub fn to_vec(&self) -> Vec<SlotIndex> {
        self.slots.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers_ignores_out_of_range_slots() {
        let mut served = ServedSet::default();
        served.extend(SlotIndex::all(2));
        served.extend(SlotIndex::new(9));

        assert!(served.covers(2));
        assert!(!served.covers(3));
    }
}
