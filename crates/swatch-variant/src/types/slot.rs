//! Slot index type.

use derive_more::{Debug, Display};
use serde::{Deserialize, Serialize};

use crate::Error;

/// One-based index of a parallel attempt within a job.
///
/// A job of width `N` owns the slots `1..=N`. Zero is never a valid slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Debug, Display)]
#[debug("{_0}")]
#[display("{_0}")]
#[serde(try_from = "u32", into = "u32")]
pub struct SlotIndex(u32);

impl SlotIndex {
    /// The first slot of every job.
    pub const FIRST: Self = Self(1);

    /// Creates a slot index, rejecting zero.
    #[inline]
    pub const fn new(index: u32) -> Option<Self> {
        if index == 0 { None } else { Some(Self(index)) }
    }

    /// Creates the slot index for a zero-based prompt position.
    #[inline]
    pub fn from_position(position: usize) -> Self {
        Self(u32::try_from(position).map_or(u32::MAX, |p| p.saturating_add(1)))
    }

    /// Returns the one-based index.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns true if the slot belongs to a job of the given width.
    #[inline]
    pub fn within(self, width: usize) -> bool {
        usize::try_from(self.0).is_ok_and(|index| index <= width)
    }

    /// Iterates over every slot of a job of the given width, ascending.
    pub fn all(width: usize) -> impl DoubleEndedIterator<Item = Self> {
        let width = u32::try_from(width).unwrap_or(u32::MAX);
        (1..=width).map(Self)
    }
}

impl TryFrom<u32> for SlotIndex {
    type Error = Error;

    fn try_from(index: u32) -> Result<Self, Self::Error> {
        Self::new(index).ok_or_else(|| Error::invalid_input("slot index must be at least 1"))
    }
}

impl From<SlotIndex> for u32 {
    fn from(slot: SlotIndex) -> Self {
        slot.0
    }
}
