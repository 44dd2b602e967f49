//! # Slot Headers
//!
//! Every slot in a block starts with one unit holding a packed
//! [`SlotHeader`]. When the slot is free, its first payload unit holds a
//! packed [`FreeLink`], threading the size-class free list through the arena.
//!
//! ## Layout
//!
//! ```text
//!  SlotHeader (u64)
//!  ┌──────────────────┬──────────────────┬────────┐
//!  │ next (31 bits)   │ previous (31)    │ status │
//!  │ bits 33..64      │ bits 2..33       │ 0..2   │
//!  └──────────────────┴──────────────────┴────────┘
//!
//!  FreeLink (u64)
//!  ┌──────────────────┬──────────────────┐
//!  │ next index (32)  │ previous index   │
//!  └──────────────────┴──────────────────┘
//! ```
//!
//! Offsets and indices are measured in units. Index 0 is always the leading
//! sentinel of a block, so it doubles as the "no link" value.

const STATUS_BITS: u32 = 2;
const OFFSET_BITS: u32 = 31;
const STATUS_MASK: u64 = (1 << STATUS_BITS) - 1;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;
const PREVIOUS_SHIFT: u32 = STATUS_BITS;
const NEXT_SHIFT: u32 = STATUS_BITS + OFFSET_BITS;

/// Status tag of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotStatus {
    /// Slot is on a free list.
    Free = 1,
    /// Slot is handed out to a caller.
    Allocated = 2,
    /// Leading or terminal marker of a block.
    Sentinel = 3,
}

impl SlotStatus {
    const fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            1 => Some(SlotStatus::Free),
            2 => Some(SlotStatus::Allocated),
            3 => Some(SlotStatus::Sentinel),
            _ => None,
        }
    }
}

/// Boundary record stored at the start of every slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotHeader {
    /// Units back to the previous slot's header.
    pub previous: u32,
    /// Units forward to the next slot's header (the slot size).
    pub next: u32,
    /// Slot status.
    pub status: SlotStatus,
}

impl SlotHeader {
    /// Largest offset either field can hold.
    pub const MAX_OFFSET: u32 = (1 << OFFSET_BITS) - 1;

    /// Creates a header, rejecting offsets the packed form cannot hold.
    #[must_use]
    pub const fn new(previous: u32, next: u32, status: SlotStatus) -> Option<Self> {
        if previous > Self::MAX_OFFSET || next > Self::MAX_OFFSET {
            return None;
        }
        Some(Self {
            previous,
            next,
            status,
        })
    }

    /// Packs the header into one word.
    #[inline]
    #[must_use]
    pub const fn encode(self) -> u64 {
        (self.status as u64)
            | ((self.previous as u64 & OFFSET_MASK) << PREVIOUS_SHIFT)
            | ((self.next as u64 & OFFSET_MASK) << NEXT_SHIFT)
    }

    /// Unpacks a header. Returns `None` for a word with no valid status tag.
    #[inline]
    #[must_use]
    pub const fn decode(word: u64) -> Option<Self> {
        match SlotStatus::from_bits(word & STATUS_MASK) {
            Some(status) => Some(Self {
                previous: ((word >> PREVIOUS_SHIFT) & OFFSET_MASK) as u32,
                next: ((word >> NEXT_SHIFT) & OFFSET_MASK) as u32,
                status,
            }),
            None => None,
        }
    }
}

/// Free-list link stored in the first payload unit of a free slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FreeLink {
    /// Index of the previous free slot in the same class (0 = head).
    pub previous: u32,
    /// Index of the next free slot in the same class (0 = tail).
    pub next: u32,
}

impl FreeLink {
    /// Packs the link into one word.
    #[inline]
    #[must_use]
    pub const fn encode(self) -> u64 {
        (self.previous as u64) | ((self.next as u64) << 32)
    }

    /// Unpacks a link.
    #[inline]
    #[must_use]
    pub const fn decode(word: u64) -> Self {
        Self {
            previous: word as u32,
            next: (word >> 32) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip_at_limits() {
        for status in [SlotStatus::Free, SlotStatus::Allocated, SlotStatus::Sentinel] {
            for (previous, next) in [(0, 0), (1, 2), (SlotHeader::MAX_OFFSET, 7), (3, SlotHeader::MAX_OFFSET)] {
                let header = SlotHeader::new(previous, next, status).unwrap();
                assert_eq!(SlotHeader::decode(header.encode()), Some(header));
            }
        }
    }

    #[test]
    fn test_header_rejects_oversized_offsets() {
        assert!(SlotHeader::new(SlotHeader::MAX_OFFSET + 1, 1, SlotStatus::Free).is_none());
        assert!(SlotHeader::new(1, SlotHeader::MAX_OFFSET + 1, SlotStatus::Free).is_none());
    }

    #[test]
    fn test_zero_word_is_not_a_header() {
        assert_eq!(SlotHeader::decode(0), None);
    }

    #[test]
    fn test_link_roundtrip() {
        let link = FreeLink { previous: u32::MAX, next: 42 };
        assert_eq!(FreeLink::decode(link.encode()), link);
        assert_eq!(FreeLink::decode(0), FreeLink::default());
    }
}
