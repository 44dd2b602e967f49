//! # Memory Block
//!
//! One contiguous arena subdivided into variable-length slots.
//!
//! ## Safety Note
//!
//! The arena is raw platform memory handed out to callers as pointers.
//! Headers and free-list links are read and written through the same base
//! pointer, never through references into the arena.
//!
//! ## Layout
//!
//! ```text
//!  unit:  0          1                                  capacity-1
//!        ┌────────┬──────┬─────────┬──────┬──────────┬────────┐
//!        │SENTINEL│ HDR  │ payload │ HDR  │ link ... │SENTINEL│
//!        └────────┴──────┴─────────┴──────┴──────────┴────────┘
//!                  ALLOCATED slot    FREE slot
//! ```
//!
//! Every slot starts on a unit boundary and its header fills one unit, so
//! the payload that follows is aligned to the block alignment.

#![allow(unsafe_code)]

use std::collections::HashSet;
use std::fmt;
use std::ptr::NonNull;

use tracing::{error, warn};

use crate::error::{AllocError, AllocResult};
use crate::platform;
use crate::size_class::{class_count, class_for_request, class_of};
use crate::slot::{FreeLink, SlotHeader, SlotStatus};

/// Size in bytes of one header word.
pub const ELEMENT_SIZE: usize = std::mem::size_of::<u64>();

/// Index of the first usable slot (unit 0 is the leading sentinel).
pub const FIRST_SLOT: usize = 1;

/// Units taken by the leading and terminal sentinels.
pub const FIXED_OVERHEAD_UNITS: usize = 2;

/// Smallest slot: one header unit plus one unit for the free-list link.
pub const MIN_SLOT_UNITS: usize = 2;

/// Largest block capacity in units that slot headers can describe.
pub const MAX_BLOCK_UNITS: usize = SlotHeader::MAX_OFFSET as usize;

/// Head of one size-class free list.
#[derive(Clone, Copy, Debug, Default)]
struct FreeList {
    /// Index of the first free slot (0 = empty).
    head: u32,
    /// Number of slots on the list.
    count: u32,
}

/// A slab arena with intrusive size-class free lists.
pub struct MemoryBlock {
    /// Start of the arena.
    base: NonNull<u8>,
    /// Block size this arena was configured with.
    block_size: usize,
    /// Requested payload alignment.
    alignment: usize,
    /// Element granularity in bytes (`max(alignment, ELEMENT_SIZE)`).
    unit: usize,
    /// Arena size in units.
    capacity: usize,
    /// Free list heads indexed by size class.
    free_lists: Vec<FreeList>,
    /// One bit per size class with a non-empty list.
    occupied: Vec<u64>,
    /// Units in free slots.
    free_units: usize,
    /// Units in allocated slots.
    allocated_units: usize,
    /// Live allocations.
    allocation_count: usize,
}

// SAFETY: the arena is exclusively owned by the block; all access goes
// through `&self`/`&mut self`, and pools guard blocks with a mutex.
unsafe impl Send for MemoryBlock {}

impl MemoryBlock {
    /// Element granularity used for `alignment`.
    #[inline]
    #[must_use]
    pub const fn unit_for(alignment: usize) -> usize {
        if alignment > ELEMENT_SIZE {
            alignment
        } else {
            ELEMENT_SIZE
        }
    }

    /// Largest payload a fresh block of `block_size` bytes can serve.
    #[must_use]
    pub fn maximum_allocation_size_for(block_size: usize, alignment: usize) -> usize {
        let unit = Self::unit_for(alignment);
        let capacity = (block_size / unit).min(MAX_BLOCK_UNITS);
        if capacity < FIXED_OVERHEAD_UNITS + MIN_SLOT_UNITS {
            return 0;
        }
        (capacity - FIXED_OVERHEAD_UNITS - 1) * unit
    }

    /// Smallest block size in bytes that can serve one `size`-byte payload.
    #[must_use]
    pub fn minimum_block_size_for(size: usize, alignment: usize) -> usize {
        let unit = Self::unit_for(alignment);
        (payload_units(size, unit) + 1 + FIXED_OVERHEAD_UNITS) * unit
    }

    /// Checks that a block of `block_size` bytes aligned to `alignment` can
    /// be created.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if `alignment` is not a power of two or the block
    ///   cannot hold a single slot
    /// - `BlockTooLarge` if slot headers cannot address the capacity
    pub fn check_geometry(block_size: usize, alignment: usize) -> AllocResult<()> {
        if !alignment.is_power_of_two() {
            return Err(AllocError::InvalidConfig(format!(
                "alignment {alignment} is not a power of two"
            )));
        }
        let unit = Self::unit_for(alignment);
        let capacity = block_size / unit;
        if capacity < FIXED_OVERHEAD_UNITS + MIN_SLOT_UNITS {
            return Err(AllocError::InvalidConfig(format!(
                "block size {block_size} cannot hold a slot of {MIN_SLOT_UNITS} units of {unit} bytes"
            )));
        }
        if capacity > MAX_BLOCK_UNITS {
            return Err(AllocError::BlockTooLarge {
                units: capacity,
                limit: MAX_BLOCK_UNITS,
            });
        }
        Ok(())
    }

    /// Creates a block holding one free slot that spans the arena.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if `alignment` is not a power of two or the block
    ///   cannot hold a single slot
    /// - `BlockTooLarge` if slot headers cannot address the capacity
    /// - `OutOfMemory` if the platform refuses the arena
    pub fn new(block_size: usize, alignment: usize) -> AllocResult<Self> {
        Self::check_geometry(block_size, alignment)?;
        let unit = Self::unit_for(alignment);
        let capacity = block_size / unit;

        let base = platform::allocate(capacity * unit, unit)?;
        let classes = class_count(capacity - FIXED_OVERHEAD_UNITS);
        let mut block = Self {
            base,
            block_size,
            alignment,
            unit,
            capacity,
            free_lists: vec![FreeList::default(); classes],
            occupied: vec![0; classes.div_ceil(64)],
            free_units: 0,
            allocated_units: 0,
            allocation_count: 0,
        };

        let span = capacity - FIXED_OVERHEAD_UNITS;
        block.write_header(0, header(0, FIRST_SLOT, SlotStatus::Sentinel));
        block.write_header(FIRST_SLOT, header(1, span, SlotStatus::Free));
        block.write_header(capacity - 1, header(span, 0, SlotStatus::Sentinel));
        block.link(FIRST_SLOT, span);
        block.free_units = span;

        Ok(block)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Address of the arena start.
    #[inline]
    #[must_use]
    pub fn base_address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Block size this arena was created with.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Requested payload alignment.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Element granularity in bytes.
    #[inline]
    #[must_use]
    pub const fn unit(&self) -> usize {
        self.unit
    }

    /// Arena size in units.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the first usable slot.
    #[inline]
    #[must_use]
    pub const fn first_slot(&self) -> usize {
        FIRST_SLOT
    }

    /// Bytes of the arena usable by slots (capacity minus sentinels).
    #[inline]
    #[must_use]
    pub const fn memory_size(&self) -> usize {
        (self.capacity - FIXED_OVERHEAD_UNITS) * self.unit
    }

    /// Bytes in free slots.
    #[inline]
    #[must_use]
    pub const fn available_size(&self) -> usize {
        self.free_units * self.unit
    }

    /// Bytes in allocated slots, headers included.
    #[inline]
    #[must_use]
    pub const fn reserved_size(&self) -> usize {
        self.allocated_units * self.unit
    }

    /// Number of live allocations.
    #[inline]
    #[must_use]
    pub const fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    /// Largest payload this block can ever serve.
    #[inline]
    #[must_use]
    pub const fn maximum_allocation_size(&self) -> usize {
        (self.max_slot_units() - 1) * self.unit
    }

    /// Whether the arena is one free slot spanning the whole block.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(
            self.read_header(FIRST_SLOT),
            Some(h) if h.status == SlotStatus::Free && h.next as usize == self.max_slot_units()
        )
    }

    /// Whether `ptr` lies inside this arena.
    #[inline]
    #[must_use]
    pub fn within(&self, ptr: *const u8) -> bool {
        let address = ptr as usize;
        let base = self.base_address();
        address >= base && address < base + self.capacity * self.unit
    }

    /// Free-list entries as `(slot index, slot units)`, smallest class first.
    #[must_use]
    pub fn free_slots(&self) -> Vec<(usize, usize)> {
        let mut slots = Vec::new();
        for list in &self.free_lists {
            let mut index = list.head as usize;
            while index != 0 && slots.len() <= self.capacity {
                let units = self.read_header(index).map_or(0, |h| h.next as usize);
                slots.push((index, units));
                index = self.read_link(index).next as usize;
            }
        }
        slots
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Cheap check whether a `size`-byte request would succeed.
    #[must_use]
    pub fn free_slots_available(&self, size: usize) -> bool {
        self.slot_units_for(size)
            .and_then(|units| self.find_slot(units))
            .is_some()
    }

    /// Allocates `size` bytes, returning a pointer just past the slot header.
    ///
    /// Returns `None` when no size class has room or `size` exceeds
    /// [`Self::maximum_allocation_size`].
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let units = self.slot_units_for(size)?;
        let index = self.find_slot(units)?;

        let slot = match self.read_header(index) {
            Some(h) if h.status == SlotStatus::Free => h,
            other => {
                error!(index, header = ?other, "free list head is not a free slot");
                return None;
            }
        };
        let slot_units = slot.next as usize;
        let Some(spare) = slot_units.checked_sub(units) else {
            error!(index, slot_units, units, "size class holds an undersized slot");
            return None;
        };

        self.unlink(index, slot_units);

        let taken = if spare >= MIN_SLOT_UNITS {
            let remainder = index + units;
            self.write_header(index, header(slot.previous as usize, units, SlotStatus::Allocated));
            self.write_header(remainder, header(units, spare, SlotStatus::Free));
            self.set_previous(remainder + spare, spare);
            self.link(remainder, spare);
            units
        } else {
            self.write_header(index, header(slot.previous as usize, slot_units, SlotStatus::Allocated));
            slot_units
        };

        self.free_units -= taken;
        self.allocated_units += taken;
        self.allocation_count += 1;

        Some(self.payload(index))
    }

    /// Frees the slot behind `ptr` and merges it with free neighbours.
    ///
    /// The recorded slot size wins over `size`; a disagreement is logged.
    /// Returns the bytes released, header included.
    ///
    /// # Errors
    ///
    /// `InvalidFree` if `ptr` is not the payload of an allocated slot.
    pub fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> AllocResult<usize> {
        let address = ptr.as_ptr() as usize;
        let index = self
            .slot_index(ptr.as_ptr())
            .ok_or(AllocError::InvalidFree { address })?;

        let slot = match self.read_header(index) {
            Some(h) if h.status == SlotStatus::Allocated => h,
            _ => {
                warn!(address, "free of a slot that is not allocated");
                return Err(AllocError::InvalidFree { address });
            }
        };
        let slot_units = slot.next as usize;
        if !self.is_linked_slot(index, slot) {
            warn!(address, header = ?slot, "free of a pointer into the middle of a slot");
            return Err(AllocError::InvalidFree { address });
        }

        if !self.size_matches(size, slot_units) {
            let mismatch = AllocError::SizeMismatch {
                address,
                recorded: (slot_units - 1) * self.unit,
                supplied: size,
            };
            warn!(%mismatch, "using recorded slot size");
        }

        let mut start = index;
        let mut total = slot_units;
        let mut previous = slot.previous as usize;

        let before = index.saturating_sub(slot.previous as usize);
        if let Some(h) = self.read_header(before).filter(|h| h.status == SlotStatus::Free) {
            self.unlink(before, h.next as usize);
            start = before;
            total += h.next as usize;
            previous = h.previous as usize;
        }

        let after = index + slot_units;
        if let Some(h) = self.read_header(after).filter(|h| h.status == SlotStatus::Free) {
            self.unlink(after, h.next as usize);
            total += h.next as usize;
        }

        self.write_header(start, header(previous, total, SlotStatus::Free));
        self.set_previous(start + total, total);
        self.link(start, total);

        self.allocated_units -= slot_units;
        self.free_units += slot_units;
        self.allocation_count -= 1;

        Ok(slot_units * self.unit)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Walks boundary records and free lists; logs the first inconsistency.
    #[must_use]
    pub fn validate(&self) -> bool {
        match self.check() {
            Ok(()) => true,
            Err(reason) => {
                error!(base = self.base_address(), %reason, "memory block failed validation");
                false
            }
        }
    }

    /// Like [`Self::validate`] but returns the first inconsistency found.
    ///
    /// # Errors
    ///
    /// A description of the first broken invariant.
    pub fn check(&self) -> Result<(), String> {
        let terminal = self.capacity - 1;

        match self.read_header(0) {
            Some(h) if h.status == SlotStatus::Sentinel && h.next as usize == FIRST_SLOT => {}
            other => return Err(format!("bad leading sentinel {other:?}")),
        }

        let mut walked_free = Vec::new();
        let mut free_units = 0;
        let mut allocated_units = 0;
        let mut allocation_count = 0;
        let mut previous_units = FIRST_SLOT;
        let mut previous_free = false;
        let mut index = FIRST_SLOT;

        while index < terminal {
            let h = self
                .read_header(index)
                .ok_or_else(|| format!("undecodable header at unit {index}"))?;
            if h.previous as usize != previous_units {
                return Err(format!(
                    "slot {index} points back {} units, previous slot spans {previous_units}",
                    h.previous
                ));
            }
            let units = h.next as usize;
            if units < MIN_SLOT_UNITS {
                return Err(format!("slot {index} spans only {units} units"));
            }
            match h.status {
                SlotStatus::Free => {
                    if previous_free {
                        return Err(format!("free slot {index} follows another free slot"));
                    }
                    walked_free.push(index);
                    free_units += units;
                    previous_free = true;
                }
                SlotStatus::Allocated => {
                    allocated_units += units;
                    allocation_count += 1;
                    previous_free = false;
                }
                SlotStatus::Sentinel => {
                    return Err(format!("sentinel inside the block at unit {index}"));
                }
            }
            previous_units = units;
            index += units;
        }

        if index != terminal {
            return Err(format!("boundary walk overran the terminal sentinel at {index}"));
        }
        match self.read_header(terminal) {
            Some(h) if h.status == SlotStatus::Sentinel && h.previous as usize == previous_units => {}
            other => return Err(format!("bad terminal sentinel {other:?}")),
        }

        if free_units + allocated_units + FIXED_OVERHEAD_UNITS != self.capacity {
            return Err(format!(
                "slots cover {} units, capacity is {}",
                free_units + allocated_units + FIXED_OVERHEAD_UNITS,
                self.capacity
            ));
        }
        if free_units != self.free_units
            || allocated_units != self.allocated_units
            || allocation_count != self.allocation_count
        {
            return Err(format!(
                "counters drifted: free {}/{free_units}, allocated {}/{allocated_units}, count {}/{allocation_count}",
                self.free_units, self.allocated_units, self.allocation_count
            ));
        }

        let mut listed = HashSet::new();
        for (class, list) in self.free_lists.iter().enumerate() {
            let mut count = 0;
            let mut previous = 0;
            let mut index = list.head as usize;
            while index != 0 {
                if walked_free.binary_search(&index).is_err() {
                    return Err(format!("class {class} lists {index}, which is not a free slot"));
                }
                if !listed.insert(index) {
                    return Err(format!("free slot {index} is listed twice"));
                }
                let units = self.read_header(index).map_or(0, |h| h.next as usize);
                if class_of(units) != class {
                    return Err(format!("slot {index} of {units} units sits in class {class}"));
                }
                let link = self.read_link(index);
                if link.previous as usize != previous {
                    return Err(format!("slot {index} links back to {}, expected {previous}", link.previous));
                }
                count += 1;
                previous = index;
                index = link.next as usize;
            }
            if count != list.count as usize {
                return Err(format!("class {class} holds {count} slots, recorded {}", list.count));
            }
            let bit = self.occupied[class / 64] & (1 << (class % 64)) != 0;
            if bit != (count > 0) {
                return Err(format!("occupancy bit of class {class} is stale"));
            }
        }
        if listed.len() != walked_free.len() {
            return Err(format!(
                "{} free slots in the block, {} on free lists",
                walked_free.len(),
                listed.len()
            ));
        }

        Ok(())
    }

    /// Dumps every slot of the block.
    ///
    /// # Errors
    ///
    /// Propagates write errors from `out`.
    pub fn report(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "  block {:#x}: {} bytes, unit {}, {} units, {} allocations, {} bytes free",
            self.base_address(),
            self.block_size,
            self.unit,
            self.capacity,
            self.allocation_count,
            self.available_size()
        )?;
        let terminal = self.capacity - 1;
        let mut index = FIRST_SLOT;
        while index < terminal {
            let Some(h) = self.read_header(index) else {
                return writeln!(out, "    [{index:>8}] <corrupt header>");
            };
            let status = match h.status {
                SlotStatus::Free => "free",
                SlotStatus::Allocated => "allocated",
                SlotStatus::Sentinel => "sentinel",
            };
            writeln!(out, "    [{index:>8}] {status:<9} {:>8} units (prev {})", h.next, h.previous)?;
            if h.next == 0 {
                break;
            }
            index += h.next as usize;
        }
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    #[inline]
    const fn max_slot_units(&self) -> usize {
        self.capacity - FIXED_OVERHEAD_UNITS
    }

    /// Slot units (header included) for a `size`-byte payload.
    fn slot_units_for(&self, size: usize) -> Option<usize> {
        let units = payload_units(size, self.unit) + 1;
        (units <= self.max_slot_units()).then_some(units)
    }

    /// Whether a free of `size` bytes is consistent with a slot of `slot_units`.
    fn size_matches(&self, size: usize, slot_units: usize) -> bool {
        let needed = payload_units(size, self.unit) + 1;
        needed <= slot_units && slot_units - needed < MIN_SLOT_UNITS
    }

    /// Whether `slot` at `index` is stitched into the boundary chain: its
    /// neighbours' offsets point back at it and it ends before the terminal
    /// sentinel. Payload bytes that merely decode as a header fail this.
    fn is_linked_slot(&self, index: usize, slot: SlotHeader) -> bool {
        let units = slot.next as usize;
        let back = slot.previous as usize;
        if units < MIN_SLOT_UNITS || index + units > self.capacity - 1 {
            return false;
        }
        if back == 0 || back > index {
            return false;
        }
        let before = self.read_header(index - back).is_some_and(|h| h.next as usize == back);
        let after = self.read_header(index + units).is_some_and(|h| h.previous as usize == units);
        before && after
    }

    /// Header index of the slot whose payload starts at `ptr`.
    fn slot_index(&self, ptr: *const u8) -> Option<usize> {
        if !self.within(ptr) {
            return None;
        }
        let offset = ptr as usize - self.base_address();
        if offset % self.unit != 0 {
            return None;
        }
        let index = (offset / self.unit).checked_sub(1)?;
        (index >= FIRST_SLOT && index < self.capacity - 1).then_some(index)
    }

    /// Picks the free slot for a request of `units`.
    ///
    /// Takes the head of the first non-empty class that guarantees room.
    /// When every such class is empty, falls back to scanning the class
    /// `units` itself falls into, whose members may or may not be big enough.
    fn find_slot(&self, units: usize) -> Option<usize> {
        let request = class_for_request(units);
        if let Some(class) = self.first_occupied_class(request) {
            return Some(self.free_lists[class].head as usize);
        }
        let partial = class_of(units);
        if partial == request {
            return None;
        }
        let mut index = self.free_lists.get(partial)?.head as usize;
        while index != 0 {
            if self.read_header(index)?.next as usize >= units {
                return Some(index);
            }
            index = self.read_link(index).next as usize;
        }
        None
    }

    fn first_occupied_class(&self, from: usize) -> Option<usize> {
        let mut word_index = from / 64;
        let mut word = *self.occupied.get(word_index)? & (u64::MAX << (from % 64));
        loop {
            if word != 0 {
                return Some(word_index * 64 + word.trailing_zeros() as usize);
            }
            word_index += 1;
            word = *self.occupied.get(word_index)?;
        }
    }

    fn link(&mut self, index: usize, units: usize) {
        let class = class_of(units);
        let head = self.free_lists[class].head;
        self.write_link(index, FreeLink { previous: 0, next: head });
        if head != 0 {
            let mut next = self.read_link(head as usize);
            next.previous = index as u32;
            self.write_link(head as usize, next);
        }
        let list = &mut self.free_lists[class];
        list.head = index as u32;
        list.count += 1;
        self.occupied[class / 64] |= 1 << (class % 64);
    }

    fn unlink(&mut self, index: usize, units: usize) {
        let class = class_of(units);
        let link = self.read_link(index);
        if link.previous != 0 {
            let mut previous = self.read_link(link.previous as usize);
            previous.next = link.next;
            self.write_link(link.previous as usize, previous);
        } else {
            self.free_lists[class].head = link.next;
        }
        if link.next != 0 {
            let mut next = self.read_link(link.next as usize);
            next.previous = link.previous;
            self.write_link(link.next as usize, next);
        }
        let list = &mut self.free_lists[class];
        list.count -= 1;
        if list.head == 0 {
            self.occupied[class / 64] &= !(1 << (class % 64));
        }
    }

    fn set_previous(&mut self, index: usize, previous: usize) {
        if let Some(mut h) = self.read_header(index) {
            h.previous = previous as u32;
            self.write_header(index, h);
        }
    }

    #[inline]
    fn word(&self, index: usize) -> *mut u64 {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity keeps the offset inside the arena, and the
        // arena is aligned to `unit >= 8`.
        unsafe { self.base.as_ptr().add(index * self.unit).cast::<u64>() }
    }

    #[inline]
    fn read_header(&self, index: usize) -> Option<SlotHeader> {
        if index >= self.capacity {
            return None;
        }
        // SAFETY: in-bounds, aligned, initialised by a previous write or by
        // the caller's payload bytes (any u64 is a valid bit pattern).
        SlotHeader::decode(unsafe { self.word(index).read() })
    }

    #[inline]
    fn write_header(&mut self, index: usize, header: SlotHeader) {
        // SAFETY: see `word`.
        unsafe { self.word(index).write(header.encode()) };
    }

    #[inline]
    fn read_link(&self, index: usize) -> FreeLink {
        // SAFETY: free slots span at least two units, so index + 1 is inside
        // the slot.
        FreeLink::decode(unsafe { self.word(index + 1).read() })
    }

    #[inline]
    fn write_link(&mut self, index: usize, link: FreeLink) {
        // SAFETY: see `read_link`.
        unsafe { self.word(index + 1).write(link.encode()) };
    }

    #[inline]
    fn payload(&self, index: usize) -> NonNull<u8> {
        // SAFETY: a slot never ends past the terminal sentinel, so its first
        // payload unit is inside the arena and non-null.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add((index + 1) * self.unit)) }
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with exactly this size and alignment.
        unsafe { platform::deallocate(self.base, self.capacity * self.unit, self.unit) };
    }
}

impl fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("base", &format_args!("{:#x}", self.base_address()))
            .field("block_size", &self.block_size)
            .field("unit", &self.unit)
            .field("capacity", &self.capacity)
            .field("allocation_count", &self.allocation_count)
            .field("free_units", &self.free_units)
            .finish()
    }
}

/// Payload units for `size` bytes; zero-sized requests still take one unit.
#[inline]
fn payload_units(size: usize, unit: usize) -> usize {
    size.div_ceil(unit).max(1)
}

#[inline]
fn header(previous: usize, next: usize, status: SlotStatus) -> SlotHeader {
    SlotHeader {
        previous: previous as u32,
        next: next as u32,
        status,
    }
}
