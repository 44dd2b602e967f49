//! # Platform Memory
//!
//! Thin wrapper over the process allocator for block arenas and large
//! allocations that bypass the slab path.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;

use parking_lot::Mutex;
use tracing::warn;

use crate::affinity::Affinity;
use crate::error::{AllocError, AllocResult};
use crate::traits::MemoryAllocator;

/// Builds the layout for a platform allocation.
///
/// Zero-sized requests are rounded up to one byte so every returned pointer
/// is unique and freeable.
///
/// # Errors
///
/// `InvalidConfig` if `alignment` is not a power of two, `OutOfMemory` if
/// the size overflows the address space once padded to `alignment`.
pub fn layout_for(size: usize, alignment: usize) -> AllocResult<Layout> {
    if !alignment.is_power_of_two() {
        return Err(AllocError::InvalidConfig(format!(
            "alignment {alignment} is not a power of two"
        )));
    }
    Layout::from_size_align(size.max(1), alignment)
        .map_err(|_| AllocError::OutOfMemory { size, alignment })
}

/// Allocates `size` bytes aligned to `alignment` from the platform.
///
/// # Errors
///
/// `OutOfMemory` when the platform allocator returns null or the size cannot
/// be represented, `InvalidConfig` when `alignment` is not a power of two.
pub fn allocate(size: usize, alignment: usize) -> AllocResult<NonNull<u8>> {
    let layout = layout_for(size, alignment)?;
    // SAFETY: layout has a non-zero size.
    let ptr = unsafe { alloc::alloc(layout) };
    NonNull::new(ptr).ok_or(AllocError::OutOfMemory { size, alignment })
}

/// Returns memory obtained from [`allocate`].
///
/// # Safety
///
/// `ptr` must come from [`allocate`] with the same `size` and `alignment`,
/// and must not be used afterwards.
pub unsafe fn deallocate(ptr: NonNull<u8>, size: usize, alignment: usize) {
    if let Ok(layout) = layout_for(size, alignment) {
        // SAFETY: caller guarantees ptr was allocated with this layout.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// Platform memory owned by value; freed on drop.
pub struct Allocation {
    ptr: NonNull<u8>,
    size: usize,
    alignment: usize,
}

// SAFETY: the allocation is plain bytes exclusively owned by this value.
unsafe impl Send for Allocation {}

impl Allocation {
    /// Allocates `size` bytes aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// See [`allocate`].
    pub fn new(size: usize, alignment: usize) -> AllocResult<Self> {
        let ptr = allocate(size, alignment)?;
        Ok(Self {
            ptr,
            size,
            alignment,
        })
    }

    /// Start of the allocation.
    #[inline]
    #[must_use]
    pub const fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Requested size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Alignment in bytes.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        // SAFETY: ptr came from `allocate` with exactly this size and alignment.
        unsafe { deallocate(self.ptr, self.size, self.alignment) };
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("address", &(self.ptr.as_ptr() as usize))
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .finish()
    }
}

/// [`MemoryAllocator`] that sends every request straight to the platform.
///
/// Useful as a fallback for a [`crate::SceneAllocator`] and as a baseline
/// in benchmarks. Affinity is ignored.
#[derive(Debug)]
pub struct SystemAllocator {
    alignment: usize,
    live: Mutex<HashMap<usize, Allocation>>,
}

impl SystemAllocator {
    /// Creates an allocator aligning every request to `alignment`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `alignment` is not a power of two.
    pub fn new(alignment: usize) -> AllocResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(AllocError::InvalidConfig(format!(
                "alignment {alignment} is not a power of two"
            )));
        }
        Ok(Self {
            alignment,
            live: Mutex::new(HashMap::new()),
        })
    }

    /// Live allocations.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.live.lock().len()
    }
}

impl MemoryAllocator for SystemAllocator {
    fn allocate(&self, size: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
        self.allocate_aligned(size, self.alignment, affinity)
    }

    fn allocate_aligned(&self, size: usize, alignment: usize, _affinity: Affinity) -> AllocResult<NonNull<u8>> {
        let allocation = Allocation::new(size, alignment.max(self.alignment))?;
        let ptr = allocation.ptr();
        self.live.lock().insert(ptr.as_ptr() as usize, allocation);
        Ok(ptr)
    }

    fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> AllocResult<()> {
        let address = ptr.as_ptr() as usize;
        let allocation = self
            .live
            .lock()
            .remove(&address)
            .ok_or(AllocError::InvalidFree { address })?;
        if allocation.size() != size {
            let mismatch = AllocError::SizeMismatch {
                address,
                recorded: allocation.size(),
                supplied: size,
            };
            warn!(%mismatch, "using recorded allocation size");
        }
        Ok(())
    }

    fn set_block_size(&self, _affinity: Affinity, _block_size: usize) -> AllocResult<()> {
        Ok(())
    }

    fn report(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let live = self.live.lock();
        writeln!(
            out,
            "system allocator: {} allocations, {} bytes",
            live.len(),
            live.values().map(Allocation::size).sum::<usize>()
        )
    }

    fn total_available_size(&self) -> usize {
        0
    }

    fn total_reserved_size(&self) -> usize {
        self.live.lock().values().map(Allocation::size).sum()
    }

    fn total_memory_size(&self) -> usize {
        self.total_reserved_size()
    }

    fn delete_empty_memory_blocks(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_aligned() {
        for alignment in [1, 8, 64, 4096] {
            let ptr = allocate(100, alignment).unwrap();
            assert_eq!(ptr.as_ptr() as usize % alignment, 0);
            unsafe { deallocate(ptr, 100, alignment) };
        }
    }

    #[test]
    fn test_zero_size_is_freeable() {
        let ptr = allocate(0, 8).unwrap();
        unsafe { deallocate(ptr, 0, 8) };
    }

    #[test]
    fn test_bad_alignment_is_config_error() {
        assert!(matches!(allocate(16, 3), Err(AllocError::InvalidConfig(_))));
        assert!(SystemAllocator::new(24).is_err());
    }

    #[test]
    fn test_system_allocator_tracks_live_memory() {
        let system = SystemAllocator::new(16).unwrap();
        let a = system.allocate(100, Affinity::Data).unwrap();
        let b = system.allocate(50, Affinity::Nodes).unwrap();
        assert_eq!(a.as_ptr() as usize % 16, 0);
        assert_eq!(system.total_reserved_size(), 150);

        system.deallocate(a, 100).unwrap();
        assert!(matches!(
            system.deallocate(a, 100),
            Err(AllocError::InvalidFree { .. })
        ));
        // Recorded size wins.
        system.deallocate(b, 7).unwrap();
        assert_eq!(system.allocation_count(), 0);
        assert_eq!(system.total_memory_size(), 0);
    }

    #[test]
    fn test_system_allocator_honours_stronger_alignment() {
        let system = SystemAllocator::new(8).unwrap();
        let ptrs: Vec<_> = (0..8)
            .map(|i| system.allocate_aligned(100 + i * 24, 4096, Affinity::Data).unwrap())
            .collect();
        for (i, ptr) in ptrs.into_iter().enumerate() {
            assert_eq!(ptr.as_ptr() as usize % 4096, 0);
            system.deallocate(ptr, 100 + i * 24).unwrap();
        }
        // Weaker requests still get the allocator's own alignment.
        let ptr = system.allocate_aligned(10, 1, Affinity::Data).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 8, 0);
        system.deallocate(ptr, 10).unwrap();
    }

    #[test]
    fn test_unrepresentable_size_is_out_of_memory() {
        assert_eq!(
            allocate(usize::MAX - 4, 8).err(),
            Some(AllocError::OutOfMemory {
                size: usize::MAX - 4,
                alignment: 8
            })
        );
        assert!(matches!(
            Allocation::new(usize::MAX - 4, 64),
            Err(AllocError::OutOfMemory { .. })
        ));
    }
}
