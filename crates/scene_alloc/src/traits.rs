//! # Allocator Interface
//!
//! The operations the engine consumes, as a trait so that the slab
//! allocator, the tracking decorator and platform-backed allocators can be
//! chained into one another and installed behind a single handle.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::affinity::Affinity;
use crate::error::AllocResult;

/// A thread-safe memory allocator keyed by affinity.
pub trait MemoryAllocator: Send + Sync {
    /// Allocates `size` bytes for an object of the given affinity.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when no memory can be obtained.
    fn allocate(&self, size: usize, affinity: Affinity) -> AllocResult<NonNull<u8>>;

    /// Like [`Self::allocate`], but the pointer is aligned to at least
    /// `alignment` bytes (a power of two).
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when no memory can be obtained, `InvalidConfig` for an
    /// alignment that is not a power of two.
    fn allocate_aligned(&self, size: usize, alignment: usize, affinity: Affinity) -> AllocResult<NonNull<u8>>;

    /// Frees memory returned by [`Self::allocate`] or [`Self::allocate_aligned`].
    ///
    /// # Errors
    ///
    /// `InvalidFree` for pointers this allocator does not track; the call
    /// is then a no-op.
    fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> AllocResult<()>;

    /// Sets the arena size for future blocks of one affinity.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the size cannot hold a single slot.
    fn set_block_size(&self, affinity: Affinity, block_size: usize) -> AllocResult<()>;

    /// Writes a human-readable dump of the allocator state.
    ///
    /// # Errors
    ///
    /// Propagates write errors from `out`.
    fn report(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Bytes free for new allocations without growing.
    fn total_available_size(&self) -> usize;

    /// Bytes currently handed out, overhead included.
    fn total_reserved_size(&self) -> usize;

    /// Bytes held from the platform.
    fn total_memory_size(&self) -> usize;

    /// Returns unused arenas to the platform; yields the bytes released.
    fn delete_empty_memory_blocks(&self) -> usize;
}

impl<A: MemoryAllocator + ?Sized> MemoryAllocator for Arc<A> {
    fn allocate(&self, size: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
        (**self).allocate(size, affinity)
    }

    fn allocate_aligned(&self, size: usize, alignment: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
        (**self).allocate_aligned(size, alignment, affinity)
    }

    fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> AllocResult<()> {
        (**self).deallocate(ptr, size)
    }

    fn set_block_size(&self, affinity: Affinity, block_size: usize) -> AllocResult<()> {
        (**self).set_block_size(affinity, block_size)
    }

    fn report(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        (**self).report(out)
    }

    fn total_available_size(&self) -> usize {
        (**self).total_available_size()
    }

    fn total_reserved_size(&self) -> usize {
        (**self).total_reserved_size()
    }

    fn total_memory_size(&self) -> usize {
        (**self).total_memory_size()
    }

    fn delete_empty_memory_blocks(&self) -> usize {
        (**self).delete_empty_memory_blocks()
    }
}
