//! # Tracking Allocator
//!
//! Debug decorator that records every live allocation handed out by the
//! wrapped allocator, so leaks and bad frees can be reported by name.

use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::affinity::Affinity;
use crate::error::{AllocError, AllocResult};
use crate::traits::MemoryAllocator;

/// Most live allocations listed in a report.
const REPORT_LEAK_LIMIT: usize = 32;

/// One allocation that has not been freed yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveAllocation {
    /// Address returned to the caller.
    pub address: usize,
    /// Requested size in bytes.
    pub size: usize,
    /// Requested affinity.
    pub affinity: Affinity,
}

/// Counters kept by [`TrackingAllocator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackingCounters {
    /// Successful allocations.
    pub allocations: u64,
    /// Successful deallocations.
    pub deallocations: u64,
    /// Frees of pointers that were never handed out or already freed.
    pub invalid_frees: u64,
    /// Frees whose size disagreed with the allocation.
    pub size_mismatches: u64,
}

/// Wraps an allocator and records every allocation it serves.
pub struct TrackingAllocator<A> {
    inner: A,
    live: Mutex<HashMap<usize, LiveAllocation>>,
    allocations: AtomicU64,
    deallocations: AtomicU64,
    invalid_frees: AtomicU64,
    size_mismatches: AtomicU64,
}

impl<A: MemoryAllocator> TrackingAllocator<A> {
    /// Wraps `inner`.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            live: Mutex::new(HashMap::new()),
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            invalid_frees: AtomicU64::new(0),
            size_mismatches: AtomicU64::new(0),
        }
    }

    /// The wrapped allocator.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Unwraps the decorator.
    pub fn into_inner(self) -> A {
        self.inner
    }

    fn record(&self, ptr: NonNull<u8>, size: usize, affinity: Affinity) {
        let address = ptr.as_ptr() as usize;
        self.live.lock().insert(
            address,
            LiveAllocation {
                address,
                size,
                affinity,
            },
        );
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Allocations not yet freed, in address order.
    #[must_use]
    pub fn live_allocations(&self) -> Vec<LiveAllocation> {
        let mut live: Vec<_> = self.live.lock().values().copied().collect();
        live.sort_unstable_by_key(|l| l.address);
        live
    }

    /// Number of allocations not yet freed.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn counters(&self) -> TrackingCounters {
        TrackingCounters {
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            invalid_frees: self.invalid_frees.load(Ordering::Relaxed),
            size_mismatches: self.size_mismatches.load(Ordering::Relaxed),
        }
    }
}

impl<A: MemoryAllocator> MemoryAllocator for TrackingAllocator<A> {
    fn allocate(&self, size: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
        let ptr = self.inner.allocate(size, affinity)?;
        self.record(ptr, size, affinity);
        Ok(ptr)
    }

    fn allocate_aligned(&self, size: usize, alignment: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
        let ptr = self.inner.allocate_aligned(size, alignment, affinity)?;
        self.record(ptr, size, affinity);
        Ok(ptr)
    }

    fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> AllocResult<()> {
        let address = ptr.as_ptr() as usize;
        let Some(record) = self.live.lock().remove(&address) else {
            self.invalid_frees.fetch_add(1, Ordering::Relaxed);
            warn!(address, size, "tracking: free of pointer that is not live");
            return Err(AllocError::InvalidFree { address });
        };
        if record.size != size {
            self.size_mismatches.fetch_add(1, Ordering::Relaxed);
            warn!(
                address,
                recorded = record.size,
                supplied = size,
                affinity = %record.affinity,
                "tracking: size mismatch on free"
            );
        }
        if let Err(e) = self.inner.deallocate(ptr, record.size) {
            // Still live as far as anyone can tell; keep it in leak reports.
            self.live.lock().insert(address, record);
            return Err(e);
        }
        self.deallocations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn set_block_size(&self, affinity: Affinity, block_size: usize) -> AllocResult<()> {
        self.inner.set_block_size(affinity, block_size)
    }

    fn report(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.inner.report(out)?;
        let counters = self.counters();
        let live = self.live_allocations();
        writeln!(
            out,
            "tracking: {} allocations, {} deallocations, {} invalid frees, {} size mismatches",
            counters.allocations, counters.deallocations, counters.invalid_frees, counters.size_mismatches
        )?;
        writeln!(out, "leaks: {}", live.len())?;
        for l in live.iter().take(REPORT_LEAK_LIMIT) {
            writeln!(out, "  {:#x}: {} bytes, {}", l.address, l.size, l.affinity)?;
        }
        if live.len() > REPORT_LEAK_LIMIT {
            writeln!(out, "  ... {} more", live.len() - REPORT_LEAK_LIMIT)?;
        }
        Ok(())
    }

    fn total_available_size(&self) -> usize {
        self.inner.total_available_size()
    }

    fn total_reserved_size(&self) -> usize {
        self.inner.total_reserved_size()
    }

    fn total_memory_size(&self) -> usize {
        self.inner.total_memory_size()
    }

    fn delete_empty_memory_blocks(&self) -> usize {
        self.inner.delete_empty_memory_blocks()
    }
}

impl<A> fmt::Debug for TrackingAllocator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingAllocator")
            .field("live", &self.live.lock().len())
            .field("allocations", &self.allocations.load(Ordering::Relaxed))
            .field("deallocations", &self.deallocations.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
