//! # Scene Allocator
//!
//! Top-level dispatch: one block pool per affinity for small requests, the
//! platform (or a chained fallback allocator) for everything else.
//!
//! ## Locking
//!
//! ```text
//! pools[affinity]  Mutex<BlockPool>   one per affinity
//! blocks           Mutex<HashMap>     ptr -> owning block
//! large            Mutex<HashMap>     ptr -> size/alignment/source
//! ```
//!
//! Locks are never nested. Allocation takes the pool lock, releases it,
//! then records the pointer. Deallocation removes the record first, then
//! takes the pool lock, so a pointer can be freed at most once.

use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::affinity::Affinity;
use crate::config::{AllocatorConfig, MemoryTracking};
use crate::error::{AllocError, AllocResult};
use crate::platform::Allocation;
use crate::pool::BlockPool;
use crate::stats::AllocatorStats;
use crate::traits::MemoryAllocator;

/// Owner of a slab allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BlockHandle {
    affinity: Affinity,
    /// Base address of the owning block.
    base: usize,
}

/// Where a large allocation came from.
#[derive(Debug)]
enum LargeSource {
    /// Owned platform memory, freed when the record is dropped.
    Platform(Allocation),
    /// Borrowed from the fallback allocator; must be handed back.
    Fallback,
}

/// Record of an allocation that bypassed the slab path.
#[derive(Debug)]
struct LargeAllocation {
    size: usize,
    alignment: usize,
    affinity: Affinity,
    source: LargeSource,
}

/// Segregated-free-list slab allocator with per-affinity pools.
///
/// # Thread Safety
///
/// All operations take `&self`; each pool and each reverse map sits behind
/// its own mutex.
pub struct SceneAllocator {
    pools: Vec<Mutex<BlockPool>>,
    blocks: Mutex<HashMap<usize, BlockHandle>>,
    large: Mutex<HashMap<usize, LargeAllocation>>,
    fallback: Option<Arc<dyn MemoryAllocator>>,
    tracking: MemoryTracking,
}

impl SceneAllocator {
    /// Creates an allocator whose large requests go to the platform.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration fails validation.
    pub fn new(config: AllocatorConfig) -> AllocResult<Self> {
        config.validate()?;
        let pools = Affinity::ALL
            .into_iter()
            .map(|affinity| {
                BlockPool::new(affinity, config.pool(affinity), config.default_alignment)
                    .map(Mutex::new)
            })
            .collect::<AllocResult<Vec<_>>>()?;
        Ok(Self {
            pools,
            blocks: Mutex::new(HashMap::new()),
            large: Mutex::new(HashMap::new()),
            fallback: None,
            tracking: config.tracking,
        })
    }

    /// Creates an allocator that chains large requests to `fallback`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration fails validation.
    pub fn with_fallback(config: AllocatorConfig, fallback: Arc<dyn MemoryAllocator>) -> AllocResult<Self> {
        let mut allocator = Self::new(config)?;
        allocator.fallback = Some(fallback);
        Ok(allocator)
    }

    #[inline]
    fn pool(&self, affinity: Affinity) -> &Mutex<BlockPool> {
        &self.pools[affinity.index()]
    }

    /// Largest request the slab path serves for `affinity`.
    #[must_use]
    pub fn maximum_allocation_size(&self, affinity: Affinity) -> usize {
        self.pool(affinity).lock().maximum_allocation_size()
    }

    /// Payload alignment of the `affinity` pool.
    #[must_use]
    pub fn alignment(&self, affinity: Affinity) -> usize {
        self.pool(affinity).lock().alignment()
    }

    /// Runs `f` on the `affinity` pool with its lock held.
    pub fn inspect_pool<R>(&self, affinity: Affinity, f: impl FnOnce(&BlockPool) -> R) -> R {
        f(&self.pool(affinity).lock())
    }

    /// Allocates `size` bytes for an object of `affinity`.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when a new block or a large allocation cannot be
    /// obtained; errors from the fallback allocator are passed through.
    pub fn allocate(&self, size: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
        self.allocate_aligned(size, 1, affinity)
    }

    /// Allocates `size` bytes aligned to at least `alignment`.
    ///
    /// Requests the pool can satisfy take the slab path; alignments above
    /// the pool's go to the platform or the fallback allocator.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `alignment` is not a power of two, otherwise as
    /// [`Self::allocate`].
    pub fn allocate_aligned(&self, size: usize, alignment: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
        if !alignment.is_power_of_two() {
            return Err(AllocError::InvalidConfig(format!(
                "alignment {alignment} is not a power of two"
            )));
        }
        let (slab, alignment) = {
            let mut pool = self.pool(affinity).lock();
            let pool_alignment = pool.alignment();
            if size <= pool.maximum_allocation_size() && alignment <= pool_alignment {
                (Some(pool.allocate(size)?), pool_alignment)
            } else {
                (None, alignment.max(pool_alignment))
            }
        };

        let ptr = match slab {
            Some((ptr, base)) => {
                self.blocks
                    .lock()
                    .insert(ptr.as_ptr() as usize, BlockHandle { affinity, base });
                ptr
            }
            None => self.allocate_large(size, alignment, affinity)?,
        };

        self.after_action("allocate", affinity, ptr, size, slab.is_some());
        Ok(ptr)
    }

    fn allocate_large(&self, size: usize, alignment: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
        let (ptr, source) = match &self.fallback {
            Some(fallback) => (
                fallback.allocate_aligned(size, alignment, affinity)?,
                LargeSource::Fallback,
            ),
            None => {
                let allocation = Allocation::new(size, alignment)?;
                (allocation.ptr(), LargeSource::Platform(allocation))
            }
        };
        trace!(
            %affinity,
            address = ptr.as_ptr() as usize,
            size,
            fallback = matches!(source, LargeSource::Fallback),
            "large allocation"
        );
        self.large.lock().insert(
            ptr.as_ptr() as usize,
            LargeAllocation {
                size,
                alignment,
                affinity,
                source,
            },
        );
        Ok(ptr)
    }

    /// Frees `ptr`, routing through the reverse maps.
    ///
    /// The size recorded at allocation time wins over `size`.
    ///
    /// # Errors
    ///
    /// `InvalidFree` if neither map knows `ptr` (double free or foreign
    /// pointer); nothing is modified in that case.
    pub fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> AllocResult<()> {
        let address = ptr.as_ptr() as usize;

        let handle = self.blocks.lock().remove(&address);
        if let Some(handle) = handle {
            self.pool(handle.affinity)
                .lock()
                .deallocate(handle.base, ptr, size)?;
            self.after_action("deallocate", handle.affinity, ptr, size, true);
            return Ok(());
        }

        let large = self.large.lock().remove(&address);
        if let Some(large) = large {
            if large.size != size {
                let mismatch = AllocError::SizeMismatch {
                    address,
                    recorded: large.size,
                    supplied: size,
                };
                warn!(%mismatch, "using recorded allocation size");
            }
            if let LargeSource::Fallback = large.source {
                if let Some(fallback) = &self.fallback {
                    fallback.deallocate(ptr, large.size)?;
                }
            }
            self.after_action("deallocate", large.affinity, ptr, size, false);
            return Ok(());
        }

        warn!(address, size, "free of unknown pointer ignored");
        Err(AllocError::InvalidFree { address })
    }

    fn after_action(&self, action: &str, affinity: Affinity, ptr: NonNull<u8>, size: usize, slab: bool) {
        if self.tracking.report_actions {
            debug!(action, %affinity, address = ptr.as_ptr() as usize, size, slab, "memory action");
        }
        if self.tracking.check_actions && slab {
            if let Err(e) = self.pool(affinity).lock().validate() {
                error!(action, error = %e, "pool inconsistent after memory action");
            }
        }
    }

    /// Changes the arena size for future blocks of `affinity`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the size cannot hold a single slot.
    pub fn set_block_size(&self, affinity: Affinity, block_size: usize) -> AllocResult<()> {
        self.pool(affinity).lock().set_block_size(block_size)
    }

    /// Releases every block that holds no allocations.
    ///
    /// Each pool is locked for the full duration of its sweep. Returns the
    /// arena bytes given back to the platform.
    pub fn delete_empty_memory_blocks(&self) -> usize {
        let reclaimed = self
            .pools
            .iter()
            .map(|pool| pool.lock().delete_empty_memory_blocks())
            .sum();
        debug!(reclaimed, "empty memory blocks deleted");
        reclaimed
    }

    /// Validates every pool, holding each pool lock while it is checked.
    ///
    /// # Errors
    ///
    /// `ValidationFailure` naming the first inconsistent pool.
    pub fn validate(&self) -> AllocResult<()> {
        for pool in &self.pools {
            if let Err(e) = pool.lock().validate() {
                error!(error = %e, "allocator failed validation");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Snapshot of every pool plus the large allocations.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        let pools = self.pools.iter().map(|pool| pool.lock().stats()).collect();
        let large = self.large.lock();
        AllocatorStats {
            pools,
            large_allocation_count: large.len(),
            large_allocation_size: large.values().map(|l| l.size).sum(),
        }
    }

    /// Bytes in free slots across all pools.
    #[must_use]
    pub fn total_available_size(&self) -> usize {
        self.pools.iter().map(|pool| pool.lock().available_size()).sum()
    }

    /// Bytes handed out: allocated slots plus large allocations.
    #[must_use]
    pub fn total_reserved_size(&self) -> usize {
        let slab: usize = self.pools.iter().map(|pool| pool.lock().reserved_size()).sum();
        slab + self.large_size()
    }

    /// Bytes held: block payload areas plus large allocations.
    #[must_use]
    pub fn total_memory_size(&self) -> usize {
        let slab: usize = self.pools.iter().map(|pool| pool.lock().memory_size()).sum();
        slab + self.large_size()
    }

    fn large_size(&self) -> usize {
        self.large.lock().values().map(|l| l.size).sum()
    }

    /// Writes totals, every pool with its blocks, and the large allocations.
    ///
    /// # Errors
    ///
    /// Propagates write errors from `out`.
    pub fn report(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let stats = self.stats();
        writeln!(
            out,
            "scene allocator: {} bytes held, {} reserved, {} available, {} blocks",
            stats.memory_size(),
            stats.reserved_size(),
            stats.available_size(),
            stats.block_count()
        )?;
        for pool in &self.pools {
            pool.lock().report(out)?;
        }

        let large = self.large.lock();
        writeln!(
            out,
            "large allocations: {} ({} bytes)",
            large.len(),
            large.values().map(|l| l.size).sum::<usize>()
        )?;
        let mut entries: Vec<_> = large.iter().collect();
        entries.sort_unstable_by_key(|(address, _)| **address);
        for (address, l) in entries {
            let source = match l.source {
                LargeSource::Platform(_) => "platform",
                LargeSource::Fallback => "fallback",
            };
            writeln!(
                out,
                "  {address:#x}: {} bytes, alignment {}, {}, {source}",
                l.size, l.alignment, l.affinity
            )?;
        }
        Ok(())
    }
}

impl Drop for SceneAllocator {
    fn drop(&mut self) {
        let live = self.blocks.get_mut().len();
        if live > 0 {
            warn!(live, "scene allocator dropped with live slab allocations");
        }
        let Some(fallback) = &self.fallback else {
            return;
        };
        for (address, large) in self.large.get_mut().drain() {
            if let (LargeSource::Fallback, Some(ptr)) = (&large.source, NonNull::new(address as *mut u8)) {
                if let Err(e) = fallback.deallocate(ptr, large.size) {
                    warn!(address, error = %e, "fallback refused large allocation on drop");
                }
            }
        }
    }
}

impl fmt::Debug for SceneAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneAllocator")
            .field("pools", &self.pools.len())
            .field("live_slab", &self.blocks.lock().len())
            .field("live_large", &self.large.lock().len())
            .field("fallback", &self.fallback.is_some())
            .field("tracking", &self.tracking)
            .finish()
    }
}

impl MemoryAllocator for SceneAllocator {
    fn allocate(&self, size: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
        SceneAllocator::allocate(self, size, affinity)
    }

    fn allocate_aligned(&self, size: usize, alignment: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
        SceneAllocator::allocate_aligned(self, size, alignment, affinity)
    }

    fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> AllocResult<()> {
        SceneAllocator::deallocate(self, ptr, size)
    }

    fn set_block_size(&self, affinity: Affinity, block_size: usize) -> AllocResult<()> {
        SceneAllocator::set_block_size(self, affinity, block_size)
    }

    fn report(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        SceneAllocator::report(self, out)
    }

    fn total_available_size(&self) -> usize {
        SceneAllocator::total_available_size(self)
    }

    fn total_reserved_size(&self) -> usize {
        SceneAllocator::total_reserved_size(self)
    }

    fn total_memory_size(&self) -> usize {
        SceneAllocator::total_memory_size(self)
    }

    fn delete_empty_memory_blocks(&self) -> usize {
        SceneAllocator::delete_empty_memory_blocks(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::platform::SystemAllocator;

    fn small_config() -> AllocatorConfig {
        let mut config = AllocatorConfig::default();
        for affinity in Affinity::ALL {
            config = config.with_pool(affinity, PoolConfig::with_block_size(4096));
        }
        config
    }

    #[test]
    fn test_routes_by_size() {
        let allocator = SceneAllocator::new(small_config()).unwrap();
        let max = allocator.maximum_allocation_size(Affinity::Nodes);

        let small = allocator.allocate(64, Affinity::Nodes).unwrap();
        let large = allocator.allocate(max + 1, Affinity::Nodes).unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.large_allocation_count, 1);
        assert_eq!(stats.large_allocation_size, max + 1);
        assert_eq!(stats.pools[Affinity::Nodes.index()].allocation_count, 1);

        allocator.deallocate(small, 64).unwrap();
        allocator.deallocate(large, max + 1).unwrap();
        assert_eq!(allocator.total_reserved_size(), 0);
    }

    #[test]
    fn test_unknown_pointer_is_invalid_free() {
        let allocator = SceneAllocator::new(small_config()).unwrap();
        let mut local = 0_u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();
        assert_eq!(
            allocator.deallocate(foreign, 8),
            Err(AllocError::InvalidFree {
                address: foreign.as_ptr() as usize
            })
        );
        assert!(allocator.validate().is_ok());
    }

    #[test]
    fn test_double_free_of_large_allocation() {
        let allocator = SceneAllocator::new(small_config()).unwrap();
        let ptr = allocator.allocate(100_000, Affinity::Data).unwrap();
        allocator.deallocate(ptr, 100_000).unwrap();
        assert!(matches!(
            allocator.deallocate(ptr, 100_000),
            Err(AllocError::InvalidFree { .. })
        ));
    }

    #[test]
    fn test_fallback_serves_large_requests() {
        let system = Arc::new(SystemAllocator::new(8).unwrap());
        let allocator = SceneAllocator::with_fallback(small_config(), system.clone()).unwrap();

        let ptr = allocator.allocate(10_000, Affinity::Data).unwrap();
        assert_eq!(system.allocation_count(), 1);
        allocator.deallocate(ptr, 10_000).unwrap();
        assert_eq!(system.allocation_count(), 0);

        let _small = allocator.allocate(16, Affinity::Data).unwrap();
        assert_eq!(system.allocation_count(), 0);
    }

    #[test]
    fn test_fallback_keeps_pool_alignment() {
        let config = small_config().with_pool(
            Affinity::Data,
            PoolConfig {
                block_size: 64 * 1024,
                alignment: Some(4096),
                max_allocation_size: None,
            },
        );
        let system = Arc::new(SystemAllocator::new(8).unwrap());
        let allocator = SceneAllocator::with_fallback(config, system.clone()).unwrap();
        let max = allocator.maximum_allocation_size(Affinity::Data);

        let ptrs: Vec<_> = (0..16)
            .map(|i| {
                let size = max + 1 + i * 24;
                (allocator.allocate(size, Affinity::Data).unwrap(), size)
            })
            .collect();
        assert_eq!(system.allocation_count(), 16);
        for (ptr, _) in &ptrs {
            assert_eq!(ptr.as_ptr() as usize % 4096, 0);
        }
        let mut out = String::new();
        allocator.report(&mut out).unwrap();
        assert!(out.contains("alignment 4096, data, fallback"));

        for (ptr, size) in ptrs {
            allocator.deallocate(ptr, size).unwrap();
        }
        assert_eq!(system.allocation_count(), 0);
    }

    #[test]
    fn test_stronger_alignment_bypasses_slab() {
        let allocator = SceneAllocator::new(small_config()).unwrap();
        let ptr = allocator.allocate_aligned(64, 256, Affinity::Nodes).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 256, 0);
        let stats = allocator.stats();
        assert_eq!(stats.large_allocation_count, 1);
        assert_eq!(stats.block_count(), 0);

        let slab = allocator.allocate_aligned(64, 8, Affinity::Nodes).unwrap();
        assert_eq!(allocator.stats().block_count(), 1);
        assert!(matches!(
            allocator.allocate_aligned(64, 24, Affinity::Nodes),
            Err(AllocError::InvalidConfig(_))
        ));

        allocator.deallocate(ptr, 64).unwrap();
        allocator.deallocate(slab, 64).unwrap();
        assert_eq!(allocator.total_reserved_size(), 0);
    }

    #[test]
    fn test_unrepresentable_large_request_is_out_of_memory() {
        let allocator = SceneAllocator::new(small_config()).unwrap();
        assert_eq!(
            allocator.allocate(usize::MAX - 4, Affinity::Data).err(),
            Some(AllocError::OutOfMemory {
                size: usize::MAX - 4,
                alignment: 8
            })
        );
        assert_eq!(allocator.stats().large_allocation_count, 0);
    }

    #[test]
    fn test_large_free_with_wrong_size_uses_recorded_size() {
        let allocator = SceneAllocator::new(small_config()).unwrap();
        let ptr = allocator.allocate(10_000, Affinity::Data).unwrap();
        assert_eq!(allocator.total_reserved_size(), 10_000);
        assert_eq!(allocator.deallocate(ptr, 5), Ok(()));
        assert_eq!(allocator.total_reserved_size(), 0);
        assert_eq!(allocator.stats().large_allocation_count, 0);

        let system = Arc::new(SystemAllocator::new(8).unwrap());
        let chained = SceneAllocator::with_fallback(small_config(), system.clone()).unwrap();
        let ptr = chained.allocate(10_000, Affinity::Data).unwrap();
        assert_eq!(chained.deallocate(ptr, 12_345), Ok(()));
        assert_eq!(chained.total_reserved_size(), 0);
        assert_eq!(system.allocation_count(), 0);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_block_size_beyond_header_limit_is_rejected() {
        let allocator = SceneAllocator::new(small_config()).unwrap();
        assert!(matches!(
            allocator.set_block_size(Affinity::Objects, 1 << 35),
            Err(AllocError::BlockTooLarge { .. })
        ));
        // The pool keeps its previous size and stays usable.
        let ptr = allocator.allocate(8, Affinity::Objects).unwrap();
        allocator.deallocate(ptr, 8).unwrap();
    }

    #[test]
    fn test_drop_returns_fallback_memory() {
        let system = Arc::new(SystemAllocator::new(8).unwrap());
        {
            let allocator = SceneAllocator::with_fallback(small_config(), system.clone()).unwrap();
            allocator.allocate(50_000, Affinity::Objects).unwrap();
            allocator.allocate(60_000, Affinity::Commands).unwrap();
            assert_eq!(system.allocation_count(), 2);
        }
        assert_eq!(system.allocation_count(), 0);
    }

    #[test]
    fn test_checked_actions_keep_pools_valid() {
        let mut config = small_config();
        config.tracking = MemoryTracking {
            report_actions: true,
            check_actions: true,
        };
        let allocator = SceneAllocator::new(config).unwrap();
        let ptrs: Vec<_> = (1..20)
            .map(|i| (allocator.allocate(i * 24, Affinity::Objects).unwrap(), i * 24))
            .collect();
        for (ptr, size) in ptrs.into_iter().rev().step_by(2) {
            allocator.deallocate(ptr, size).unwrap();
        }
        assert!(allocator.validate().is_ok());
    }

    #[test]
    fn test_set_block_size_and_reclaim() {
        let allocator = SceneAllocator::new(small_config()).unwrap();
        allocator.set_block_size(Affinity::Commands, 8192).unwrap();
        assert!(allocator.maximum_allocation_size(Affinity::Commands) > 4096);
        assert!(allocator.set_block_size(Affinity::Commands, 16).is_err());

        let ptr = allocator.allocate(100, Affinity::Commands).unwrap();
        assert_eq!(allocator.delete_empty_memory_blocks(), 0);
        allocator.deallocate(ptr, 100).unwrap();
        assert_eq!(allocator.delete_empty_memory_blocks(), 8192);
        assert_eq!(allocator.total_memory_size(), 0);
    }

    #[test]
    fn test_report_lists_pools_and_large() {
        let allocator = SceneAllocator::new(small_config()).unwrap();
        allocator.allocate(32, Affinity::Nodes).unwrap();
        allocator.allocate(20_000, Affinity::Data).unwrap();
        let mut out = String::new();
        allocator.report(&mut out).unwrap();
        assert!(out.contains("pool nodes"));
        assert!(out.contains("large allocations: 1 (20000 bytes)"));
        assert!(out.contains("platform"));
    }

    #[test]
    fn test_usable_through_trait_object() {
        let allocator: Arc<dyn MemoryAllocator> = Arc::new(SceneAllocator::new(small_config()).unwrap());
        let ptr = allocator.allocate(48, Affinity::Objects).unwrap();
        assert!(allocator.total_reserved_size() > 0);
        allocator.deallocate(ptr, 48).unwrap();
        assert_eq!(allocator.total_available_size(), allocator.total_memory_size());
    }
}
