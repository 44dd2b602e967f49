//! # Block Pool
//!
//! Growable set of memory blocks that share one affinity's configuration.
//!
//! Blocks are keyed by arena base address, which is also the identity the
//! allocator's reverse map stores for every live allocation.

use std::collections::BTreeMap;
use std::fmt;
use std::ptr::NonNull;

use tracing::debug;

use crate::affinity::Affinity;
use crate::block::MemoryBlock;
use crate::config::PoolConfig;
use crate::error::{AllocError, AllocResult};
use crate::stats::PoolStats;

/// All memory blocks of one affinity.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. The allocator keeps one pool per affinity
/// behind its own mutex.
pub struct BlockPool {
    /// Affinity served by this pool.
    affinity: Affinity,
    /// Arena size for future blocks.
    block_size: usize,
    /// Payload alignment.
    alignment: usize,
    /// Explicit slab-path limit, if configured.
    max_allocation_size: Option<usize>,
    /// Blocks keyed by base address.
    blocks: BTreeMap<usize, MemoryBlock>,
    /// Base of the block that served the last request.
    cached: Option<usize>,
}

impl BlockPool {
    /// Creates an empty pool; no arena is reserved until the first request.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the alignment is not a power of two or the block
    /// size cannot hold a single slot, `BlockTooLarge` if slot headers
    /// cannot address a block of that size.
    pub fn new(affinity: Affinity, config: PoolConfig, default_alignment: usize) -> AllocResult<Self> {
        let alignment = config.alignment.unwrap_or(default_alignment);
        MemoryBlock::check_geometry(config.block_size, alignment)?;
        let pool = Self {
            affinity,
            block_size: config.block_size,
            alignment,
            max_allocation_size: config.max_allocation_size,
            blocks: BTreeMap::new(),
            cached: None,
        };
        if pool.maximum_allocation_size() == 0 {
            return Err(AllocError::InvalidConfig(format!(
                "{affinity} block size {} is too small",
                config.block_size
            )));
        }
        Ok(pool)
    }

    /// Affinity served by this pool.
    #[inline]
    #[must_use]
    pub const fn affinity(&self) -> Affinity {
        self.affinity
    }

    /// Arena size used for future blocks.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Payload alignment.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Number of blocks currently held.
    #[inline]
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Iterates over the blocks in address order.
    pub fn blocks(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks.values()
    }

    /// Block with the given base address.
    #[must_use]
    pub fn block(&self, base: usize) -> Option<&MemoryBlock> {
        self.blocks.get(&base)
    }

    /// Largest request this pool serves; anything bigger goes to the
    /// platform allocator.
    #[must_use]
    pub fn maximum_allocation_size(&self) -> usize {
        let limit = MemoryBlock::maximum_allocation_size_for(usize::MAX, self.alignment);
        let per_block = MemoryBlock::maximum_allocation_size_for(self.block_size, self.alignment);
        self.max_allocation_size.unwrap_or(per_block).min(limit)
    }

    /// Changes the arena size of blocks created from now on.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if a block of that size could not hold a single slot,
    /// `BlockTooLarge` if slot headers cannot address it. The current size
    /// is kept on error.
    pub fn set_block_size(&mut self, block_size: usize) -> AllocResult<()> {
        MemoryBlock::check_geometry(block_size, self.alignment)?;
        debug!(affinity = %self.affinity, old = self.block_size, new = block_size, "block size changed");
        self.block_size = block_size;
        Ok(())
    }

    /// Allocates `size` bytes, returning the pointer and the base address of
    /// the block that served it.
    ///
    /// Tries the cached block, then every block, then grows the pool.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if a new block is needed and the platform refuses it.
    pub fn allocate(&mut self, size: usize) -> AllocResult<(NonNull<u8>, usize)> {
        if let Some(base) = self.cached {
            if let Some(ptr) = self.blocks.get_mut(&base).and_then(|b| b.allocate(size)) {
                return Ok((ptr, base));
            }
        }

        let found = self
            .blocks
            .iter()
            .find(|(&base, block)| Some(base) != self.cached && block.free_slots_available(size))
            .map(|(&base, _)| base);
        if let Some(base) = found {
            if let Some(ptr) = self.blocks.get_mut(&base).and_then(|b| b.allocate(size)) {
                self.cached = Some(base);
                return Ok((ptr, base));
            }
        }

        let block_size = self
            .block_size
            .max(MemoryBlock::minimum_block_size_for(size, self.alignment));
        let mut block = MemoryBlock::new(block_size, self.alignment)?;
        let ptr = block.allocate(size).ok_or(AllocError::OutOfMemory {
            size,
            alignment: self.alignment,
        })?;
        let base = block.base_address();
        debug!(
            affinity = %self.affinity,
            base,
            block_size,
            blocks = self.blocks.len() + 1,
            "memory block created"
        );
        self.blocks.insert(base, block);
        self.cached = Some(base);
        Ok((ptr, base))
    }

    /// Frees `ptr` inside the block at `base`.
    ///
    /// # Errors
    ///
    /// `InvalidFree` if no such block exists or the block rejects `ptr`.
    pub fn deallocate(&mut self, base: usize, ptr: NonNull<u8>, size: usize) -> AllocResult<usize> {
        let block = self.blocks.get_mut(&base).ok_or(AllocError::InvalidFree {
            address: ptr.as_ptr() as usize,
        })?;
        block.deallocate(ptr, size)
    }

    /// Releases every block that is one free slot spanning its arena.
    ///
    /// Returns the number of arena bytes given back to the platform.
    pub fn delete_empty_memory_blocks(&mut self) -> usize {
        let mut reclaimed = 0;
        let affinity = self.affinity;
        self.blocks.retain(|&base, block| {
            if block.is_empty() {
                reclaimed += block.capacity() * block.unit();
                debug!(%affinity, base, "memory block released");
                false
            } else {
                true
            }
        });
        if self.cached.is_some_and(|base| !self.blocks.contains_key(&base)) {
            self.cached = None;
        }
        reclaimed
    }

    /// Validates every block.
    ///
    /// # Errors
    ///
    /// `ValidationFailure` with the first inconsistency found.
    pub fn validate(&self) -> AllocResult<()> {
        for (base, block) in &self.blocks {
            block.check().map_err(|reason| AllocError::ValidationFailure {
                affinity: self.affinity,
                reason: format!("block {base:#x}: {reason}"),
            })?;
        }
        Ok(())
    }

    /// Bytes in free slots across all blocks.
    #[must_use]
    pub fn available_size(&self) -> usize {
        self.blocks.values().map(MemoryBlock::available_size).sum()
    }

    /// Bytes in allocated slots across all blocks.
    #[must_use]
    pub fn reserved_size(&self) -> usize {
        self.blocks.values().map(MemoryBlock::reserved_size).sum()
    }

    /// Usable bytes across all blocks.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.blocks.values().map(MemoryBlock::memory_size).sum()
    }

    /// Snapshot of this pool's accounting.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            affinity: self.affinity,
            block_size: self.block_size,
            alignment: self.alignment,
            block_count: self.blocks.len(),
            allocation_count: self.blocks.values().map(MemoryBlock::allocation_count).sum(),
            memory_size: self.memory_size(),
            available_size: self.available_size(),
            reserved_size: self.reserved_size(),
        }
    }

    /// Writes a summary line plus every block's slot dump.
    ///
    /// # Errors
    ///
    /// Propagates write errors from `out`.
    pub fn report(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "pool {}: {} blocks of {} bytes, alignment {}, max allocation {}",
            self.affinity,
            self.blocks.len(),
            self.block_size,
            self.alignment,
            self.maximum_allocation_size()
        )?;
        for block in self.blocks.values() {
            block.report(out)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("affinity", &self.affinity)
            .field("block_size", &self.block_size)
            .field("alignment", &self.alignment)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MAX_BLOCK_UNITS;

    fn pool(block_size: usize) -> BlockPool {
        BlockPool::new(Affinity::Objects, PoolConfig::with_block_size(block_size), 8).unwrap()
    }

    #[test]
    fn test_first_allocation_creates_block() {
        let mut pool = pool(4096);
        assert_eq!(pool.block_count(), 0);
        let (ptr, base) = pool.allocate(32).unwrap();
        assert_eq!(pool.block_count(), 1);
        assert!(pool.block(base).unwrap().within(ptr.as_ptr()));
    }

    #[test]
    fn test_grows_when_full() {
        let mut pool = pool(4096);
        let max = pool.maximum_allocation_size();
        let (_, first) = pool.allocate(max).unwrap();
        let (_, second) = pool.allocate(64).unwrap();
        assert_ne!(first, second);
        assert_eq!(pool.block_count(), 2);
    }

    #[test]
    fn test_reuses_room_in_older_blocks() {
        let mut pool = pool(4096);
        let (a, first) = pool.allocate(2000).unwrap();
        let (_, second) = pool.allocate(3000).unwrap();
        assert_ne!(first, second);
        pool.deallocate(first, a, 2000).unwrap();
        // The cached block is full; the scan must find the first one again.
        let (_, third) = pool.allocate(2000).unwrap();
        assert_eq!(third, first);
        assert_eq!(pool.block_count(), 2);
    }

    #[test]
    fn test_oversized_limit_creates_bigger_block() {
        let config = PoolConfig {
            block_size: 4096,
            alignment: None,
            max_allocation_size: Some(64 * 1024),
        };
        let mut pool = BlockPool::new(Affinity::Data, config, 8).unwrap();
        assert_eq!(pool.maximum_allocation_size(), 64 * 1024);
        let (_, base) = pool.allocate(64 * 1024).unwrap();
        assert!(pool.block(base).unwrap().block_size() > 64 * 1024);
    }

    #[test]
    fn test_set_block_size_affects_new_blocks_only() {
        let mut pool = pool(4096);
        let (_, first) = pool.allocate(16).unwrap();
        pool.set_block_size(8192).unwrap();
        assert_eq!(pool.block(first).unwrap().block_size(), 4096);
        let max = pool.maximum_allocation_size();
        let (_, second) = pool.allocate(max).unwrap();
        assert_eq!(pool.block(second).unwrap().block_size(), 8192);
        assert!(pool.set_block_size(8).is_err());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_rejects_block_size_headers_cannot_address() {
        let mut pool = pool(4096);
        assert_eq!(
            pool.set_block_size(1 << 35),
            Err(AllocError::BlockTooLarge {
                units: (1 << 35) / 8,
                limit: MAX_BLOCK_UNITS,
            })
        );
        assert_eq!(pool.block_size(), 4096);
        assert!(pool.allocate(8).is_ok());

        let config = PoolConfig::with_block_size(1 << 35);
        assert!(matches!(
            BlockPool::new(Affinity::Data, config, 8),
            Err(AllocError::BlockTooLarge { .. })
        ));
    }

    #[test]
    fn test_delete_empty_memory_blocks() {
        let mut pool = pool(4096);
        let (a, first) = pool.allocate(100).unwrap();
        let max = pool.maximum_allocation_size();
        let (b, second) = pool.allocate(max).unwrap();
        assert_eq!(pool.delete_empty_memory_blocks(), 0);

        pool.deallocate(second, b, max).unwrap();
        assert_eq!(pool.delete_empty_memory_blocks(), 4096);
        assert_eq!(pool.block_count(), 1);

        pool.deallocate(first, a, 100).unwrap();
        assert_eq!(pool.delete_empty_memory_blocks(), 4096);
        assert_eq!(pool.block_count(), 0);
        assert_eq!(pool.memory_size(), 0);
        assert!(pool.allocate(8).is_ok());
    }

    #[test]
    fn test_accounting_balances() {
        let mut pool = pool(4096);
        for size in [0, 8, 100, 1000, 3000] {
            pool.allocate(size).unwrap();
        }
        assert_eq!(pool.available_size() + pool.reserved_size(), pool.memory_size());
        assert!(pool.validate().is_ok());
        let stats = pool.stats();
        assert_eq!(stats.allocation_count, 5);
        assert_eq!(stats.block_count, pool.block_count());
    }
}
