//! Statistics snapshots for telemetry.

use crate::affinity::Affinity;

/// Accounting of one block pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Pool affinity.
    pub affinity: Affinity,
    /// Arena size for new blocks.
    pub block_size: usize,
    /// Payload alignment.
    pub alignment: usize,
    /// Blocks held.
    pub block_count: usize,
    /// Live slab allocations.
    pub allocation_count: usize,
    /// Usable bytes across all blocks.
    pub memory_size: usize,
    /// Bytes in free slots.
    pub available_size: usize,
    /// Bytes in allocated slots, headers included.
    pub reserved_size: usize,
}

/// Accounting of the whole allocator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// One entry per affinity, in pool order.
    pub pools: Vec<PoolStats>,
    /// Live allocations served outside the slab path.
    pub large_allocation_count: usize,
    /// Bytes held by those allocations.
    pub large_allocation_size: usize,
}

impl AllocatorStats {
    /// Usable bytes, slab and large.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.pools.iter().map(|p| p.memory_size).sum::<usize>() + self.large_allocation_size
    }

    /// Bytes free for slab allocations.
    #[must_use]
    pub fn available_size(&self) -> usize {
        self.pools.iter().map(|p| p.available_size).sum()
    }

    /// Bytes handed out, slab and large.
    #[must_use]
    pub fn reserved_size(&self) -> usize {
        self.pools.iter().map(|p| p.reserved_size).sum::<usize>() + self.large_allocation_size
    }

    /// Blocks across all pools.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.pools.iter().map(|p| p.block_count).sum()
    }

    /// Fraction of held memory that is in use (1.0 = nothing wasted).
    #[must_use]
    pub fn utilisation(&self) -> f64 {
        let memory = self.memory_size();
        if memory == 0 {
            1.0
        } else {
            self.reserved_size() as f64 / memory as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_include_large_allocations() {
        let stats = AllocatorStats {
            pools: vec![PoolStats {
                affinity: Affinity::Nodes,
                block_size: 4096,
                alignment: 8,
                block_count: 1,
                allocation_count: 2,
                memory_size: 4080,
                available_size: 4000,
                reserved_size: 80,
            }],
            large_allocation_count: 1,
            large_allocation_size: 10_000,
        };
        assert_eq!(stats.memory_size(), 14_080);
        assert_eq!(stats.reserved_size(), 10_080);
        assert_eq!(stats.available_size() + stats.reserved_size(), stats.memory_size());
    }

    #[test]
    fn test_empty_utilisation() {
        assert!((AllocatorStats::default().utilisation() - 1.0).abs() < f64::EPSILON);
    }
}
