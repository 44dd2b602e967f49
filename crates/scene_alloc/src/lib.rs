//! # Scene Alloc
//!
//! Slab allocator for scene-graph objects, designed for:
//! - Continuous churn of many small, same-shaped objects
//! - Locality: objects of one kind packed into the same arenas
//! - No side allocations for free-list bookkeeping
//!
//! ## Architecture
//!
//! 1. **Slot headers** - one packed word per slot, free-list links stored
//!    in the first payload word of free slots
//! 2. **Memory blocks** - fixed arenas with size-class free lists, split on
//!    allocate and coalesce on free
//! 3. **Block pools** - one growable set of blocks per [`Affinity`]
//! 4. **Scene allocator** - routes by size and affinity, falls back to the
//!    platform for oversized requests, frees by pointer alone
//!
//! ## Example
//!
//! ```rust,no_run
//! use scene_alloc::{Affinity, AllocatorConfig, SceneAllocator};
//!
//! let allocator = SceneAllocator::new(AllocatorConfig::default())?;
//! let node = allocator.allocate(96, Affinity::Nodes)?;
//! allocator.deallocate(node, 96)?;
//! # Ok::<(), scene_alloc::AllocError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod affinity;
pub mod allocator;
pub mod block;
pub mod config;
pub mod error;
pub mod global;
pub mod platform;
pub mod pool;
pub mod size_class;
pub mod slot;
pub mod stats;
pub mod tracking;
pub mod traits;

pub use affinity::Affinity;
pub use allocator::SceneAllocator;
pub use block::MemoryBlock;
pub use config::{AllocatorConfig, MemoryTracking, PoolConfig};
pub use error::{AllocError, AllocResult};
pub use platform::SystemAllocator;
pub use pool::BlockPool;
pub use stats::{AllocatorStats, PoolStats};
pub use tracking::{LiveAllocation, TrackingAllocator, TrackingCounters};
pub use traits::MemoryAllocator;
