//! # Allocator Error Types
//!
//! All errors that can occur while allocating, freeing or configuring.

use thiserror::Error;

use crate::affinity::Affinity;

/// Errors that can occur in the allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The platform allocator could not provide memory for a block or a
    /// large allocation.
    #[error("out of memory: failed to allocate {size} bytes aligned to {alignment}")]
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        alignment: usize,
    },

    /// Pointer is not tracked by this allocator (double free or foreign pointer).
    #[error("invalid free: {address:#x} is not a live allocation")]
    InvalidFree {
        /// Address passed to deallocate.
        address: usize,
    },

    /// Caller-supplied size differs from the size recorded at allocation time.
    #[error("size mismatch at {address:#x}: recorded {recorded} bytes, caller supplied {supplied}")]
    SizeMismatch {
        /// Address of the allocation.
        address: usize,
        /// Size the allocator recorded (slot payload or large size).
        recorded: usize,
        /// Size the caller passed in.
        supplied: usize,
    },

    /// Internal consistency check failed.
    #[error("validation failed in {affinity} pool: {reason}")]
    ValidationFailure {
        /// Pool that failed validation.
        affinity: Affinity,
        /// First inconsistency found.
        reason: String,
    },

    /// Block capacity exceeds what slot headers can address.
    #[error("block too large: {units} units exceeds header limit of {limit}")]
    BlockTooLarge {
        /// Requested capacity in units.
        units: usize,
        /// Largest representable capacity in units.
        limit: usize,
    },

    /// Invalid configuration value or file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A process-wide allocator is already installed.
    #[error("a process-wide allocator is already installed")]
    AlreadyInstalled,

    /// No process-wide allocator is installed.
    #[error("no process-wide allocator is installed")]
    NotInstalled,
}

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;
