//! # Process-Wide Allocator
//!
//! The one place a shared allocator instance lives. Everything else takes
//! an allocator explicitly; the application installs one here at startup
//! and shuts it down on exit. Nothing is created implicitly.

use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{const_rwlock, RwLock};
use tracing::info;

use crate::affinity::Affinity;
use crate::error::{AllocError, AllocResult};
use crate::traits::MemoryAllocator;

static INSTANCE: RwLock<Option<Arc<dyn MemoryAllocator>>> = const_rwlock(None);

/// Installs the process-wide allocator.
///
/// # Errors
///
/// `AlreadyInstalled` if an allocator is installed and not shut down.
pub fn install(allocator: Arc<dyn MemoryAllocator>) -> AllocResult<()> {
    let mut slot = INSTANCE.write();
    if slot.is_some() {
        return Err(AllocError::AlreadyInstalled);
    }
    *slot = Some(allocator);
    info!("process allocator installed");
    Ok(())
}

/// The installed allocator.
///
/// # Errors
///
/// `NotInstalled` before [`install`] or after [`shutdown`].
pub fn instance() -> AllocResult<Arc<dyn MemoryAllocator>> {
    INSTANCE.read().clone().ok_or(AllocError::NotInstalled)
}

/// Whether an allocator is installed.
#[must_use]
pub fn is_installed() -> bool {
    INSTANCE.read().is_some()
}

/// Removes the installed allocator and hands it back.
///
/// Outstanding handles from [`instance`] stay valid until dropped.
pub fn shutdown() -> Option<Arc<dyn MemoryAllocator>> {
    let previous = INSTANCE.write().take();
    if previous.is_some() {
        info!("process allocator shut down");
    }
    previous
}

/// Allocates through the installed allocator.
///
/// # Errors
///
/// `NotInstalled`, or whatever the installed allocator returns.
pub fn allocate(size: usize, affinity: Affinity) -> AllocResult<NonNull<u8>> {
    instance()?.allocate(size, affinity)
}

/// Frees through the installed allocator.
///
/// # Errors
///
/// `NotInstalled`, or whatever the installed allocator returns.
pub fn deallocate(ptr: NonNull<u8>, size: usize) -> AllocResult<()> {
    instance()?.deallocate(ptr, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SceneAllocator;
    use crate::config::AllocatorConfig;

    // Single test: the instance is process-wide and tests run in parallel.
    #[test]
    fn test_install_lifecycle() {
        assert!(!is_installed());
        assert_eq!(allocate(8, Affinity::Objects).err(), Some(AllocError::NotInstalled));

        let allocator = Arc::new(SceneAllocator::new(AllocatorConfig::default()).unwrap());
        install(allocator.clone()).unwrap();
        assert_eq!(install(allocator.clone()), Err(AllocError::AlreadyInstalled));

        let ptr = allocate(64, Affinity::Nodes).unwrap();
        assert!(allocator.total_reserved_size() > 0);
        deallocate(ptr, 64).unwrap();
        assert_eq!(allocator.total_reserved_size(), 0);

        assert!(shutdown().is_some());
        assert!(shutdown().is_none());
        assert_eq!(instance().err(), Some(AllocError::NotInstalled));

        install(allocator).unwrap();
        assert!(shutdown().is_some());
    }
}
