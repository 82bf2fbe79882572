// Backing memory abstraction for the log buffer.
// The default backend is a zeroed, cache-line aligned heap region shared by
// every producer and subscription of one dispatcher.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::fmt::Debug;
use std::ptr::NonNull;

use crate::error::{DispatcherError, Result};

/// Alignment of every backing region, and of every partition band inside it.
pub const REGION_ALIGNMENT: usize = 128;

/// Shared memory backend trait for the partition storage
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the start of the region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the region in bytes
    fn size(&self) -> usize;
}

/// Create a new zeroed memory region with the specified size
///
/// # Arguments
/// * `size` - Size of the region in bytes; rounded up to `REGION_ALIGNMENT`
///
/// # Returns
/// A boxed trait object implementing SharedMemoryBackend
pub fn create_shared_memory(size: usize) -> Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(HeapMemory::create(size)?))
}

#[derive(Debug)]
pub struct HeapMemory {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The region is only ever accessed through raw pointers whose exclusivity is
// established by the claim protocol.
unsafe impl Send for HeapMemory {}
unsafe impl Sync for HeapMemory {}

impl HeapMemory {
    pub fn create(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(DispatcherError::config("size", "memory region must not be empty"));
        }

        let aligned_size = (size + REGION_ALIGNMENT - 1) & !(REGION_ALIGNMENT - 1);
        let layout = Layout::from_size_align(aligned_size, REGION_ALIGNMENT)
            .map_err(|e| DispatcherError::config("size", e.to_string()))?;

        // Zeroed memory doubles as "no frame committed here yet".
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };

        Ok(Self { ptr, layout })
    }
}

impl Drop for HeapMemory {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

impl SharedMemoryBackend for HeapMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.layout.size()
    }
}
