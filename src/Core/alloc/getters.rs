use super::*;

/// Getter methods for PartitionAllocator
///
/// These methods provide access to the private fields of PartitionAllocator
/// for debugging and monitoring purposes.
impl PartitionAllocator {
    /// Get a reference to the underlying shared memory backend
    pub fn shm(&self) -> &dyn SharedMemoryBackend {
        &*self.shm
    }

    /// Get the raw pointer to the start of the region
    pub fn region_ptr(&self) -> *const u8 {
        self.shm.as_ptr()
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    pub fn band_stride(&self) -> usize {
        self.band_stride
    }
}
