use crate::error::{DispatcherError, Result};
use crate::Core::Buffer::Partition;
use crate::Core::SharedMemory::{create_shared_memory, SharedMemoryBackend, REGION_ALIGNMENT};
mod debug;
mod getters;

/// Carves one shared region into equally sized, cache-line aligned partition
/// bands.
pub struct PartitionAllocator {
    shm: Box<dyn SharedMemoryBackend>,
    partition_count: usize,
    partition_size: usize,
    /// Distance between the starts of two consecutive bands.
    band_stride: usize,
}

impl PartitionAllocator {
    // Create a new allocator with room for `partition_count` bands
    pub fn new(partition_count: usize, partition_size: usize) -> Result<Self> {
        let band_stride = (partition_size + REGION_ALIGNMENT - 1) & !(REGION_ALIGNMENT - 1);
        let total_size = band_stride.checked_mul(partition_count).ok_or_else(|| {
            DispatcherError::config(
                "partition_count",
                format!("{partition_count} partitions of {partition_size} bytes overflow the address space"),
            )
        })?;

        let shm = create_shared_memory(total_size)?;

        // Every band must be able to hold aligned atomic commit words
        if (shm.as_ptr() as usize) % REGION_ALIGNMENT != 0 {
            return Err(DispatcherError::illegal_state(
                "shared memory not properly aligned",
            ));
        }

        Ok(Self {
            shm,
            partition_count,
            partition_size,
            band_stride,
        })
    }

    /// Byte offset of band `index` from the start of the region
    pub fn band_offset(&self, index: usize) -> usize {
        index * self.band_stride
    }

    /// Build the partition views, one per band, all starting in term 0
    pub fn create_partitions(&self) -> Vec<Partition> {
        (0..self.partition_count)
            .map(|index| {
                let base = unsafe { self.shm.as_ptr().add(self.band_offset(index)) };
                // Safety: each band lies inside the zeroed region owned by
                // `self.shm`, which the log buffer keeps alive alongside.
                unsafe { Partition::new(index, base, self.partition_size) }
            })
            .collect()
    }

    // Get the total reserved memory in bytes
    pub fn used_memory(&self) -> usize {
        self.band_stride * self.partition_count
    }
}
