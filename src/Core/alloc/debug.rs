use super::*;
use crate::Core::Buffer::LogBuffer;
use std::fmt;

// Debug proxy implementations that call the standalone debug functions
impl fmt::Debug for PartitionAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_partition_allocator(self, f)
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_partition(self, f)
    }
}

impl fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_log_buffer(self, f)
    }
}
