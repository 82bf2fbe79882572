pub mod SharedMemory;
pub mod alloc;

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod layout;
    pub use Buffer::{FrameRead, LogBuffer, Partition, PartitionClaim, MAX_PARTITION_SIZE}; // re-export for stable path
}

pub mod Structs {
    pub mod Position_Structs;
    pub use Position_Structs::{Position, PositionCodec, TermId}; // re-export for stable path
}

pub use SharedMemory::{create_shared_memory, HeapMemory, SharedMemoryBackend};
