// The log buffer: a ring of fixed-size partitions shared by all producers
// and subscriptions of one dispatcher.

use super::layout::FrameHeader;
use crate::Core::alloc::PartitionAllocator;
use crate::Core::Structs::Position_Structs::{Position, PositionCodec, TermId};

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicU64};

/// Largest supported partition. Offsets, even past the physical end of a
/// partition, must fit the low half of the tail counter.
pub const MAX_PARTITION_SIZE: usize = 1 << 30;

/// One fixed-capacity segment of the log buffer.
///
/// ### Concurrency Design:
/// - **Tail counter**: packs `(term << 32) | offset`. Producers reserve
///   `[offset, offset + framed_length)` with a compare-and-swap, so no two
///   reservations overlap. The counter never decreases: an overflowing claim
///   pushes the offset past the physical end, and a new term always compares
///   greater than the previous one.
/// - **Commit word**: the first eight bytes of each frame header. Stored with
///   `Release` after the payload, loaded with `Acquire` by readers.
pub struct Partition {
    /// Slot index in `[0, partition_count)`.
    pub(crate) index: usize,

    /// Packed term and next free offset.
    pub(crate) tail: CachePadded<AtomicU64>,

    /// Start of this partition's band in the shared region.
    pub(crate) base: *mut u8,

    /// Capacity in bytes.
    pub(crate) size: usize,
}

// All access to `base` goes through the claim/commit protocol.
unsafe impl Send for Partition {}
unsafe impl Sync for Partition {}

/// Result of one reservation attempt against a single partition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PartitionClaim {
    /// `[offset, offset + framed_length)` is reserved for the caller.
    /// `filled` is set when this reservation reached the end of the
    /// partition; the caller must rotate to the next term.
    Claimed { offset: usize, filled: bool },
    /// The frame did not fit. The remainder was padded (when a header fits)
    /// and the caller must rotate to the next term, then retry.
    Tripped,
    /// Another claimer already reached the end of this term.
    Exhausted,
    /// The partition is not (or no longer) serving the requested term.
    Stale,
    /// The reservation would end beyond the publisher limit.
    BackPressure,
}

/// What a reader finds at a given position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameRead<'a> {
    /// A committed data frame.
    Data {
        header: FrameHeader,
        payload: &'a [u8],
        next: Position,
    },
    /// A committed padding frame (aborted claim or end-of-partition fill).
    Padding { next: Position },
    /// Too little room left for a header; continue with the next term.
    EndOfPartition { next: Position },
    /// Nothing committed at this position yet.
    NotReady,
    /// The partition was recycled for a newer term; the data is gone.
    Overrun { term: TermId, partition_term: TermId },
}

/// The log buffer view over the allocated partitions.
pub struct LogBuffer {
    /// Owns the backing region the partitions point into.
    pub(crate) allocator: PartitionAllocator,

    pub(crate) partitions: Box<[Partition]>,

    /// The term producers currently append to.
    pub(crate) active_term: CachePadded<AtomicU32>,

    pub(crate) codec: PositionCodec,
}
