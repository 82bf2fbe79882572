use std::ptr;
use std::slice;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Release};
use std::sync::atomic::{AtomicU32, AtomicU64};

use crossbeam_utils::{Backoff, CachePadded};
use tracing::debug;

use super::layout::{FrameHeader, FRAME_ALIGNMENT, HEADER_LENGTH, STREAM_ID_OFFSET};
use super::Buffer::{FrameRead, LogBuffer, Partition, PartitionClaim, MAX_PARTITION_SIZE};
use crate::error::{DispatcherError, Result};
use crate::Core::alloc::PartitionAllocator;
use crate::Core::Structs::Position_Structs::{Position, PositionCodec, TermId};

#[inline]
pub(crate) fn pack_tail(term: TermId, offset: usize) -> u64 {
    (term as u64) << 32 | offset as u64
}

#[inline]
pub(crate) fn unpack_tail(raw: u64) -> (TermId, usize) {
    ((raw >> 32) as TermId, (raw & 0xFFFF_FFFF) as usize)
}

impl Partition {
    /// Create a partition view over an existing memory band.
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of `size` bytes, aligned to
    /// at least `FRAME_ALIGNMENT`, zeroed, and must outlive the partition.
    pub unsafe fn new(index: usize, base: *mut u8, size: usize) -> Self {
        Self {
            index,
            tail: CachePadded::new(AtomicU64::new(pack_tail(0, 0))),
            base,
            size,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Term this partition currently serves.
    #[inline]
    pub fn tail_term(&self) -> TermId {
        unpack_tail(self.tail.load(Acquire)).0
    }

    /// Next free offset. May exceed `size` once the term is exhausted.
    #[inline]
    pub fn tail_offset(&self) -> usize {
        unpack_tail(self.tail.load(Acquire)).1
    }

    /// Reserve `framed_length` bytes in `term`.
    ///
    /// The reservation must end at or before `limit`. When the frame does not
    /// fit, the offset is still pushed past the physical end so the counter
    /// stays monotonic, and padding covers the remainder if a header fits.
    pub fn try_claim(
        &self,
        term: TermId,
        framed_length: usize,
        limit: Position,
        codec: &PositionCodec,
    ) -> PartitionClaim {
        debug_assert!(framed_length % FRAME_ALIGNMENT == 0 && framed_length <= self.size);
        let backoff = Backoff::new();

        loop {
            let raw = self.tail.load(Acquire);
            let (tail_term, offset) = unpack_tail(raw);

            if tail_term != term {
                return PartitionClaim::Stale;
            }
            if offset >= self.size {
                return PartitionClaim::Exhausted;
            }

            let claim_end = codec.term_position(term, offset).value() + framed_length as u64;
            if claim_end > limit.value() {
                return PartitionClaim::BackPressure;
            }

            let new_offset = offset + framed_length;
            if self
                .tail
                .compare_exchange_weak(raw, pack_tail(term, new_offset), AcqRel, Acquire)
                .is_ok()
            {
                if new_offset <= self.size {
                    return PartitionClaim::Claimed {
                        offset,
                        filled: new_offset == self.size,
                    };
                }

                let remaining = self.size - offset;
                if remaining >= HEADER_LENGTH {
                    self.publish_header(offset, &FrameHeader::padding(remaining, 0));
                }
                return PartitionClaim::Tripped;
            }
            // contention on the tail, retry
            backoff.spin();
        }
    }

    #[inline]
    fn commit_word(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset % FRAME_ALIGNMENT == 0 && offset + HEADER_LENGTH <= self.size);
        // Frame offsets are 8-byte aligned and the band is 128-byte aligned.
        unsafe { &*(self.base.add(offset) as *const AtomicU64) }
    }

    /// The committed header at `offset`, if any.
    pub fn header_at(&self, offset: usize) -> Option<FrameHeader> {
        if offset % FRAME_ALIGNMENT != 0 || offset + HEADER_LENGTH > self.size {
            return None;
        }
        let word = u64::from_le(self.commit_word(offset).load(Acquire));
        if word == 0 {
            return None;
        }
        let stream_id = unsafe {
            u32::from_le(ptr::read(self.base.add(offset + STREAM_ID_OFFSET) as *const u32))
        };
        FrameHeader::from_commit_word(word, stream_id)
    }

    pub fn is_committed(&self, offset: usize) -> bool {
        self.header_at(offset).is_some()
    }

    pub fn is_padding(&self, offset: usize) -> bool {
        matches!(self.header_at(offset), Some(header) if header.is_padding())
    }

    /// Write the header at `offset`, commit word last.
    pub(crate) fn publish_header(&self, offset: usize, header: &FrameHeader) {
        unsafe {
            let frame = self.base.add(offset);
            ptr::write(frame.add(STREAM_ID_OFFSET) as *mut u32, header.stream_id.to_le());
            ptr::write(frame.add(STREAM_ID_OFFSET + 4) as *mut u32, header.reserved.to_le());
        }
        self.commit_word(offset).store(header.commit_word().to_le(), Release);
    }

    /// Mutable view of `len` bytes starting at `offset`.
    ///
    /// # Safety
    /// The caller must hold the reservation covering the range and no other
    /// view of it may exist.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.size);
        slice::from_raw_parts_mut(self.base.add(offset), len)
    }

    /// Shared view of `len` bytes starting at `offset`.
    ///
    /// # Safety
    /// The range must be committed, so nobody writes it while the view lives.
    pub(crate) unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.size);
        slice::from_raw_parts(self.base.add(offset), len)
    }

    /// Zero the band and hand it to `term`.
    ///
    /// Only the claimer that exhausted the previous term calls this, and the
    /// publisher window keeps governed readers out of the band.
    pub(crate) fn clean(&self, term: TermId) {
        unsafe {
            ptr::write_bytes(self.base, 0, self.size);
        }
        self.tail.store(pack_tail(term, 0), Release);
    }
}

impl LogBuffer {
    /// Reject partition geometries a log buffer cannot be built with.
    pub fn check_geometry(partition_count: usize, partition_size: usize) -> Result<()> {
        if partition_count < 2 {
            return Err(DispatcherError::config(
                "partition_count",
                format!("at least 2 partitions required, got {partition_count}"),
            ));
        }
        if partition_size % FRAME_ALIGNMENT != 0
            || partition_size < 2 * HEADER_LENGTH
            || partition_size > MAX_PARTITION_SIZE
        {
            return Err(DispatcherError::config(
                "partition_size",
                format!(
                    "must be a multiple of {FRAME_ALIGNMENT} between {} and {MAX_PARTITION_SIZE}, got {partition_size}",
                    2 * HEADER_LENGTH
                ),
            ));
        }
        Ok(())
    }

    pub fn new(partition_count: usize, partition_size: usize) -> Result<Self> {
        Self::check_geometry(partition_count, partition_size)?;

        let allocator = PartitionAllocator::new(partition_count, partition_size)?;
        let partitions = allocator.create_partitions().into_boxed_slice();

        Ok(Self {
            allocator,
            partitions,
            active_term: CachePadded::new(AtomicU32::new(0)),
            codec: PositionCodec::new(partition_count, partition_size),
        })
    }

    #[inline]
    pub fn codec(&self) -> &PositionCodec {
        &self.codec
    }

    #[inline]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    #[inline]
    pub fn partition_size(&self) -> usize {
        self.codec.partition_size()
    }

    #[inline]
    pub fn partition(&self, index: usize) -> &Partition {
        &self.partitions[index]
    }

    #[inline]
    pub fn partition_for_term(&self, term: TermId) -> &Partition {
        &self.partitions[self.codec.partition_index(term)]
    }

    #[inline]
    pub fn active_term(&self) -> TermId {
        self.active_term.load(Acquire)
    }

    /// Position of the next byte producers would reserve.
    pub fn tail_position(&self) -> Position {
        let term = self.active_term();
        let partition = self.partition_for_term(term);
        let offset = partition.tail_offset().min(partition.size);
        self.codec.term_position(term, offset)
    }

    /// Move producers from `filled_term` to the next term.
    pub(crate) fn rotate(&self, filled_term: TermId) -> TermId {
        let next = filled_term.wrapping_add(1);
        let partition = self.partition_for_term(next);
        partition.clean(next);

        let previous = self.active_term.swap(next, AcqRel);
        debug_assert_eq!(previous, filled_term);

        debug!(
            term = next,
            partition = partition.index,
            "log buffer rotated to next partition"
        );
        next
    }

    /// Inspect the frame at `position` without consuming it.
    pub fn frame_at(&self, position: Position) -> FrameRead<'_> {
        let term = self.codec.term_of(position);
        let offset = self.codec.offset_of(position);

        if self.partition_size() - offset < HEADER_LENGTH {
            return FrameRead::EndOfPartition {
                next: self.codec.term_start(term.wrapping_add(1)),
            };
        }

        let partition = self.partition_for_term(term);
        let (partition_term, tail_offset) = unpack_tail(partition.tail.load(Acquire));
        if partition_term < term {
            return FrameRead::NotReady;
        }
        if partition_term > term {
            return FrameRead::Overrun {
                term,
                partition_term,
            };
        }
        if offset >= tail_offset {
            return FrameRead::NotReady;
        }

        match partition.header_at(offset) {
            None => FrameRead::NotReady,
            Some(header) => {
                let next = Position(position.0 + header.framed_length() as u64);
                if header.is_padding() {
                    FrameRead::Padding { next }
                } else {
                    let payload = unsafe {
                        partition.bytes(offset + HEADER_LENGTH, header.payload_length())
                    };
                    FrameRead::Data {
                        header,
                        payload,
                        next,
                    }
                }
            }
        }
    }
}
