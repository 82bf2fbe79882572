// src/Dispatch/claimed.rs
//
// Handles to reserved-but-uncommitted space. Both handles are consumed by
// `commit` or `abort`; dropping one without either aborts it, so a failed
// producer can never leave a gap that stalls the subscriptions behind it.

use std::ptr;

use tracing::warn;

use super::appender::Reservation;
use crate::error::{DispatcherError, Result};
use crate::Core::Buffer::layout::{
    align, aligned_frame_length, FrameHeader, FLAG_BATCH_BEGIN, FLAG_BATCH_END, FLAG_FAILED,
    FRAME_ALIGNMENT, HEADER_LENGTH,
};
use crate::Core::Buffer::LogBuffer;
use crate::Core::Structs::Position;

/// Bytes to reserve for a batch of up to `fragment_count` fragments carrying
/// `total_payload_length` bytes.
///
/// Covers the worst-case alignment of every fragment plus one trailing
/// padding header, so the unused remainder can always be padded.
pub fn batch_framed_length(fragment_count: usize, total_payload_length: usize) -> usize {
    align(
        total_payload_length + fragment_count * (HEADER_LENGTH + FRAME_ALIGNMENT - 1),
        FRAME_ALIGNMENT,
    ) + HEADER_LENGTH
}

/// Write `header` at `offset` unless the partition was recycled meanwhile.
fn publish(log: &LogBuffer, reservation: &Reservation, offset: usize, header: &FrameHeader) -> bool {
    let partition = log.partition(reservation.partition_index);
    let partition_term = partition.tail_term();
    if partition_term != reservation.term {
        warn!(
            position = %reservation.position,
            term = reservation.term,
            partition_term,
            "partition recycled before the claim completed; discarding fragment"
        );
        return false;
    }
    partition.publish_header(offset, header);
    true
}

/// A single reserved frame.
#[derive(Debug)]
pub struct ClaimedFragment<'a> {
    log: &'a LogBuffer,
    reservation: Reservation,
    length: usize,
    stream_id: u32,
    written: usize,
    completed: bool,
}

impl<'a> ClaimedFragment<'a> {
    pub(crate) fn new(log: &'a LogBuffer, reservation: Reservation, length: usize, stream_id: u32) -> Self {
        Self {
            log,
            reservation,
            length,
            stream_id,
            written: 0,
            completed: false,
        }
    }

    /// Position the frame will have once committed.
    #[inline]
    pub fn position(&self) -> Position {
        self.reservation.position
    }

    /// Payload capacity in bytes.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Bytes appended so far through `write`.
    #[inline]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Direct access to the whole reserved payload region.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        let partition = self.log.partition(self.reservation.partition_index);
        // Safety: the reservation is exclusive to this handle until it is
        // committed or aborted, and the handle borrows the log buffer.
        unsafe { partition.bytes_mut(self.reservation.offset + HEADER_LENGTH, self.length) }
    }

    /// Append `src` after the bytes already written.
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        let capacity = self.length - self.written;
        if src.len() > capacity {
            return Err(DispatcherError::FragmentOverflow {
                capacity,
                requested: src.len(),
            });
        }
        let start = self.written;
        self.buffer_mut()[start..start + src.len()].copy_from_slice(src);
        self.written += src.len();
        Ok(())
    }

    /// Make the frame visible to subscriptions.
    pub fn commit(mut self) -> Position {
        self.completed = true;
        let header = FrameHeader::message(self.length, self.stream_id, 0);
        publish(self.log, &self.reservation, self.reservation.offset, &header);
        self.reservation.position
    }

    /// Turn the reservation into padding that readers skip.
    pub fn abort(mut self) {
        self.abort_in_place();
    }

    fn abort_in_place(&mut self) {
        self.completed = true;
        let header = FrameHeader::padding(self.reservation.framed_length, FLAG_FAILED);
        publish(self.log, &self.reservation, self.reservation.offset, &header);
    }
}

impl Drop for ClaimedFragment<'_> {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                position = %self.reservation.position,
                "claimed fragment dropped without commit or abort; aborting"
            );
            self.abort_in_place();
        }
    }
}

/// A reserved region holding several frames that become visible together.
#[derive(Debug)]
pub struct ClaimedBatch<'a> {
    log: &'a LogBuffer,
    reservation: Reservation,
    max_fragment_count: usize,
    fragment_count: usize,
    /// Offset of the next fragment, relative to the reservation.
    cursor: usize,
    /// Published last, on commit.
    first: Option<FrameHeader>,
    /// Most recent fragment after the first; published once its successor
    /// (or the commit) decides its flags.
    last: Option<(usize, FrameHeader)>,
    completed: bool,
}

impl<'a> ClaimedBatch<'a> {
    pub(crate) fn new(log: &'a LogBuffer, reservation: Reservation, max_fragment_count: usize) -> Self {
        Self {
            log,
            reservation,
            max_fragment_count,
            fragment_count: 0,
            cursor: 0,
            first: None,
            last: None,
            completed: false,
        }
    }

    /// Position of the first fragment.
    #[inline]
    pub fn position(&self) -> Position {
        self.reservation.position
    }

    #[inline]
    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    /// Bytes still available for framed fragments.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.reservation.framed_length - self.cursor - HEADER_LENGTH
    }

    /// Copy `payload` into the next fragment and return its position.
    pub fn add_fragment(&mut self, payload: &[u8], stream_id: u32) -> Result<Position> {
        let framed_length = aligned_frame_length(payload.len());
        if self.fragment_count == self.max_fragment_count || framed_length > self.remaining() {
            return Err(DispatcherError::FragmentOverflow {
                capacity: self.remaining().saturating_sub(HEADER_LENGTH),
                requested: payload.len(),
            });
        }

        let offset = self.reservation.offset + self.cursor;
        let partition = self.log.partition(self.reservation.partition_index);
        // Safety: `[offset, offset + framed_length)` lies inside this batch's
        // exclusive reservation.
        unsafe {
            let dst = partition.bytes_mut(offset + HEADER_LENGTH, payload.len());
            ptr::copy_nonoverlapping(payload.as_ptr(), dst.as_mut_ptr(), payload.len());
        }

        if self.first.is_none() {
            self.first = Some(FrameHeader::message(payload.len(), stream_id, FLAG_BATCH_BEGIN));
        } else {
            if let Some((previous_offset, previous)) = self.last.take() {
                publish(self.log, &self.reservation, previous_offset, &previous);
            }
            self.last = Some((offset, FrameHeader::message(payload.len(), stream_id, 0)));
        }

        let position = Position::new(self.reservation.position.value() + self.cursor as u64);
        self.cursor += framed_length;
        self.fragment_count += 1;
        Ok(position)
    }

    /// Publish every fragment at once. Returns the position of the first.
    pub fn commit(mut self) -> Position {
        self.completed = true;
        let base = self.reservation.offset;

        let Some(mut first) = self.first.take() else {
            // nothing added: the whole region is one padding frame
            let padding = FrameHeader::padding(self.reservation.framed_length, 0);
            publish(self.log, &self.reservation, base, &padding);
            return self.reservation.position;
        };

        match self.last.take() {
            Some((offset, mut last)) => {
                last.flags |= FLAG_BATCH_END;
                publish(self.log, &self.reservation, offset, &last);
            }
            None => first.flags |= FLAG_BATCH_END,
        }

        let tail_length = self.reservation.framed_length - self.cursor;
        let padding = FrameHeader::padding(tail_length, 0);
        publish(self.log, &self.reservation, base + self.cursor, &padding);

        // The first commit word releases everything written before it.
        publish(self.log, &self.reservation, base, &first);
        self.reservation.position
    }

    pub fn abort(mut self) {
        self.abort_in_place();
    }

    fn abort_in_place(&mut self) {
        self.completed = true;
        let header = FrameHeader::padding(self.reservation.framed_length, FLAG_FAILED);
        publish(self.log, &self.reservation, self.reservation.offset, &header);
    }
}

impl Drop for ClaimedBatch<'_> {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                position = %self.reservation.position,
                fragments = self.fragment_count,
                "claimed batch dropped without commit or abort; aborting"
            );
            self.abort_in_place();
        }
    }
}
