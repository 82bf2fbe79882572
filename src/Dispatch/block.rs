// src/Dispatch/block.rs
//
// Zero-copy block reads: a subscription borrows a run of committed frames in
// their wire form and advances past them in one step.

use std::fmt;
use std::sync::Arc;

use super::dispatcher::DispatcherShared;
use super::subscription::{PollGuard, Subscription};
use super::Structs::Dispatch_Structs::Fragment;
use crate::Core::Buffer::layout::{FrameHeader, FLAG_BATCH_BEGIN, FLAG_BATCH_END, HEADER_LENGTH};
use crate::Core::Buffer::FrameRead;
use crate::Core::Structs::Position;

/// A run of committed frames inside one partition, not yet consumed.
///
/// The owning subscription cannot be polled while the block is held.
/// Dropping the block without [`mark_completed`](BlockPeek::mark_completed)
/// leaves the subscription where it was.
pub struct BlockPeek<'a> {
    subscription: &'a Subscription,
    shared: Arc<DispatcherShared>,
    _guard: PollGuard<'a>,
    partition_index: usize,
    offset: usize,
    length: usize,
    position: Position,
    fragment_count: usize,
}

impl<'a> BlockPeek<'a> {
    pub(crate) fn scan(
        subscription: &'a Subscription,
        shared: Arc<DispatcherShared>,
        guard: PollGuard<'a>,
        max_block_length: usize,
    ) -> Option<Self> {
        let log = &shared.log;
        let codec = *log.codec();
        let publisher_position = shared.publisher_position();
        let initial = subscription.position();

        // skip leading padding
        let mut start = initial;
        loop {
            if start >= publisher_position {
                break;
            }
            match log.frame_at(start) {
                FrameRead::Padding { next } | FrameRead::EndOfPartition { next } => start = next,
                _ => break,
            }
        }
        if start != initial {
            subscription.advance(&shared, start);
        }

        let term = codec.term_of(start);
        let mut end = start;
        let mut count = 0;
        let mut complete_end = start;
        let mut complete_count = 0;
        let mut in_batch = false;

        while end < publisher_position && codec.term_of(end) == term {
            let FrameRead::Data { header, next, .. } = log.frame_at(end) else {
                break;
            };
            if (next.value() - start.value()) as usize > max_block_length && complete_count > 0 {
                break;
            }

            if header.flags & FLAG_BATCH_BEGIN != 0 {
                in_batch = true;
            }
            if header.flags & FLAG_BATCH_END != 0 {
                in_batch = false;
            }
            end = next;
            count += 1;
            if !in_batch {
                complete_end = end;
                complete_count = count;
            }
        }

        if complete_count == 0 {
            return None;
        }
        let partition_index = log.partition_for_term(term).index();

        Some(Self {
            subscription,
            partition_index,
            offset: codec.offset_of(start),
            length: (complete_end.value() - start.value()) as usize,
            position: start,
            fragment_count: complete_count,
            shared,
            _guard: guard,
        })
    }

    /// Position of the first frame in the block.
    #[inline]
    pub fn position(&self) -> Position {
        self.position
    }

    /// Position the subscription moves to on completion.
    #[inline]
    pub fn next_position(&self) -> Position {
        Position::new(self.position.value() + self.length as u64)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    /// The frames exactly as laid out in the log, headers included.
    pub fn bytes(&self) -> &[u8] {
        let partition = self.shared.log.partition(self.partition_index);
        // Safety: every frame in the range is committed and the window keeps
        // the partition from being recycled while this subscription lags.
        unsafe { partition.bytes(self.offset, self.length) }
    }

    pub fn frames(&self) -> FrameIter<'_> {
        FrameIter::new(self.bytes(), self.position)
    }

    /// Consume the block: the subscription moves past it.
    pub fn mark_completed(self) {
        self.subscription.advance(&self.shared, self.next_position());
    }
}

impl fmt::Debug for BlockPeek<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPeek")
            .field("subscription", &self.subscription.name())
            .field("position", &self.position)
            .field("length", &self.length)
            .field("fragment_count", &self.fragment_count)
            .finish()
    }
}

/// Decodes data frames out of raw framed bytes, skipping padding.
///
/// Stops at the first truncated or uncommitted header.
#[derive(Debug, Clone)]
pub struct FrameIter<'a> {
    bytes: &'a [u8],
    position: Position,
    cursor: usize,
}

impl<'a> FrameIter<'a> {
    /// `position` is the log position of `bytes[0]`.
    pub fn new(bytes: &'a [u8], position: Position) -> Self {
        Self {
            bytes,
            position,
            cursor: 0,
        }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Fragment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let header = FrameHeader::decode(self.bytes.get(self.cursor..)?)?;
            let frame_start = self.cursor;
            let framed_length = header.framed_length();
            if framed_length == 0 || frame_start + framed_length > self.bytes.len() {
                self.cursor = self.bytes.len();
                return None;
            }
            self.cursor += framed_length;

            if header.is_padding() {
                continue;
            }

            let payload_start = frame_start + HEADER_LENGTH;
            return Some(Fragment {
                position: Position::new(self.position.value() + frame_start as u64),
                stream_id: header.stream_id,
                flags: header.flags,
                payload: &self.bytes[payload_start..payload_start + header.payload_length()],
            });
        }
    }
}
