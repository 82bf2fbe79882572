// src/Dispatch/subscription.rs

use std::fmt;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Weak};

use crossbeam_utils::CachePadded;
use tracing::warn;

use super::block::BlockPeek;
use super::dispatcher::DispatcherShared;
use super::Structs::Dispatch_Structs::Fragment;
use crate::Core::Buffer::FrameRead;
use crate::Core::Structs::Position;

/// Clears the polling flag when the poll (or block peek) ends.
pub(crate) struct PollGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Release);
    }
}

/// A reader's cursor into the dispatcher's log.
///
/// Meant for one consuming thread. A second concurrent `poll` on the same
/// subscription returns 0 instead of racing the first.
pub struct Subscription {
    id: u32,
    name: String,
    /// Next position to read.
    position: CachePadded<AtomicU64>,
    polling: AtomicBool,
    closed: AtomicBool,
    dispatcher: Weak<DispatcherShared>,
}

impl Subscription {
    pub(crate) fn new(id: u32, name: String, position: Position, dispatcher: Weak<DispatcherShared>) -> Self {
        Self {
            id,
            name,
            position: CachePadded::new(AtomicU64::new(position.value())),
            polling: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            dispatcher,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn position(&self) -> Position {
        Position::new(self.position.load(Acquire))
    }

    /// True once closed, or once its dispatcher is closed or gone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Acquire) || self.dispatcher.upgrade().map_or(true, |d| d.is_closed())
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Release);
    }

    /// The dispatcher, if this subscription may read right now.
    fn active_dispatcher(&self) -> Option<Arc<DispatcherShared>> {
        if self.closed.load(Acquire) {
            return None;
        }
        self.dispatcher.upgrade().filter(|d| !d.is_closed())
    }

    pub(crate) fn try_begin_poll(&self) -> Option<PollGuard<'_>> {
        self.polling
            .compare_exchange(false, true, Acquire, Relaxed)
            .ok()
            .map(|_| PollGuard {
                flag: &self.polling,
            })
    }

    /// Publish consumption up to `to` and let the publisher move on.
    pub(crate) fn advance(&self, shared: &DispatcherShared, to: Position) {
        self.position.store(to.value(), Release);
        shared.update_publisher_limit();
    }

    /// Deliver up to `max_fragments` committed data frames to `handler`, in
    /// position order. Returns how many were delivered.
    pub fn poll<F>(&self, mut handler: F, max_fragments: usize) -> usize
    where
        F: FnMut(Fragment<'_>),
    {
        if max_fragments == 0 {
            return 0;
        }
        let Some(shared) = self.active_dispatcher() else {
            return 0;
        };
        let Some(_guard) = self.try_begin_poll() else {
            return 0;
        };

        let start = self.position();
        let publisher_position = shared.publisher_position();
        let mut position = start;
        let mut delivered = 0;

        while delivered < max_fragments && position < publisher_position {
            match shared.log.frame_at(position) {
                FrameRead::Data {
                    header,
                    payload,
                    next,
                } => {
                    handler(Fragment {
                        position,
                        stream_id: header.stream_id,
                        flags: header.flags,
                        payload,
                    });
                    position = next;
                    delivered += 1;
                }
                FrameRead::Padding { next } | FrameRead::EndOfPartition { next } => {
                    position = next;
                }
                FrameRead::NotReady => break,
                FrameRead::Overrun {
                    term,
                    partition_term,
                } => {
                    warn!(
                        subscription = %self.name,
                        %position,
                        term,
                        partition_term,
                        "subscription overrun by the publisher"
                    );
                    break;
                }
            }
        }

        if position != start {
            self.advance(&shared, position);
        }
        delivered
    }

    /// Whether the next `poll` would deliver at least one data frame.
    pub fn has_available(&self) -> bool {
        let Some(shared) = self.active_dispatcher() else {
            return false;
        };

        let publisher_position = shared.publisher_position();
        let mut position = self.position();
        while position < publisher_position {
            match shared.log.frame_at(position) {
                FrameRead::Data { .. } => return true,
                FrameRead::Padding { next } | FrameRead::EndOfPartition { next } => position = next,
                FrameRead::NotReady | FrameRead::Overrun { .. } => return false,
            }
        }
        false
    }

    /// Borrow a contiguous run of committed frames for zero-copy processing.
    ///
    /// At most `max_block_length` bytes are taken unless the first frame (or
    /// first batch) alone is longer; a batch is never split. Returns `None`
    /// when nothing is available or another poll is in progress.
    pub fn peek_block(&self, max_block_length: usize) -> Option<BlockPeek<'_>> {
        let shared = self.active_dispatcher()?;
        let guard = self.try_begin_poll()?;
        BlockPeek::scan(self, shared, guard, max_block_length)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_subscription(self, f)
    }
}
