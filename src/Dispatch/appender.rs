// src/Dispatch/appender.rs
//
// Claim side of the log buffer: reserves space in the active partition and
// moves producers to the next partition when the active one fills up.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::{AcqRel, Acquire};

use crossbeam_utils::{Backoff, CachePadded};

use crate::error::{DispatcherError, Result};
use crate::Core::Buffer::{LogBuffer, PartitionClaim};
use crate::Core::Structs::{Position, TermId};

/// Space reserved for one claim, not yet committed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub term: TermId,
    pub partition_index: usize,
    pub offset: usize,
    pub framed_length: usize,
    pub position: Position,
}

impl Reservation {
    /// Position right after the reserved region.
    #[inline]
    pub fn end(&self) -> Position {
        Position::new(self.position.value() + self.framed_length as u64)
    }
}

/// Reserves space for producers and tracks the publisher position.
#[derive(Debug, Default)]
pub struct LogBufferAppender {
    /// End of the highest reserved region, end-of-partition padding included.
    position: CachePadded<AtomicU64>,
}

impl LogBufferAppender {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn position(&self) -> Position {
        Position::new(self.position.load(Acquire))
    }

    #[inline]
    fn advance_to(&self, position: Position) {
        self.position.fetch_max(position.value(), AcqRel);
    }

    /// Reserve `framed_length` bytes ending at or before `limit`.
    ///
    /// Partition overflow never reaches the caller: the remainder of the full
    /// partition is padded and the claim is retried on the next one.
    pub fn claim(&self, log: &LogBuffer, framed_length: usize, limit: Position) -> Result<Reservation> {
        let backoff = Backoff::new();

        loop {
            let term = log.active_term();
            let partition = log.partition_for_term(term);

            match partition.try_claim(term, framed_length, limit, log.codec()) {
                PartitionClaim::Claimed { offset, filled } => {
                    if filled {
                        log.rotate(term);
                    }
                    let reservation = Reservation {
                        term,
                        partition_index: partition.index(),
                        offset,
                        framed_length,
                        position: log.codec().term_position(term, offset),
                    };
                    self.advance_to(reservation.end());
                    return Ok(reservation);
                }
                PartitionClaim::Tripped => {
                    // the padding is committed; readers may walk up to the term end
                    self.advance_to(log.codec().term_start(term.wrapping_add(1)));
                    log.rotate(term);
                }
                PartitionClaim::Exhausted | PartitionClaim::Stale => {
                    // Another producer is rotating; wait for the next term.
                    backoff.snooze();
                }
                PartitionClaim::BackPressure => return Err(DispatcherError::BackPressure),
            }
        }
    }
}
