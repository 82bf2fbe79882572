// Positions: the global, totally ordered address of every frame.

use std::fmt;

/// One use of one partition slot. Term `t` lives in partition `t % count`.
pub type TermId = u32;

/// Global byte address of a frame.
///
/// Positions are linear: `term * partition_size + offset`. Comparing two
/// positions compares append order, and subtracting them yields a byte
/// distance regardless of which partitions they fall in.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(pub(crate) u64);

impl Position {
    pub const ZERO: Position = Position(0);

    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<Position> for u64 {
    fn from(position: Position) -> Self {
        position.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bijective mapping between positions and `(term, offset)` pairs for a given
/// partition geometry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PositionCodec {
    partition_size: u64,
    partition_count: u32,
}

impl PositionCodec {
    pub fn new(partition_count: usize, partition_size: usize) -> Self {
        debug_assert!(partition_count > 0 && partition_size > 0);
        Self {
            partition_size: partition_size as u64,
            partition_count: partition_count as u32,
        }
    }

    #[inline]
    pub fn partition_size(&self) -> usize {
        self.partition_size as usize
    }

    #[inline]
    pub fn partition_count(&self) -> usize {
        self.partition_count as usize
    }

    /// Position of `offset` within `partition_index` after it has wrapped
    /// `generation` times.
    #[inline]
    pub fn position(&self, generation: u32, partition_index: usize, offset: usize) -> Position {
        let term = generation as u64 * self.partition_count as u64 + partition_index as u64;
        Position(term * self.partition_size + offset as u64)
    }

    #[inline]
    pub fn term_position(&self, term: TermId, offset: usize) -> Position {
        Position(term as u64 * self.partition_size + offset as u64)
    }

    /// First position of `term`.
    #[inline]
    pub fn term_start(&self, term: TermId) -> Position {
        self.term_position(term, 0)
    }

    #[inline]
    pub fn term_of(&self, position: Position) -> TermId {
        (position.0 / self.partition_size) as TermId
    }

    #[inline]
    pub fn partition_of(&self, position: Position) -> usize {
        (self.term_of(position) % self.partition_count) as usize
    }

    #[inline]
    pub fn generation_of(&self, position: Position) -> u32 {
        self.term_of(position) / self.partition_count
    }

    #[inline]
    pub fn offset_of(&self, position: Position) -> usize {
        (position.0 % self.partition_size) as usize
    }

    #[inline]
    pub fn partition_index(&self, term: TermId) -> usize {
        (term % self.partition_count) as usize
    }
}
