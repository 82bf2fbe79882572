// Binary layout of a single frame in the log buffer.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +---------------------------------------------------------------+
// |                         payload length                        |
// +---------------+---------------+-------------------------------+
// |    version    |     flags     |             type              |
// +---------------+---------------+-------------------------------+
// |                           stream id                           |
// +---------------------------------------------------------------+
// |                           reserved                            |
// +---------------------------------------------------------------+
// |                      payload ... padding                      |
//
// The first eight bytes form the commit word. It is written last, with
// release ordering, and a zero commit word means "not committed yet".

use std::mem::size_of;

use crate::error::{DispatcherError, Result};

/// Every frame starts on a multiple of this many bytes.
pub const FRAME_ALIGNMENT: usize = 8;

/// Size of the fixed frame header.
pub const HEADER_LENGTH: usize = size_of::<FrameHeader>();

pub const LENGTH_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const FLAGS_OFFSET: usize = 5;
pub const TYPE_OFFSET: usize = 6;
pub const STREAM_ID_OFFSET: usize = 8;

/// Non-zero, so a committed header never reads as an empty commit word.
pub const FRAME_VERSION: u8 = 1;

pub const TYPE_MESSAGE: u16 = 0;
pub const TYPE_PADDING: u16 = 1;

pub const FLAG_BATCH_BEGIN: u8 = 0b1000_0000;
pub const FLAG_BATCH_END: u8 = 0b0100_0000;
pub const FLAG_FAILED: u8 = 0b0010_0000;

/// Frame header as it is laid out in memory. All fields are little-endian.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub version: u8,
    pub flags: u8,
    pub frame_type: u16,
    pub stream_id: u32,
    pub reserved: u32,
}

const _: () = {
    assert!(size_of::<FrameHeader>() == 16);
    assert!(HEADER_LENGTH % FRAME_ALIGNMENT == 0);
};

#[inline]
pub const fn align(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Payload length plus header, rounded up to the frame alignment.
#[inline]
pub const fn aligned_frame_length(payload_length: usize) -> usize {
    align(payload_length + HEADER_LENGTH, FRAME_ALIGNMENT)
}

/// Framed length of `payload_length`, or `FrameTooLarge` when it can never fit
/// into a partition of `partition_size` bytes.
pub fn checked_frame_length(payload_length: usize, partition_size: usize) -> Result<usize> {
    let framed_length = payload_length
        .checked_add(HEADER_LENGTH + FRAME_ALIGNMENT - 1)
        .map(|n| n & !(FRAME_ALIGNMENT - 1))
        .unwrap_or(usize::MAX);

    if framed_length > partition_size {
        return Err(DispatcherError::FrameTooLarge {
            framed_length,
            partition_size,
        });
    }
    Ok(framed_length)
}

impl FrameHeader {
    pub fn message(length: usize, stream_id: u32, flags: u8) -> Self {
        Self {
            length: length as u32,
            version: FRAME_VERSION,
            flags,
            frame_type: TYPE_MESSAGE,
            stream_id,
            reserved: 0,
        }
    }

    /// Padding covering `framed_length` bytes, header included.
    pub fn padding(framed_length: usize, flags: u8) -> Self {
        debug_assert!(framed_length >= HEADER_LENGTH);
        Self {
            length: (framed_length - HEADER_LENGTH) as u32,
            version: FRAME_VERSION,
            flags,
            frame_type: TYPE_PADDING,
            stream_id: 0,
            reserved: 0,
        }
    }

    #[inline]
    pub fn is_padding(&self) -> bool {
        self.frame_type == TYPE_PADDING
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.flags & FLAG_FAILED != 0
    }

    #[inline]
    pub fn payload_length(&self) -> usize {
        self.length as usize
    }

    #[inline]
    pub fn framed_length(&self) -> usize {
        aligned_frame_length(self.length as usize)
    }

    /// The first eight bytes packed into one value, in memory order.
    #[inline]
    pub fn commit_word(&self) -> u64 {
        (self.length as u64)
            | (self.version as u64) << 32
            | (self.flags as u64) << 40
            | (self.frame_type as u64) << 48
    }

    /// Rebuild a header from a commit word. `None` when nothing was committed.
    #[inline]
    pub fn from_commit_word(word: u64, stream_id: u32) -> Option<Self> {
        if word == 0 {
            return None;
        }
        Some(Self {
            length: word as u32,
            version: (word >> 32) as u8,
            flags: (word >> 40) as u8,
            frame_type: (word >> 48) as u16,
            stream_id,
            reserved: 0,
        })
    }

    pub fn encode(&self, dst: &mut [u8]) {
        dst[LENGTH_OFFSET..LENGTH_OFFSET + 4].copy_from_slice(&self.length.to_le_bytes());
        dst[VERSION_OFFSET] = self.version;
        dst[FLAGS_OFFSET] = self.flags;
        dst[TYPE_OFFSET..TYPE_OFFSET + 2].copy_from_slice(&self.frame_type.to_le_bytes());
        dst[STREAM_ID_OFFSET..STREAM_ID_OFFSET + 4].copy_from_slice(&self.stream_id.to_le_bytes());
        dst[STREAM_ID_OFFSET + 4..HEADER_LENGTH].copy_from_slice(&self.reserved.to_le_bytes());
    }

    /// Decode a committed header from raw frame bytes.
    pub fn decode(src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_LENGTH {
            return None;
        }
        let word = u64::from_le_bytes(src[..8].try_into().ok()?);
        let stream_id = u32::from_le_bytes(src[STREAM_ID_OFFSET..STREAM_ID_OFFSET + 4].try_into().ok()?);
        Self::from_commit_word(word, stream_id)
    }
}
