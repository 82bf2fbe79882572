// Plain data types shared by the dispatcher surface.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{DispatcherError, Result};
use crate::Core::Buffer::layout::{FLAG_BATCH_BEGIN, FLAG_BATCH_END};
use crate::Core::Buffer::LogBuffer;
use crate::Core::Structs::Position;

/// Consumption topology, fixed for the lifetime of a dispatcher.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Independent subscriptions, opened and closed at will. The slowest one
    /// governs the publisher.
    #[default]
    Broadcast,
    /// A fixed, ordered chain of stages. The last stage governs the publisher.
    Pipeline,
}

/// Construction-time configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Name used in logs.
    pub name: String,
    pub partition_count: usize,
    /// Bytes per partition. Must be a multiple of the frame alignment.
    pub partition_size: usize,
    /// How far, in bytes, the publisher may run ahead of the governing
    /// subscription. Defaults to one partition.
    pub window_length: Option<usize>,
    pub mode: Mode,
    /// Subscriptions created with the dispatcher. In pipeline mode this is
    /// the stage order.
    pub subscriptions: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "dispatcher".to_string(),
            partition_count: 3,
            partition_size: 1024 * 1024, // 1MB default
            window_length: None,
            mode: Mode::Broadcast,
            subscriptions: Vec::new(),
        }
    }
}

impl DispatcherConfig {
    pub fn effective_window_length(&self) -> usize {
        self.window_length.unwrap_or(self.partition_size)
    }

    /// Check every constraint, reporting the first violation.
    pub fn validate(&self) -> Result<()> {
        LogBuffer::check_geometry(self.partition_count, self.partition_size)?;

        // At least one partition so any frame fits eventually, and short of
        // the whole ring so a band is never recycled under a governed reader.
        let window = self.effective_window_length();
        let max_window = (self.partition_count - 1)
            .checked_mul(self.partition_size)
            .ok_or_else(|| {
                DispatcherError::config(
                    "partition_count",
                    format!(
                        "{} partitions of {} bytes overflow the address space",
                        self.partition_count, self.partition_size
                    ),
                )
            })?;
        if window < self.partition_size || window > max_window {
            return Err(DispatcherError::config(
                "window_length",
                format!(
                    "must be between {} and {max_window}, got {window}",
                    self.partition_size
                ),
            ));
        }

        let mut seen = HashSet::new();
        for name in &self.subscriptions {
            if name.is_empty() {
                return Err(DispatcherError::config(
                    "subscriptions",
                    "subscription names must not be empty",
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(DispatcherError::config(
                    "subscriptions",
                    format!("duplicate subscription name '{name}'"),
                ));
            }
        }

        if self.mode == Mode::Pipeline && self.subscriptions.is_empty() {
            return Err(DispatcherError::config(
                "subscriptions",
                "pipeline mode requires at least one subscription",
            ));
        }

        Ok(())
    }
}

/// A committed data frame handed to a poll handler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub position: Position,
    pub stream_id: u32,
    pub flags: u8,
    pub payload: &'a [u8],
}

impl Fragment<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[inline]
    pub fn is_batch_begin(&self) -> bool {
        self.flags & FLAG_BATCH_BEGIN != 0
    }

    #[inline]
    pub fn is_batch_end(&self) -> bool {
        self.flags & FLAG_BATCH_END != 0
    }
}
