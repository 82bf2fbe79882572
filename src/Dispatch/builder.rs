use super::dispatcher::Dispatcher;
use super::Structs::Dispatch_Structs::{DispatcherConfig, Mode};
use crate::error::Result;
use crate::Core::Buffer::layout::FRAME_ALIGNMENT;

/// Fluent construction of a [`Dispatcher`], starting from the default
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    /// Total bytes to split across partitions; overrides the partition size.
    buffer_size: Option<usize>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: DispatcherConfig) -> Self {
        Self {
            config,
            buffer_size: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_partition_count(mut self, count: usize) -> Self {
        self.config.partition_count = count;
        self
    }

    pub fn with_partition_size(mut self, size: usize) -> Self {
        self.config.partition_size = size;
        self.buffer_size = None;
        self
    }

    /// Total bytes across all partitions. Split evenly when the dispatcher
    /// is built, rounded down to the frame alignment.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn with_window_length(mut self, window_length: usize) -> Self {
        self.config.window_length = Some(window_length);
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn with_subscription(mut self, name: impl Into<String>) -> Self {
        self.config.subscriptions.push(name.into());
        self
    }

    pub fn with_subscriptions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.subscriptions.extend(names.into_iter().map(Into::into));
        self
    }

    /// The configuration `build` would use.
    pub fn config(&self) -> DispatcherConfig {
        let mut config = self.config.clone();
        if let Some(total) = self.buffer_size {
            let count = config.partition_count.max(1);
            config.partition_size = (total / count) & !(FRAME_ALIGNMENT - 1);
        }
        config
    }

    pub fn build(self) -> Result<Dispatcher> {
        Dispatcher::from_config(self.config())
    }
}
