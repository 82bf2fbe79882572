use crate::Core::alloc::PartitionAllocator;
use crate::Core::Buffer::{LogBuffer, Partition};
use crate::Dispatch::{Dispatcher, Subscription};
use std::fmt;

/// Debug function for PartitionAllocator
///
/// Provides a safe debug representation that shows:
/// - Region pointer location
/// - Partition geometry
/// - Opaque reference to the backing memory
pub fn debug_partition_allocator(
    allocator: &PartitionAllocator,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    f.debug_struct("PartitionAllocator")
        .field("shm", &"<opaque>")
        .field("region", &format_args!("{:p}", allocator.region_ptr()))
        .field("partition_count", &allocator.partition_count())
        .field("partition_size", &allocator.partition_size())
        .field("band_stride", &allocator.band_stride())
        .finish()
}

/// Debug function for Partition
///
/// Shows the tail without dereferencing the band
pub fn debug_partition(partition: &Partition, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Partition")
        .field("index", &partition.index())
        .field("term", &partition.tail_term())
        .field("tail_offset", &partition.tail_offset())
        .field("size", &partition.size())
        .field("base", &format_args!("0x{:x}", partition.base as usize))
        .finish()
}

pub fn debug_log_buffer(buffer: &LogBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LogBuffer")
        .field("active_term", &buffer.active_term())
        .field("tail_position", &buffer.tail_position())
        .field("partitions", &buffer.partitions)
        .finish_non_exhaustive()
}

/// Debug function for Dispatcher
///
/// Shows the publisher cursors and the subscriptions by name
pub fn debug_dispatcher(dispatcher: &Dispatcher, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let subscriptions: Vec<String> = dispatcher
        .subscriptions()
        .iter()
        .map(|s| s.name().to_owned())
        .collect();

    f.debug_struct("Dispatcher")
        .field("name", &dispatcher.name())
        .field("mode", &dispatcher.mode())
        .field("publisher_position", &dispatcher.publisher_position())
        .field("publisher_limit", &dispatcher.publisher_limit())
        .field("subscriptions", &subscriptions)
        .field("closed", &dispatcher.is_closed())
        .finish()
}

pub fn debug_subscription(subscription: &Subscription, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
        .field("id", &subscription.id())
        .field("name", &subscription.name())
        .field("position", &subscription.position())
        .field("closed", &subscription.is_closed())
        .finish()
}
