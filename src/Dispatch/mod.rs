// Dispatch = the producer/subscription surface over the log buffer.
mod appender;
mod block;
mod builder;
mod claimed;
mod dispatcher;
mod subscription;

pub mod Structs {
    pub mod Dispatch_Structs;
    pub use Dispatch_Structs::{DispatcherConfig, Fragment, Mode}; // re-export for stable path
}

pub use appender::{LogBufferAppender, Reservation};
pub use block::{BlockPeek, FrameIter};
pub use builder::DispatcherBuilder;
pub use claimed::{batch_framed_length, ClaimedBatch, ClaimedFragment};
pub use dispatcher::Dispatcher;
pub use subscription::Subscription;
pub use Structs::{DispatcherConfig, Fragment, Mode};
