//! A multi-partition in-memory log buffer dispatcher.
//!
//! Producers on any thread reserve space in a ring of partitions, fill it and
//! commit it. Subscriptions read the committed frames in position order,
//! either independently (broadcast) or as an ordered chain of stages
//! (pipeline). The slowest governing subscription bounds how far producers
//! may run ahead.

// Module naming follows project convention
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Dispatch;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}
pub mod error;

pub use error::{DispatcherError, Result};
pub use Core::Structs::{Position, PositionCodec, TermId};
pub use Dispatch::{
    BlockPeek, ClaimedBatch, ClaimedFragment, Dispatcher, DispatcherBuilder, DispatcherConfig,
    Fragment, Mode, Subscription,
};
