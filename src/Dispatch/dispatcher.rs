// src/Dispatch/dispatcher.rs

use std::fmt;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize};
use std::sync::{Arc, Weak};

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use super::appender::{LogBufferAppender, Reservation};
use super::builder::DispatcherBuilder;
use super::claimed::{batch_framed_length, ClaimedBatch, ClaimedFragment};
use super::subscription::Subscription;
use super::Structs::Dispatch_Structs::{DispatcherConfig, Mode};
use crate::error::{DispatcherError, Result};
use crate::Core::Buffer::layout::{checked_frame_length, HEADER_LENGTH};
use crate::Core::Buffer::LogBuffer;
use crate::Core::Structs::{Position, PositionCodec};

/// How subscriptions are organised. Chosen once, at construction.
pub(crate) enum Topology {
    Broadcast {
        subscriptions: RwLock<Vec<Arc<Subscription>>>,
        /// Mirrors `subscriptions.len()` so producers never take the lock.
        open_count: AtomicUsize,
        next_id: AtomicU32,
    },
    Pipeline {
        stages: Box<[Arc<Subscription>]>,
    },
}

/// State shared by every clone of a dispatcher and by its subscriptions.
pub(crate) struct DispatcherShared {
    pub(crate) name: String,
    pub(crate) log: LogBuffer,
    /// Owns the publisher position.
    pub(crate) appender: LogBufferAppender,
    /// No claim may end beyond this position.
    pub(crate) publisher_limit: CachePadded<AtomicU64>,
    pub(crate) window_length: u64,
    pub(crate) topology: Topology,
    pub(crate) closed: AtomicBool,
}

impl DispatcherShared {
    #[inline]
    pub(crate) fn publisher_position(&self) -> Position {
        self.appender.position()
    }

    #[inline]
    pub(crate) fn publisher_limit(&self) -> Position {
        Position::new(self.publisher_limit.load(Acquire))
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Acquire)
    }

    /// Broadcast without readers: nothing governs the publisher.
    fn is_free_running(&self) -> bool {
        match &self.topology {
            Topology::Broadcast { open_count, .. } => open_count.load(Acquire) == 0,
            Topology::Pipeline { .. } => false,
        }
    }

    /// Recompute the limit from the governing subscription(s). Only ever
    /// raises the limit, so a stale computation cannot undo a newer one.
    pub(crate) fn update_publisher_limit(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        let governing = match &self.topology {
            Topology::Broadcast { subscriptions, .. } => subscriptions
                .read()
                .iter()
                .map(|s| s.position().value())
                .min(),
            Topology::Pipeline { stages } => stages.last().map(|s| s.position().value()),
        };

        let base = governing.unwrap_or_else(|| self.appender.position().value());
        let proposed = base + self.window_length;
        self.publisher_limit.fetch_max(proposed, AcqRel) < proposed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DispatcherError::illegal_state(format!(
                "dispatcher '{}' is closed",
                self.name
            )));
        }
        Ok(())
    }

    /// Reserve `framed_length` bytes under the publisher limit.
    fn reserve(&self, framed_length: usize) -> Result<Reservation> {
        self.ensure_open()?;
        let backoff = Backoff::new();

        loop {
            let limit = self.publisher_limit.load(Acquire);

            // Flow-control gate: the next claim starts at or after the
            // publisher position, so this check needs no partition access.
            let result = if self.appender.position().value() + framed_length as u64 > limit {
                Err(DispatcherError::BackPressure)
            } else {
                self.appender
                    .claim(&self.log, framed_length, Position::new(limit))
            };

            match result {
                Ok(reservation) => return Ok(reservation),
                // No reader to wait for: the window only trails the
                // producers, so chase it until the claim fits.
                Err(DispatcherError::BackPressure) if self.is_free_running() && !self.is_closed() => {
                    self.update_publisher_limit();
                    backoff.spin();
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The log buffer dispatcher.
///
/// Producers call [`offer`](Dispatcher::offer), [`claim`](Dispatcher::claim)
/// or [`claim_batch`](Dispatcher::claim_batch) from any number of threads;
/// consumers poll [`Subscription`]s. Cloning is cheap and clones share all
/// state.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) shared: Arc<DispatcherShared>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    #[instrument(name = "dispatcher_create", skip(config), fields(name = %config.name, mode = ?config.mode))]
    pub fn from_config(config: DispatcherConfig) -> Result<Self> {
        config.validate()?;

        let log = LogBuffer::new(config.partition_count, config.partition_size)?;
        let window_length = config.effective_window_length() as u64;
        let mode = config.mode;
        let names = config.subscriptions;

        let shared = Arc::new_cyclic(|weak: &Weak<DispatcherShared>| {
            let initial: Vec<Arc<Subscription>> = names
                .iter()
                .enumerate()
                .map(|(id, name)| {
                    Arc::new(Subscription::new(id as u32, name.clone(), Position::ZERO, weak.clone()))
                })
                .collect();

            let topology = match mode {
                Mode::Broadcast => Topology::Broadcast {
                    open_count: AtomicUsize::new(initial.len()),
                    next_id: AtomicU32::new(initial.len() as u32),
                    subscriptions: RwLock::new(initial),
                },
                Mode::Pipeline => Topology::Pipeline {
                    stages: initial.into_boxed_slice(),
                },
            };

            DispatcherShared {
                name: config.name,
                log,
                appender: LogBufferAppender::new(),
                publisher_limit: CachePadded::new(AtomicU64::new(0)),
                window_length,
                topology,
                closed: AtomicBool::new(false),
            }
        });
        shared.update_publisher_limit();

        info!(
            partitions = shared.log.partition_count(),
            partition_size = shared.log.partition_size(),
            window_length,
            subscriptions = names.len(),
            "dispatcher created"
        );

        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn mode(&self) -> Mode {
        match self.shared.topology {
            Topology::Broadcast { .. } => Mode::Broadcast,
            Topology::Pipeline { .. } => Mode::Pipeline,
        }
    }

    pub fn window_length(&self) -> usize {
        self.shared.window_length as usize
    }

    /// Largest payload a single frame can carry.
    pub fn max_fragment_length(&self) -> usize {
        self.shared.log.partition_size() - HEADER_LENGTH
    }

    pub fn log_buffer(&self) -> &LogBuffer {
        &self.shared.log
    }

    pub fn position_codec(&self) -> &PositionCodec {
        self.shared.log.codec()
    }

    pub fn publisher_position(&self) -> Position {
        self.shared.publisher_position()
    }

    pub fn publisher_limit(&self) -> Position {
        self.shared.publisher_limit()
    }

    /// Recompute the publisher limit. Returns whether it moved.
    pub fn update_publisher_limit(&self) -> bool {
        self.shared.update_publisher_limit()
    }

    /// Reserve room for a `length`-byte payload.
    pub fn claim(&self, length: usize, stream_id: u32) -> Result<ClaimedFragment<'_>> {
        let framed_length = checked_frame_length(length, self.shared.log.partition_size())?;
        let reservation = self.shared.reserve(framed_length)?;
        Ok(ClaimedFragment::new(&self.shared.log, reservation, length, stream_id))
    }

    /// Claim, copy and commit in one call. Returns the frame's position.
    pub fn offer(&self, payload: &[u8], stream_id: u32) -> Result<Position> {
        let mut fragment = self.claim(payload.len(), stream_id)?;
        fragment.buffer_mut().copy_from_slice(payload);
        Ok(fragment.commit())
    }

    /// Reserve one contiguous region for up to `max_fragment_count` fragments
    /// carrying `total_payload_length` bytes between them.
    pub fn claim_batch(&self, max_fragment_count: usize, total_payload_length: usize) -> Result<ClaimedBatch<'_>> {
        if max_fragment_count == 0 {
            return Err(DispatcherError::illegal_state(
                "a batch must hold at least one fragment",
            ));
        }

        let partition_size = self.shared.log.partition_size();
        let framed_length = if max_fragment_count > partition_size || total_payload_length > partition_size {
            usize::MAX
        } else {
            batch_framed_length(max_fragment_count, total_payload_length)
        };
        if framed_length > partition_size {
            return Err(DispatcherError::FrameTooLarge {
                framed_length,
                partition_size,
            });
        }

        let reservation = self.shared.reserve(framed_length)?;
        Ok(ClaimedBatch::new(&self.shared.log, reservation, max_fragment_count))
    }

    /// Open a new subscription starting at the current publisher position.
    #[instrument(name = "dispatcher_open_subscription", skip(self), fields(dispatcher = %self.shared.name))]
    pub fn open_subscription(&self, name: &str) -> Result<Arc<Subscription>> {
        let Topology::Broadcast {
            subscriptions,
            open_count,
            next_id,
        } = &self.shared.topology
        else {
            return Err(DispatcherError::illegal_state(
                "Cannot open subscriptions in pipelining mode",
            ));
        };
        self.shared.ensure_open()?;

        if name.is_empty() {
            return Err(DispatcherError::illegal_state("subscription name must not be empty"));
        }

        let mut subscriptions = subscriptions.write();
        if subscriptions.iter().any(|s| s.name() == name) {
            return Err(DispatcherError::illegal_state(format!(
                "subscription '{name}' is already open"
            )));
        }

        let id = next_id.fetch_add(1, Relaxed);
        let position = self.shared.publisher_position();
        let subscription = Arc::new(Subscription::new(
            id,
            name.to_owned(),
            position,
            Arc::downgrade(&self.shared),
        ));
        subscriptions.push(Arc::clone(&subscription));
        open_count.fetch_add(1, AcqRel);

        debug!(id, %position, "subscription opened");
        Ok(subscription)
    }

    #[instrument(name = "dispatcher_close_subscription", skip_all, fields(dispatcher = %self.shared.name, subscription = %subscription.name()))]
    pub fn close_subscription(&self, subscription: &Subscription) -> Result<()> {
        let Topology::Broadcast {
            subscriptions,
            open_count,
            ..
        } = &self.shared.topology
        else {
            return Err(DispatcherError::illegal_state(
                "Cannot close subscriptions in pipelining mode",
            ));
        };

        {
            let mut subscriptions = subscriptions.write();
            let Some(index) = subscriptions
                .iter()
                .position(|s| std::ptr::eq(Arc::as_ptr(s), subscription))
            else {
                return Err(DispatcherError::illegal_state(format!(
                    "subscription '{}' is not open on dispatcher '{}'",
                    subscription.name(),
                    self.shared.name
                )));
            };
            subscriptions.remove(index);
            open_count.fetch_sub(1, AcqRel);
        }

        subscription.mark_closed();
        // the closed one may have been the slowest
        self.shared.update_publisher_limit();

        debug!(position = %subscription.position(), "subscription closed");
        Ok(())
    }

    pub fn get_subscription_by_name(&self, name: &str) -> Option<Arc<Subscription>> {
        match &self.shared.topology {
            Topology::Broadcast { subscriptions, .. } => {
                subscriptions.read().iter().find(|s| s.name() == name).cloned()
            }
            Topology::Pipeline { stages } => stages.iter().find(|s| s.name() == name).cloned(),
        }
    }

    /// All open subscriptions; pipeline stages in stage order.
    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        match &self.shared.topology {
            Topology::Broadcast { subscriptions, .. } => subscriptions.read().clone(),
            Topology::Pipeline { stages } => stages.to_vec(),
        }
    }

    pub fn subscription_count(&self) -> usize {
        match &self.shared.topology {
            Topology::Broadcast { open_count, .. } => open_count.load(Acquire),
            Topology::Pipeline { stages } => stages.len(),
        }
    }

    /// Stop accepting claims and deliveries. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, AcqRel) {
            return;
        }
        info!(
            name = %self.shared.name,
            publisher_position = %self.shared.publisher_position(),
            "dispatcher closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_dispatcher(self, f)
    }
}
