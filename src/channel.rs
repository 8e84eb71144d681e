//! Bounded, blocking FIFO channel.
//!
//! A [`Channel`] is guarded by a single mutex with two condition variables:
//! `not_full` wakes producers once space frees up and `not_empty` wakes
//! consumers once an item (or a close signal) arrives.
//!
//! Close signals used by stage workers are not items: they are counted
//! separately and only handed out once the item backlog is empty, so a worker
//! always drains every buffered item before it stops.

use crate::error::{ConsumeError, ProduceError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// What a stage worker pulled from its input channel
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Work<T> {
    Item(T),
    Close,
}

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
    /// Close signals not yet picked up by a worker
    pending_close: usize,
}

/// A thread-safe FIFO mailbox with a fixed capacity.
///
/// A capacity of `0` means the channel is unbounded.
#[derive(Debug)]
pub struct Channel<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
    writers: AtomicUsize,
}

impl<T> Channel<T> {
    /// Create a channel holding at most `capacity` items (`0` = unbounded)
    pub fn new(capacity: usize) -> Self {
        let queue = if capacity == 0 {
            VecDeque::new()
        } else {
            VecDeque::with_capacity(capacity)
        };
        Self {
            state: Mutex::new(State {
                queue,
                closed: false,
                pending_close: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
            writers: AtomicUsize::new(0),
        }
    }

    /// Create a channel without a capacity limit
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Push an item, waiting up to `timeout` for free space.
    ///
    /// `None` waits indefinitely, `Some(Duration::ZERO)` never waits.
    /// Producing on a closed channel fails immediately, even if space is left.
    pub fn produce(&self, item: T, timeout: Option<Duration>) -> Result<(), ProduceError<T>> {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(ProduceError::Closed(item));
            }
            if !self.is_full(&state) {
                state.queue.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            if !wait(&self.not_full, &mut state, deadline) {
                if state.closed {
                    return Err(ProduceError::Closed(item));
                }
                if self.is_full(&state) {
                    return Err(ProduceError::Full(item));
                }
                // Space freed up right at the deadline
                state.queue.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
        }
    }

    /// Push an item without waiting
    pub fn try_produce(&self, item: T) -> Result<(), ProduceError<T>> {
        self.produce(item, Some(Duration::ZERO))
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// A closed channel keeps returning its buffered items; only once it is
    /// drained does this report [`ConsumeError::Closed`].
    pub fn consume(&self, timeout: Option<Duration>) -> Result<T, ConsumeError> {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(ConsumeError::Closed);
            }
            if !wait(&self.not_empty, &mut state, deadline) && state.queue.is_empty() {
                return Err(if state.closed {
                    ConsumeError::Closed
                } else {
                    ConsumeError::Empty
                });
            }
        }
    }

    /// Pop an item without waiting
    pub fn try_consume(&self) -> Result<T, ConsumeError> {
        self.consume(Some(Duration::ZERO))
    }

    /// Close the channel. Idempotent.
    ///
    /// Blocked producers fail with `Closed`; blocked consumers drain what is
    /// left and then see `Closed`.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of buffered items. Racy: only use it for diagnostics.
    pub fn size_approx(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Capacity fixed at construction (`0` = unbounded)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffer utilization as a percentage (0-100). Always 0 when unbounded.
    pub fn utilization(&self) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        ((self.size_approx() * 100) / self.capacity).min(100) as u32
    }

    /// Snapshot of the channel for diagnostics
    pub fn stats(&self) -> ChannelStats {
        let state = self.state.lock();
        ChannelStats {
            len: state.queue.len(),
            capacity: self.capacity,
            closed: state.closed,
        }
    }

    /// Register one more writer. The channel is closed when the last
    /// registered writer calls [`Channel::release_writer`].
    pub fn register_writer(&self) {
        self.writers.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one writer registration, closing the channel if it was the last.
    /// Returns `true` if this call closed the channel.
    pub fn release_writer(&self) -> bool {
        let previous = self
            .writers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous == 1 {
            self.close();
            true
        } else {
            false
        }
    }

    /// Queue `count` close signals for stage workers.
    ///
    /// Signals ignore both the capacity and the closed flag: they must reach
    /// workers of a stage whose upstream has already been closed.
    pub(crate) fn signal_close(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.pending_close += count;
        drop(state);
        self.not_empty.notify_all();
    }

    /// Blocking receive used by stage workers.
    ///
    /// Returns buffered items first and a close signal only once the backlog
    /// is empty. The closed flag is ignored: workers stop on signals only.
    pub(crate) fn next_work(&self) -> Work<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Work::Item(item);
            }
            if state.pending_close > 0 {
                state.pending_close -= 1;
                return Work::Close;
            }
            self.not_empty.wait(&mut state);
        }
    }

    fn is_full(&self, state: &State<T>) -> bool {
        self.capacity != 0 && state.queue.len() >= self.capacity
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Point-in-time view of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub len: usize,
    pub capacity: usize,
    pub closed: bool,
}

/// Type-erased access to a channel, so channels of different item types can
/// be kept and reported on side by side.
pub trait ChannelHandle: Send + Sync {
    fn stats(&self) -> ChannelStats;
    fn close(&self);
}

impl<T: Send> ChannelHandle for Channel<T> {
    fn stats(&self) -> ChannelStats {
        Channel::stats(self)
    }

    fn close(&self) {
        Channel::close(self)
    }
}

pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now().checked_add(t).unwrap_or_else(far_future))
}

fn far_future() -> Instant {
    // Roughly 30 years, enough to never fire while staying representable
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365 * 30)
}

/// Wait on `condvar` until notified or `deadline` passes.
/// Returns `false` once the deadline has been reached.
fn wait<T>(condvar: &Condvar, guard: &mut MutexGuard<'_, State<T>>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            condvar.wait(guard);
            true
        }
        Some(deadline) => {
            if Instant::now() >= deadline {
                return false;
            }
            !condvar.wait_until(guard, deadline).timed_out()
        }
    }
}
