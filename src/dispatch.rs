//! Cooperative Dispatcher
//!
//! The compositor core is single-threaded: every task runs to completion
//! before the next one starts. This module provides the dispatcher that
//! drives it — a FIFO of ready tasks plus a deadline-ordered heap of
//! timed wakeups.
//!
//! The only suspension points in the core are registered here as one-shot
//! callbacks: acquire-fence readiness, scheduled frame wakeups,
//! render-finished events, and retired events. Nothing ever blocks the
//! dispatcher thread.
//!
//! # Time bases
//!
//! - **Monotonic** ([`Dispatcher::new`]): `now()` is derived from
//!   `std::time::Instant`, for production use.
//! - **Manual** ([`Dispatcher::new_manual`]): time only moves when the
//!   test calls [`Dispatcher::advance_to`] / [`Dispatcher::advance_by`],
//!   which makes frame-scheduling tests fully deterministic.
//!
//! # Example
//!
//! ```rust
//! use prism::dispatch::Dispatcher;
//!
//! let dispatcher = Dispatcher::new_manual();
//! let wakeup = dispatcher.schedule_wakeup(1_000, || println!("tick"));
//! dispatcher.advance_to(2_000); // fires the wakeup
//! drop(wakeup);
//! ```

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Instant;

/// A point in time, in nanoseconds on the dispatcher's monotonic clock.
pub type Nanos = i64;

/// One millisecond in [`Nanos`].
pub const MILLISECOND: Nanos = 1_000_000;

/// One second in [`Nanos`].
pub const SECOND: Nanos = 1_000_000_000;

type Task = Box<dyn FnOnce()>;

enum TimeBase {
    Monotonic { origin: Instant },
    Manual { now: Cell<Nanos> },
}

struct TimerEntry {
    deadline: Nanos,
    seq: u64,
    cancelled: Rc<Cell<bool>>,
    task: Task,
}

// Min-heap ordering by (deadline, insertion order). Only the keys
// participate; two entries never compare equal unless they are the same
// entry.
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct State {
    ready: VecDeque<Task>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
}

/// Cancellation handle for a wakeup scheduled with
/// [`Dispatcher::schedule_wakeup`].
///
/// The wakeup stays armed when the handle is dropped; call
/// [`WakeupHandle::cancel`] to disarm it.
pub struct WakeupHandle {
    cancelled: Rc<Cell<bool>>,
}

impl WakeupHandle {
    /// Disarms the wakeup. Has no effect if it already fired.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Returns `true` if the wakeup has neither fired nor been cancelled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        // Two strong refs: ours and the heap entry's. Once the entry runs
        // (or is skipped), its ref is gone.
        !self.cancelled.get() && Rc::strong_count(&self.cancelled) > 1
    }
}

/// Single-threaded cooperative dispatcher handle.
///
/// Handles are cheap to clone and all refer to the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    time: Rc<TimeBase>,
    state: Rc<RefCell<State>>,
}

/// Weak dispatcher reference, for callbacks that must not keep the
/// dispatcher alive.
#[derive(Clone)]
pub struct WeakDispatcher {
    time: Weak<TimeBase>,
    state: Weak<RefCell<State>>,
}

impl WeakDispatcher {
    /// Upgrades back to a [`Dispatcher`] if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Dispatcher> {
        Some(Dispatcher {
            time: self.time.upgrade()?,
            state: self.state.upgrade()?,
        })
    }
}

impl Dispatcher {
    fn with_time(time: TimeBase) -> Self {
        Self {
            time: Rc::new(time),
            state: Rc::new(RefCell::new(State {
                ready: VecDeque::new(),
                timers: BinaryHeap::new(),
                next_seq: 0,
            })),
        }
    }

    /// Creates a dispatcher backed by the process monotonic clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_time(TimeBase::Monotonic {
            origin: Instant::now(),
        })
    }

    /// Creates a dispatcher whose clock only moves via
    /// [`advance_to`](Self::advance_to) / [`advance_by`](Self::advance_by).
    #[must_use]
    pub fn new_manual() -> Self {
        Self::with_time(TimeBase::Manual { now: Cell::new(0) })
    }

    /// Downgrades to a [`WeakDispatcher`].
    #[must_use]
    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            time: Rc::downgrade(&self.time),
            state: Rc::downgrade(&self.state),
        }
    }

    /// Returns the current time in nanoseconds.
    #[must_use]
    pub fn now(&self) -> Nanos {
        match &*self.time {
            TimeBase::Monotonic { origin } => origin.elapsed().as_nanos() as Nanos,
            TimeBase::Manual { now } => now.get(),
        }
    }

    /// Enqueues a task to run on the next [`run_until_idle`](Self::run_until_idle).
    pub fn post(&self, task: impl FnOnce() + 'static) {
        self.state.borrow_mut().ready.push_back(Box::new(task));
    }

    /// Schedules `task` to run at or after `deadline`.
    ///
    /// A deadline at or before `now()` fires on the next turn of the
    /// dispatcher, never synchronously.
    pub fn schedule_wakeup(&self, deadline: Nanos, task: impl FnOnce() + 'static) -> WakeupHandle {
        let cancelled = Rc::new(Cell::new(false));
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.push(Reverse(TimerEntry {
            deadline,
            seq,
            cancelled: Rc::clone(&cancelled),
            task: Box::new(task),
        }));
        WakeupHandle { cancelled }
    }

    /// Runs posted tasks and due timers until there is nothing left that
    /// can run at the current time. Returns the number of tasks executed.
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        loop {
            let next = self.take_runnable();
            match next {
                Some(task) => {
                    task();
                    executed += 1;
                }
                None => return executed,
            }
        }
    }

    /// Advances a manual clock to `deadline`, firing every wakeup that
    /// becomes due along the way, in deadline order.
    ///
    /// # Panics
    ///
    /// Panics on a monotonic-clock dispatcher: real time cannot be set.
    pub fn advance_to(&self, deadline: Nanos) {
        let TimeBase::Manual { now } = &*self.time else {
            panic!("advance_to requires a manual-clock dispatcher");
        };
        loop {
            self.run_until_idle();
            let next_deadline = {
                let state = self.state.borrow();
                state.timers.peek().map(|Reverse(entry)| entry.deadline)
            };
            match next_deadline {
                Some(t) if t <= deadline => {
                    if t > now.get() {
                        now.set(t);
                    }
                }
                _ => break,
            }
        }
        if deadline > now.get() {
            now.set(deadline);
        }
        self.run_until_idle();
    }

    /// Advances a manual clock by `delta` nanoseconds. See
    /// [`advance_to`](Self::advance_to).
    pub fn advance_by(&self, delta: Nanos) {
        self.advance_to(self.now() + delta);
    }

    /// Pops one runnable task: a ready task first, otherwise a due timer.
    fn take_runnable(&self) -> Option<Task> {
        let now = self.now();
        let mut state = self.state.borrow_mut();
        if let Some(task) = state.ready.pop_front() {
            return Some(task);
        }
        while let Some(Reverse(entry)) = state.timers.peek() {
            if entry.deadline > now {
                break;
            }
            let Reverse(entry) = state
                .timers
                .pop()
                .expect("timer heap must be non-empty after peek");
            if !entry.cancelled.get() {
                return Some(entry.task);
            }
        }
        None
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
