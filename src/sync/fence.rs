//! One-shot fences with asynchronous waits.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::dispatch::Dispatcher;

struct Waiter {
    id: u64,
    dispatcher: Dispatcher,
    callback: Box<dyn FnOnce()>,
}

struct FenceState {
    signalled: bool,
    next_waiter_id: u64,
    waiters: Vec<Waiter>,
}

/// A single-direction, one-shot signal.
///
/// Created unsignalled, a fence transitions exactly once to signalled.
/// Handles are cheap to duplicate; every duplicate observes the same
/// underlying state, which is how one copy ends up with the driver while
/// the core keeps another to watch.
///
/// Waits are asynchronous: the callback fires on the dispatcher it was
/// registered with, on the turn after the signalling transition. A wait
/// may be cancelled any time before the signal by dropping (or
/// explicitly cancelling) its [`FenceWatch`].
#[derive(Clone)]
pub struct Fence {
    state: Rc<RefCell<FenceState>>,
}

impl Fence {
    /// Creates a new unsignalled fence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(FenceState {
                signalled: false,
                next_waiter_id: 0,
                waiters: Vec::new(),
            })),
        }
    }

    /// Duplicates the handle. Both handles observe the same fence.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Returns `true` if the two handles refer to the same fence.
    #[must_use]
    pub fn same_fence(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Returns `true` once the fence has been signalled.
    #[must_use]
    pub fn is_signalled(&self) -> bool {
        self.state.borrow().signalled
    }

    /// Signals the fence, firing every registered wait on its dispatcher.
    ///
    /// Signalling an already-signalled fence is a no-op.
    pub fn signal(&self) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if state.signalled {
                return;
            }
            state.signalled = true;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            waiter.dispatcher.post(waiter.callback);
        }
    }

    /// Registers `callback` to run once the fence is signalled.
    ///
    /// If the fence is already signalled, the callback is posted
    /// immediately (it still runs asynchronously, never inline). The
    /// returned [`FenceWatch`] cancels the wait when dropped.
    pub fn wait_async(
        &self,
        dispatcher: &Dispatcher,
        callback: impl FnOnce() + 'static,
    ) -> FenceWatch {
        let mut state = self.state.borrow_mut();
        if state.signalled {
            dispatcher.post(callback);
            return FenceWatch {
                state: Weak::new(),
                id: 0,
            };
        }
        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        state.waiters.push(Waiter {
            id,
            dispatcher: dispatcher.clone(),
            callback: Box::new(callback),
        });
        FenceWatch {
            state: Rc::downgrade(&self.state),
            id,
        }
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("signalled", &self.is_signalled())
            .finish()
    }
}

/// Guard for a pending [`Fence::wait_async`] registration.
///
/// Dropping the watch before the fence signals cancels the wait; the
/// callback will never fire.
pub struct FenceWatch {
    state: Weak<RefCell<FenceState>>,
    id: u64,
}

impl FenceWatch {
    /// Returns `true` while the wait is registered and the fence has not
    /// yet signalled.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.state.upgrade().is_some_and(|state| {
            let state = state.borrow();
            !state.signalled && state.waiters.iter().any(|w| w.id == self.id)
        })
    }

    /// Cancels the wait. Has no effect once the fence has signalled.
    pub fn cancel(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.borrow_mut().waiters.retain(|w| w.id != self.id);
        }
        self.state = Weak::new();
    }
}

impl Drop for FenceWatch {
    fn drop(&mut self) {
        self.cancel();
    }
}
