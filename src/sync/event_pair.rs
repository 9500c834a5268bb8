//! Paired link tokens.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dispatch::Dispatcher;

static NEXT_KOID: AtomicU64 = AtomicU64::new(1);

struct PeerWaiter {
    dispatcher: Dispatcher,
    callback: Box<dyn FnOnce()>,
}

struct PairState {
    alive: [bool; 2],
    koids: [u64; 2],
    // Waiter registered by side `i`, fired when side `1 - i` closes.
    peer_closed_waiters: [Option<PeerWaiter>; 2],
}

/// One half of a paired token object.
///
/// The two halves of a pair carry process-unique ids that reference each
/// other, which is what the view linker uses to match a View to its
/// ViewHolder. The payload is otherwise opaque.
///
/// Dropping a half "closes" it: a peer-closed waiter registered on the
/// surviving half fires, mirroring kernel-object peer-death
/// notification. Closing is terminal; halves cannot be re-opened.
pub struct EventPair {
    state: Rc<RefCell<PairState>>,
    side: usize,
}

impl EventPair {
    /// Creates a connected pair of token halves.
    #[must_use]
    pub fn create() -> (Self, Self) {
        let koid = NEXT_KOID.fetch_add(2, Ordering::Relaxed);
        let state = Rc::new(RefCell::new(PairState {
            alive: [true, true],
            koids: [koid, koid + 1],
            peer_closed_waiters: [None, None],
        }));
        (
            Self {
                state: Rc::clone(&state),
                side: 0,
            },
            Self { state, side: 1 },
        )
    }

    /// Process-unique id of this half.
    #[must_use]
    pub fn koid(&self) -> u64 {
        self.state.borrow().koids[self.side]
    }

    /// Process-unique id of the peer half.
    #[must_use]
    pub fn peer_koid(&self) -> u64 {
        self.state.borrow().koids[1 - self.side]
    }

    /// Returns `true` while the peer half has not been dropped.
    #[must_use]
    pub fn is_peer_alive(&self) -> bool {
        self.state.borrow().alive[1 - self.side]
    }

    /// Registers `callback` to fire (asynchronously, on `dispatcher`) when
    /// the peer half is dropped. Replaces any previous registration.
    ///
    /// If the peer is already gone the callback is posted immediately.
    /// Dropping the returned watch cancels the registration.
    pub fn watch_peer_closed(
        &self,
        dispatcher: &Dispatcher,
        callback: impl FnOnce() + 'static,
    ) -> PeerClosedWatch {
        let mut state = self.state.borrow_mut();
        if !state.alive[1 - self.side] {
            dispatcher.post(callback);
            return PeerClosedWatch {
                state: Weak::new(),
                side: self.side,
            };
        }
        state.peer_closed_waiters[self.side] = Some(PeerWaiter {
            dispatcher: dispatcher.clone(),
            callback: Box::new(callback),
        });
        PeerClosedWatch {
            state: Rc::downgrade(&self.state),
            side: self.side,
        }
    }
}

impl Drop for EventPair {
    fn drop(&mut self) {
        let waiter = {
            let mut state = self.state.borrow_mut();
            state.alive[self.side] = false;
            state.peer_closed_waiters[1 - self.side].take()
        };
        if let Some(waiter) = waiter {
            waiter.dispatcher.post(waiter.callback);
        }
    }
}

impl std::fmt::Debug for EventPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPair")
            .field("koid", &self.koid())
            .field("peer_koid", &self.peer_koid())
            .field("peer_alive", &self.is_peer_alive())
            .finish()
    }
}

/// Guard for a pending [`EventPair::watch_peer_closed`] registration.
pub struct PeerClosedWatch {
    state: Weak<RefCell<PairState>>,
    side: usize,
}

impl Drop for PeerClosedWatch {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.borrow_mut().peer_closed_waiters[self.side] = None;
        }
    }
}
