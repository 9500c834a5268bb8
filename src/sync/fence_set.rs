//! Acquire-fence set listener.

use std::cell::RefCell;
use std::rc::Rc;

use crate::dispatch::Dispatcher;

use super::{Fence, FenceWatch};

struct SetState {
    pending: usize,
    callback: Option<Box<dyn FnOnce()>>,
    // Held only to keep the per-fence waits registered; dropped as a
    // group when the set fires or the listener is destroyed.
    watches: Vec<FenceWatch>,
}

/// Waits for every fence in a set of acquire fences to be signalled.
///
/// A session constructs one listener per scheduled update; when the whole
/// set is ready, the registered callback asks the frame scheduler to
/// schedule the update. Destroying the listener (session teardown)
/// cancels the wait and the callback never fires.
pub struct FenceSetListener {
    fences: Vec<Fence>,
    state: Rc<RefCell<SetState>>,
}

impl FenceSetListener {
    /// Creates a listener over `fences`. An empty set is trivially ready.
    #[must_use]
    pub fn new(fences: Vec<Fence>) -> Self {
        Self {
            fences,
            state: Rc::new(RefCell::new(SetState {
                pending: 0,
                callback: None,
                watches: Vec::new(),
            })),
        }
    }

    /// Returns `true` if every fence in the set has been signalled.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.fences.iter().all(Fence::is_signalled)
    }

    /// Registers `callback` to run once the whole set is signalled.
    ///
    /// The callback fires at most once, asynchronously on `dispatcher`.
    /// Calling this a second time replaces the previous registration.
    pub fn wait_ready_async(&self, dispatcher: &Dispatcher, callback: impl FnOnce() + 'static) {
        let unsignalled: Vec<&Fence> = self
            .fences
            .iter()
            .filter(|fence| !fence.is_signalled())
            .collect();

        if unsignalled.is_empty() {
            dispatcher.post(callback);
            return;
        }

        {
            let mut state = self.state.borrow_mut();
            state.pending = unsignalled.len();
            state.callback = Some(Box::new(callback));
            state.watches.clear();
        }

        let mut watches = Vec::with_capacity(unsignalled.len());
        for fence in unsignalled {
            let state = Rc::clone(&self.state);
            watches.push(fence.wait_async(dispatcher, move || {
                let callback = {
                    let mut state = state.borrow_mut();
                    state.pending -= 1;
                    if state.pending == 0 {
                        state.watches.clear();
                        state.callback.take()
                    } else {
                        None
                    }
                };
                if let Some(callback) = callback {
                    callback();
                }
            }));
        }
        self.state.borrow_mut().watches = watches;
    }
}

impl std::fmt::Debug for FenceSetListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FenceSetListener")
            .field("fences", &self.fences.len())
            .field("ready", &self.ready())
            .finish()
    }
}
