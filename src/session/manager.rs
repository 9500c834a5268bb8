//! Session lifecycle management.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::dispatch::Dispatcher;
use crate::scene::SessionId;

use super::session::{Session, UpdateScheduler};

/// Owns every live [`Session`] and hands out ids.
#[derive(Default)]
pub struct SessionManager {
    sessions: FxHashMap<SessionId, Rc<RefCell<Session>>>,
    next_session_id: SessionId,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: FxHashMap::default(),
            next_session_id: 1,
        }
    }

    /// Creates a session bound to `dispatcher` and `scheduler`.
    pub fn create_session(
        &mut self,
        dispatcher: Dispatcher,
        scheduler: Weak<dyn UpdateScheduler>,
    ) -> Rc<RefCell<Session>> {
        let id = self.next_session_id;
        self.next_session_id += 1;
        let session = Rc::new(RefCell::new(Session::new(id, dispatcher, scheduler)));
        let existing = self.sessions.insert(id, Rc::clone(&session));
        debug_assert!(existing.is_none());
        session
    }

    /// Looks up a session by id.
    #[must_use]
    pub fn find_session(&self, id: SessionId) -> Option<Rc<RefCell<Session>>> {
        self.sessions.get(&id).cloned()
    }

    /// Removes a session, returning it for teardown.
    pub fn remove_session(&mut self, id: SessionId) -> Option<Rc<RefCell<Session>>> {
        self.sessions.remove(&id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Iterates over the live sessions.
    pub fn sessions(&self) -> impl Iterator<Item = (&SessionId, &Rc<RefCell<Session>>)> {
        self.sessions.iter()
    }
}
