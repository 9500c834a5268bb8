//! Cross-session object linking.
//!
//! Joins a View to its ViewHolder by matching the paired tokens the two
//! clients were handed. Each side registers its half of an
//! [`EventPair`]; once both endpoints are initialized with their client
//! objects, the link resolves.
//!
//! The linker is a pure state machine: every mutation returns an ordered
//! list of [`LinkAction`]s for the caller (the engine) to replay against
//! the scene graph. Returning actions instead of firing callbacks keeps
//! the linker re-entrancy free — the original hazard of a failure
//! callback destroying the endpoint it is stored in simply cannot occur.
//!
//! Resolution order is a client-observable contract: the Export
//! (ViewHolder) side observes the link before the Import (View) side.

use log::warn;
use rustc_hash::FxHashMap;

use crate::dispatch::Dispatcher;
use crate::errors::{SessionError, SessionResult};
use crate::scene::ObjectKey;
use crate::sync::{EventPair, PeerClosedWatch};

/// Which half of a link an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    /// The exporting (ViewHolder) half.
    Export,
    /// The importing (View) half.
    Import,
}

/// An effect of a linker mutation, replayed by the engine against the
/// scene graph in list order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Both endpoints are initialized: the link is live. The export side
    /// must observe resolution first.
    Resolved {
        /// The ViewHolder-side object.
        export_object: ObjectKey,
        /// The View-side object.
        import_object: ObjectKey,
    },
    /// An endpoint's link can never resolve (peer destroyed or token
    /// closed); the endpoint has been removed from the linker.
    Failed {
        /// Which half failed.
        side: LinkSide,
        /// The failed endpoint's object.
        object: ObjectKey,
    },
}

struct Endpoint {
    // 0 once the peer is known dead; any later initialize fails
    // immediately.
    peer_koid: u64,
    object: Option<ObjectKey>,
}

struct UnresolvedEndpoint {
    // Declared before the token: the watch must deregister before the
    // token drops, so tearing down a pair does not fire its own waiters.
    _peer_death_watch: PeerClosedWatch,
    _token: EventPair,
}

/// Matches exported endpoints to imported ones by token peer ids.
#[derive(Default)]
pub struct ViewLinker {
    exports: FxHashMap<u64, Endpoint>,
    imports: FxHashMap<u64, Endpoint>,
    unresolved_exports: FxHashMap<u64, UnresolvedEndpoint>,
    unresolved_imports: FxHashMap<u64, UnresolvedEndpoint>,
}

impl ViewLinker {
    /// Creates an empty linker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered export endpoints.
    #[must_use]
    pub fn export_count(&self) -> usize {
        self.exports.len()
    }

    /// Number of registered import endpoints.
    #[must_use]
    pub fn import_count(&self) -> usize {
        self.imports.len()
    }

    /// Number of exports still waiting for their peer.
    #[must_use]
    pub fn unresolved_export_count(&self) -> usize {
        self.unresolved_exports.len()
    }

    /// Number of imports still waiting for their peer.
    #[must_use]
    pub fn unresolved_import_count(&self) -> usize {
        self.unresolved_imports.len()
    }

    /// Registers the exporting half of a token pair, returning the
    /// endpoint id.
    ///
    /// `on_peer_closed` fires (asynchronously) if the peer half of the
    /// token is closed before it is registered; the caller must route it
    /// back into [`on_peer_closed`](Self::on_peer_closed).
    pub fn register_export(
        &mut self,
        token: EventPair,
        dispatcher: &Dispatcher,
        on_peer_closed: impl FnOnce(u64) + 'static,
    ) -> SessionResult<u64> {
        Self::register(
            &mut self.exports,
            &mut self.unresolved_exports,
            token,
            dispatcher,
            on_peer_closed,
        )
    }

    /// Registers the importing half of a token pair, returning the
    /// endpoint id.
    pub fn register_import(
        &mut self,
        token: EventPair,
        dispatcher: &Dispatcher,
        on_peer_closed: impl FnOnce(u64) + 'static,
    ) -> SessionResult<u64> {
        Self::register(
            &mut self.imports,
            &mut self.unresolved_imports,
            token,
            dispatcher,
            on_peer_closed,
        )
    }

    fn register(
        endpoints: &mut FxHashMap<u64, Endpoint>,
        unresolved: &mut FxHashMap<u64, UnresolvedEndpoint>,
        token: EventPair,
        dispatcher: &Dispatcher,
        on_peer_closed: impl FnOnce(u64) + 'static,
    ) -> SessionResult<u64> {
        let koid = token.koid();
        let peer_koid = token.peer_koid();
        if endpoints.contains_key(&koid) {
            return Err(SessionError::DuplicateToken(koid));
        }

        // The peer may already be gone; the endpoint is still created so
        // a later initialize fails with a proper disconnect.
        let peer_alive = token.is_peer_alive();
        let watch = token.watch_peer_closed(dispatcher, move || on_peer_closed(koid));

        endpoints.insert(
            koid,
            Endpoint {
                peer_koid: if peer_alive { peer_koid } else { 0 },
                object: None,
            },
        );
        unresolved.insert(
            koid,
            UnresolvedEndpoint {
                _peer_death_watch: watch,
                _token: token,
            },
        );
        Ok(koid)
    }

    /// Supplies the client object for an endpoint, making it eligible for
    /// linking. If the peer endpoint is already initialized, the link
    /// resolves now.
    pub fn initialize(&mut self, koid: u64, side: LinkSide, object: ObjectKey) -> Vec<LinkAction> {
        let (endpoints, peers) = self.sides_mut(side);
        let Some(endpoint) = endpoints.get_mut(&koid) else {
            warn!("initialize of unknown link endpoint {koid}");
            return Vec::new();
        };
        debug_assert!(endpoint.object.is_none());
        endpoint.object = Some(object);

        // Peer died after the endpoint was created but before it was
        // initialized: report the failure immediately.
        let peer_koid = endpoint.peer_koid;
        if peer_koid == 0 {
            self.remove(koid, side);
            return vec![LinkAction::Failed { side, object }];
        }

        let peer_ready = peers
            .get(&peer_koid)
            .is_some_and(|peer| peer.object.is_some());
        if !peer_ready {
            return Vec::new();
        }

        let peer_object = peers
            .get(&peer_koid)
            .and_then(|peer| peer.object)
            .expect("peer object must exist after it was found initialized");

        // Both sides are live: drop the pending tokens and waiters, they
        // are no longer useful.
        let (unresolved, peer_unresolved) = self.unresolved_sides_mut(side);
        let own = unresolved.remove(&koid);
        let peer = peer_unresolved.remove(&peer_koid);
        debug_assert!(own.is_some() && peer.is_some());
        drop(own);
        drop(peer);

        let (export_object, import_object) = match side {
            LinkSide::Export => (object, peer_object),
            LinkSide::Import => (peer_object, object),
        };
        vec![LinkAction::Resolved {
            export_object,
            import_object,
        }]
    }

    /// Destroys an endpoint (its owning resource died). A linked,
    /// initialized peer observes the failure.
    pub fn destroy(&mut self, koid: u64, side: LinkSide) -> Vec<LinkAction> {
        let Some(endpoint) = self.side(side).get(&koid) else {
            warn!("destroy of unknown link endpoint {koid}");
            return Vec::new();
        };
        let peer_koid = endpoint.peer_koid;
        let peer_side = opposite(side);
        self.remove(koid, side);

        let mut actions = Vec::new();
        if let Some(peer) = self.side_mut(peer_side).get_mut(&peer_koid) {
            peer.peer_koid = 0;
            if let Some(peer_object) = peer.object {
                // An initialized peer's failure destroys it as well.
                self.remove(peer_koid, peer_side);
                actions.push(LinkAction::Failed {
                    side: peer_side,
                    object: peer_object,
                });
            }
        }
        actions
    }

    /// The peer half of an unresolved endpoint's token was closed.
    pub fn on_peer_closed(&mut self, koid: u64, side: LinkSide) -> Vec<LinkAction> {
        let Some(endpoint) = self.side_mut(side).get_mut(&koid) else {
            return Vec::new();
        };
        endpoint.peer_koid = 0;
        match endpoint.object {
            Some(object) => {
                self.remove(koid, side);
                vec![LinkAction::Failed { side, object }]
            }
            // Not initialized yet; the failure is delivered when
            // initialize() is eventually called.
            None => Vec::new(),
        }
    }

    fn side(&self, side: LinkSide) -> &FxHashMap<u64, Endpoint> {
        match side {
            LinkSide::Export => &self.exports,
            LinkSide::Import => &self.imports,
        }
    }

    fn side_mut(&mut self, side: LinkSide) -> &mut FxHashMap<u64, Endpoint> {
        match side {
            LinkSide::Export => &mut self.exports,
            LinkSide::Import => &mut self.imports,
        }
    }

    fn sides_mut(
        &mut self,
        side: LinkSide,
    ) -> (&mut FxHashMap<u64, Endpoint>, &mut FxHashMap<u64, Endpoint>) {
        match side {
            LinkSide::Export => (&mut self.exports, &mut self.imports),
            LinkSide::Import => (&mut self.imports, &mut self.exports),
        }
    }

    fn unresolved_sides_mut(
        &mut self,
        side: LinkSide,
    ) -> (
        &mut FxHashMap<u64, UnresolvedEndpoint>,
        &mut FxHashMap<u64, UnresolvedEndpoint>,
    ) {
        match side {
            LinkSide::Export => (&mut self.unresolved_exports, &mut self.unresolved_imports),
            LinkSide::Import => (&mut self.unresolved_imports, &mut self.unresolved_exports),
        }
    }

    fn remove(&mut self, koid: u64, side: LinkSide) {
        let _ = self.side_mut(side).remove(&koid);
        let _ = match side {
            LinkSide::Export => self.unresolved_exports.remove(&koid),
            LinkSide::Import => self.unresolved_imports.remove(&koid),
        };
    }
}

fn opposite(side: LinkSide) -> LinkSide {
    match side {
        LinkSide::Export => LinkSide::Import,
        LinkSide::Import => LinkSide::Export,
    }
}
