//! Session & Update Queue Tests
//!
//! Tests for:
//! - Present ordering validation
//! - Acquire-fence gating of update application
//! - The one-frame release-fence lag
//! - Session-fatal command failures
//! - Resource map vs. graph lifetime

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use prism::dispatch::{Dispatcher, Nanos};
use prism::errors::SessionError;
use prism::link::{LinkSide, ViewLinker};
use prism::scene::SessionId;
use prism::session::command::{Command, ResourceSpec};
use prism::session::{CommandContext, Session, UpdateScheduler};
use prism::sync::{CommandBufferSequencer, Fence, ReleaseFenceSignaller};
use prism::SceneGraph;

#[derive(Default)]
struct RecordingScheduler {
    requests: RefCell<Vec<(Nanos, SessionId)>>,
}

impl UpdateScheduler for RecordingScheduler {
    fn schedule_update_for_session(&self, presentation_time: Nanos, session_id: SessionId) {
        self.requests
            .borrow_mut()
            .push((presentation_time, session_id));
    }
}

struct Fixture {
    dispatcher: Dispatcher,
    scheduler: Rc<RecordingScheduler>,
    graph: SceneGraph,
    linker: ViewLinker,
    signaller: ReleaseFenceSignaller,
    session: Session,
}

impl Fixture {
    fn new() -> Self {
        let dispatcher = Dispatcher::new_manual();
        let scheduler = Rc::new(RecordingScheduler::default());
        let session = Session::new(
            1,
            dispatcher.clone(),
            Rc::downgrade(&scheduler) as Weak<dyn UpdateScheduler>,
        );
        Self {
            dispatcher,
            scheduler,
            graph: SceneGraph::new(),
            linker: ViewLinker::new(),
            signaller: ReleaseFenceSignaller::new(CommandBufferSequencer::new()),
            session,
        }
    }

    fn schedule(&mut self, time: Nanos, commands: Vec<Command>) {
        self.schedule_with_fences(time, commands, Vec::new(), Vec::new());
    }

    fn schedule_with_fences(
        &mut self,
        time: Nanos,
        commands: Vec<Command>,
        acquires: Vec<Fence>,
        releases: Vec<Fence>,
    ) {
        self.session
            .schedule_update(time, commands, acquires, releases, Box::new(|_| {}))
            .expect("schedule_update");
    }

    fn apply(&mut self, target: Nanos) -> prism::session::ApplyUpdateResult {
        let hook: Rc<dyn Fn(u64, LinkSide)> = Rc::new(|_, _| {});
        let mut link_actions = Vec::new();
        let mut ctx = CommandContext {
            graph: &mut self.graph,
            linker: &mut self.linker,
            release_signaller: &mut self.signaller,
            dispatcher: &self.dispatcher,
            link_peer_closed: &hook,
            link_actions: &mut link_actions,
        };
        self.session.apply_scheduled_updates(&mut ctx, target)
    }
}

// ============================================================================
// Present ordering
// ============================================================================

#[test]
fn presents_with_equal_times_are_accepted() {
    let mut fixture = Fixture::new();
    fixture.schedule(1, Vec::new());
    fixture.schedule(1, Vec::new());
    assert_eq!(fixture.session.scheduled_update_count(), 2);
}

#[test]
fn out_of_order_present_is_rejected_and_discarded() {
    let mut fixture = Fixture::new();
    fixture.schedule(1, Vec::new());
    let result = fixture.session.schedule_update(
        0,
        Vec::new(),
        Vec::new(),
        Vec::new(),
        Box::new(|_| {}),
    );
    assert!(matches!(
        result,
        Err(SessionError::OutOfOrderPresent {
            requested: 0,
            last_scheduled: 1
        })
    ));
    assert_eq!(fixture.session.scheduled_update_count(), 1);
}

#[test]
fn present_earlier_than_an_applied_update_is_rejected() {
    let mut fixture = Fixture::new();
    fixture.schedule(5, Vec::new());
    let results = fixture.apply(10);
    assert!(results.success);
    assert_eq!(fixture.session.last_applied_update_presentation_time(), 5);

    let result = fixture.session.schedule_update(
        4,
        Vec::new(),
        Vec::new(),
        Vec::new(),
        Box::new(|_| {}),
    );
    assert!(matches!(result, Err(SessionError::OutOfOrderPresent { .. })));
}

// ============================================================================
// Update application
// ============================================================================

#[test]
fn due_updates_apply_and_need_a_render() {
    let mut fixture = Fixture::new();
    fixture.schedule(
        0,
        vec![Command::CreateResource {
            id: 1,
            spec: ResourceSpec::EntityNode,
        }],
    );
    let results = fixture.apply(10);
    assert!(results.success);
    assert!(results.needs_render);
    assert!(results.all_fences_ready);
    assert_eq!(results.callbacks.len(), 1);
    assert!(fixture.session.resolve(1).is_ok());
}

#[test]
fn updates_at_or_after_the_target_stay_queued() {
    let mut fixture = Fixture::new();
    fixture.schedule(10, Vec::new());
    let results = fixture.apply(10);
    assert!(results.success);
    assert!(!results.needs_render);
    assert_eq!(fixture.session.scheduled_update_count(), 1);
}

#[test]
fn acquire_fences_gate_application() {
    let mut fixture = Fixture::new();
    let acquire = Fence::new();
    fixture.schedule_with_fences(
        0,
        vec![Command::CreateResource {
            id: 1,
            spec: ResourceSpec::EntityNode,
        }],
        vec![acquire.duplicate()],
        Vec::new(),
    );

    // The scheduler is only notified once the fences are ready.
    fixture.dispatcher.run_until_idle();
    assert!(fixture.scheduler.requests.borrow().is_empty());

    let results = fixture.apply(10);
    assert!(results.success);
    assert!(!results.all_fences_ready);
    assert_eq!(results.next_unready_time, Some(0));
    assert!(!results.needs_render);
    assert_eq!(fixture.session.scheduled_update_count(), 1);

    acquire.signal();
    fixture.dispatcher.run_until_idle();
    assert_eq!(*fixture.scheduler.requests.borrow(), vec![(0, 1)]);

    let results = fixture.apply(10);
    assert!(results.needs_render);
    assert!(fixture.session.resolve(1).is_ok());
}

#[test]
fn an_unready_update_blocks_the_ones_behind_it() {
    let mut fixture = Fixture::new();
    let acquire = Fence::new();
    fixture.schedule_with_fences(0, Vec::new(), vec![acquire], Vec::new());
    fixture.schedule(1, Vec::new());

    let results = fixture.apply(10);
    assert!(!results.all_fences_ready);
    assert_eq!(fixture.session.scheduled_update_count(), 2);
}

// ============================================================================
// Release-fence staging
// ============================================================================

#[test]
fn release_fences_lag_one_apply_behind() {
    let mut fixture = Fixture::new();
    let release_a = Fence::new();
    let release_b = Fence::new();

    fixture.schedule_with_fences(0, Vec::new(), Vec::new(), vec![release_a.duplicate()]);
    fixture.schedule_with_fences(1, Vec::new(), Vec::new(), vec![release_b.duplicate()]);

    // Applying A stages Ra but does not signal it.
    let results = fixture.apply(1);
    assert!(results.success);
    assert!(!release_a.is_signalled());

    // Applying B hands Ra to the signaller (no GPU work is outstanding,
    // so it signals straight away); Rb now waits its turn.
    let results = fixture.apply(2);
    assert!(results.success);
    assert!(release_a.is_signalled());
    assert!(!release_b.is_signalled());

    // The next successful apply releases Rb.
    fixture.schedule(2, Vec::new());
    let results = fixture.apply(3);
    assert!(results.success);
    assert!(release_b.is_signalled());
}

#[test]
fn release_fences_of_unapplied_updates_never_signal() {
    let release = Fence::new();
    {
        let mut fixture = Fixture::new();
        fixture.schedule_with_fences(0, Vec::new(), Vec::new(), vec![release.duplicate()]);
        // Session torn down without the update ever applying.
    }
    assert!(!release.is_signalled());
}

// ============================================================================
// Command failures
// ============================================================================

#[test]
fn a_failed_command_clears_the_queue_and_reports_teardown() {
    let mut fixture = Fixture::new();
    fixture.schedule(
        0,
        vec![Command::AddChild {
            node_id: 7,
            child_id: 8,
        }],
    );
    fixture.schedule(1, Vec::new());

    let results = fixture.apply(10);
    assert!(!results.success);
    assert!(matches!(
        results.error,
        Some(SessionError::InvalidResourceId(7))
    ));
    assert_eq!(fixture.session.scheduled_update_count(), 0);
}

#[test]
fn duplicate_resource_ids_are_rejected() {
    let mut fixture = Fixture::new();
    fixture.schedule(
        0,
        vec![
            Command::CreateResource {
                id: 1,
                spec: ResourceSpec::EntityNode,
            },
            Command::CreateResource {
                id: 1,
                spec: ResourceSpec::Material,
            },
        ],
    );
    let results = fixture.apply(10);
    assert!(!results.success);
    assert!(matches!(
        results.error,
        Some(SessionError::ResourceIdCollision(1))
    ));
}

#[test]
fn resource_id_zero_is_reserved() {
    let mut fixture = Fixture::new();
    fixture.schedule(
        0,
        vec![Command::CreateResource {
            id: 0,
            spec: ResourceSpec::EntityNode,
        }],
    );
    let results = fixture.apply(10);
    assert!(!results.success);
    assert!(matches!(
        results.error,
        Some(SessionError::ReservedResourceId)
    ));
}

// ============================================================================
// Resource lifetime
// ============================================================================

#[test]
fn released_resources_survive_while_the_graph_references_them() {
    let mut fixture = Fixture::new();
    fixture.schedule(
        0,
        vec![
            Command::CreateResource {
                id: 1,
                spec: ResourceSpec::EntityNode,
            },
            Command::CreateResource {
                id: 2,
                spec: ResourceSpec::EntityNode,
            },
            Command::AddChild {
                node_id: 1,
                child_id: 2,
            },
        ],
    );
    assert!(fixture.apply(10).success);

    let parent_key = fixture.session.resolve(1).expect("parent");
    let child_key = fixture.session.resolve(2).expect("child");

    // Releasing the id drops the session's mapping only; the parent
    // still holds the child in the graph.
    fixture.schedule(1, vec![Command::ReleaseResource { id: 2 }]);
    assert!(fixture.apply(10).success);
    assert!(fixture.session.resolve(2).is_err());
    assert!(fixture.graph.arena().contains(child_key));
    assert_eq!(fixture.graph.node(parent_key).expect("node").children, vec![child_key]);

    // Detaching severs the last reference and destroys the child.
    fixture.schedule(2, vec![Command::DetachChildren { node_id: 1 }]);
    assert!(fixture.apply(10).success);
    assert!(!fixture.graph.arena().contains(child_key));
}
