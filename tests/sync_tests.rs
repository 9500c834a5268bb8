//! Synchronization Primitive Tests
//!
//! Tests for:
//! - Fence: one-shot signalling, duplicated handles, async waits,
//!   cancellation
//! - FenceSetListener: whole-set readiness
//! - CommandBufferSequencer / ReleaseFenceSignaller: FIFO ordering
//!   against the GPU sequence
//! - EventPair: peer-closed notification

use std::cell::Cell;
use std::rc::Rc;

use prism::dispatch::Dispatcher;
use prism::errors::PrismError;
use prism::sync::{
    CommandBufferSequencer, EventPair, Fence, FenceSetListener, ReleaseFenceSignaller,
};

// ============================================================================
// Fence
// ============================================================================

#[test]
fn fence_starts_unsignalled() {
    let fence = Fence::new();
    assert!(!fence.is_signalled());
}

#[test]
fn duplicated_handles_observe_one_signal() {
    let fence = Fence::new();
    let duplicate = fence.duplicate();
    assert!(fence.same_fence(&duplicate));
    duplicate.signal();
    assert!(fence.is_signalled());
    // A second signal is a no-op, not a state change.
    fence.signal();
    assert!(fence.is_signalled());
}

#[test]
fn wait_fires_after_signal_on_the_dispatcher() {
    let dispatcher = Dispatcher::new_manual();
    let fence = Fence::new();
    let fired = Rc::new(Cell::new(false));
    let _watch = {
        let fired = Rc::clone(&fired);
        fence.wait_async(&dispatcher, move || fired.set(true))
    };

    fence.signal();
    // The callback never runs inline.
    assert!(!fired.get());
    dispatcher.run_until_idle();
    assert!(fired.get());
}

#[test]
fn wait_on_signalled_fence_fires_immediately() {
    let dispatcher = Dispatcher::new_manual();
    let fence = Fence::new();
    fence.signal();
    let fired = Rc::new(Cell::new(false));
    let _watch = {
        let fired = Rc::clone(&fired);
        fence.wait_async(&dispatcher, move || fired.set(true))
    };
    dispatcher.run_until_idle();
    assert!(fired.get());
}

#[test]
fn dropped_watch_cancels_the_wait() {
    let dispatcher = Dispatcher::new_manual();
    let fence = Fence::new();
    let fired = Rc::new(Cell::new(false));
    let watch = {
        let fired = Rc::clone(&fired);
        fence.wait_async(&dispatcher, move || fired.set(true))
    };
    assert!(watch.is_watching());
    drop(watch);
    fence.signal();
    dispatcher.run_until_idle();
    assert!(!fired.get());
}

// ============================================================================
// FenceSetListener
// ============================================================================

#[test]
fn empty_fence_set_is_trivially_ready() {
    let dispatcher = Dispatcher::new_manual();
    let listener = FenceSetListener::new(Vec::new());
    assert!(listener.ready());
    let fired = Rc::new(Cell::new(false));
    {
        let fired = Rc::clone(&fired);
        listener.wait_ready_async(&dispatcher, move || fired.set(true));
    }
    dispatcher.run_until_idle();
    assert!(fired.get());
}

#[test]
fn fence_set_waits_for_every_member() {
    let dispatcher = Dispatcher::new_manual();
    let (a, b) = (Fence::new(), Fence::new());
    let listener = FenceSetListener::new(vec![a.duplicate(), b.duplicate()]);
    let fired = Rc::new(Cell::new(false));
    {
        let fired = Rc::clone(&fired);
        listener.wait_ready_async(&dispatcher, move || fired.set(true));
    }

    a.signal();
    dispatcher.run_until_idle();
    assert!(!fired.get());
    assert!(!listener.ready());

    b.signal();
    dispatcher.run_until_idle();
    assert!(fired.get());
    assert!(listener.ready());
}

#[test]
fn dropped_fence_set_listener_never_fires() {
    let dispatcher = Dispatcher::new_manual();
    let fence = Fence::new();
    let listener = FenceSetListener::new(vec![fence.duplicate()]);
    let fired = Rc::new(Cell::new(false));
    {
        let fired = Rc::clone(&fired);
        listener.wait_ready_async(&dispatcher, move || fired.set(true));
    }
    drop(listener);
    fence.signal();
    dispatcher.run_until_idle();
    assert!(!fired.get());
}

// ============================================================================
// Release-fence signaller
// ============================================================================

#[test]
fn release_fence_with_no_outstanding_work_signals_immediately() {
    let sequencer = CommandBufferSequencer::new();
    let mut signaller = ReleaseFenceSignaller::new(sequencer);
    let fence = Fence::new();
    signaller
        .add_cpu_release_fence(fence.duplicate())
        .expect("stage fence");
    assert!(fence.is_signalled());
}

#[test]
fn release_fence_waits_for_its_command_buffer() {
    let sequencer = CommandBufferSequencer::new();
    let mut signaller = ReleaseFenceSignaller::new(sequencer.clone());

    let seq = sequencer.generate_next();
    let fence = Fence::new();
    signaller
        .add_cpu_release_fence(fence.duplicate())
        .expect("stage fence");
    assert!(!fence.is_signalled());
    assert_eq!(signaller.pending_fence_count(), 1);

    signaller.on_command_buffer_finished(seq);
    assert!(fence.is_signalled());
    assert_eq!(signaller.pending_fence_count(), 0);
}

#[test]
fn release_fences_signal_in_fifo_order() {
    let sequencer = CommandBufferSequencer::new();
    let mut signaller = ReleaseFenceSignaller::new(sequencer.clone());

    let seq1 = sequencer.generate_next();
    let first = Fence::new();
    signaller
        .add_cpu_release_fence(first.duplicate())
        .expect("stage first");

    let seq2 = sequencer.generate_next();
    let second = Fence::new();
    signaller
        .add_cpu_release_fence(second.duplicate())
        .expect("stage second");

    signaller.on_command_buffer_finished(seq1);
    assert!(first.is_signalled());
    assert!(!second.is_signalled());

    signaller.on_command_buffer_finished(seq2);
    assert!(second.is_signalled());
}

#[test]
fn finishing_a_later_sequence_number_drains_earlier_fences() {
    let sequencer = CommandBufferSequencer::new();
    let mut signaller = ReleaseFenceSignaller::new(sequencer.clone());

    let _seq1 = sequencer.generate_next();
    let first = Fence::new();
    signaller
        .add_cpu_release_fence(first.duplicate())
        .expect("stage first");
    let seq2 = sequencer.generate_next();
    let second = Fence::new();
    signaller
        .add_cpu_release_fence(second.duplicate())
        .expect("stage second");

    signaller.on_command_buffer_finished(seq2);
    assert!(first.is_signalled());
    assert!(second.is_signalled());
}

#[test]
fn decreasing_sequence_number_is_rejected() {
    let sequencer = CommandBufferSequencer::new();
    let mut signaller = ReleaseFenceSignaller::new(sequencer.clone());

    let _ = sequencer.generate_next();
    // The renderer claims work finished that was never submitted.
    signaller.on_command_buffer_finished(5);

    let fence = Fence::new();
    let result = signaller.add_cpu_release_fence(fence);
    assert!(matches!(
        result,
        Err(PrismError::FenceSequenceOutOfOrder { .. })
    ));
}

// ============================================================================
// Event pairs
// ============================================================================

#[test]
fn event_pair_halves_reference_each_other() {
    let (a, b) = EventPair::create();
    assert_eq!(a.peer_koid(), b.koid());
    assert_eq!(b.peer_koid(), a.koid());
    assert!(a.is_peer_alive());
    assert!(b.is_peer_alive());
}

#[test]
fn dropping_a_half_notifies_the_peer_watcher() {
    let dispatcher = Dispatcher::new_manual();
    let (a, b) = EventPair::create();
    let fired = Rc::new(Cell::new(false));
    let _watch = {
        let fired = Rc::clone(&fired);
        a.watch_peer_closed(&dispatcher, move || fired.set(true))
    };

    drop(b);
    assert!(!a.is_peer_alive());
    dispatcher.run_until_idle();
    assert!(fired.get());
}

#[test]
fn watching_an_already_closed_peer_fires_immediately() {
    let dispatcher = Dispatcher::new_manual();
    let (a, b) = EventPair::create();
    drop(b);
    let fired = Rc::new(Cell::new(false));
    let _watch = {
        let fired = Rc::clone(&fired);
        a.watch_peer_closed(&dispatcher, move || fired.set(true))
    };
    dispatcher.run_until_idle();
    assert!(fired.get());
}

#[test]
fn dropped_peer_watch_is_cancelled() {
    let dispatcher = Dispatcher::new_manual();
    let (a, b) = EventPair::create();
    let fired = Rc::new(Cell::new(false));
    let watch = {
        let fired = Rc::clone(&fired);
        a.watch_peer_closed(&dispatcher, move || fired.set(true))
    };
    drop(watch);
    drop(b);
    dispatcher.run_until_idle();
    assert!(!fired.get());
}
