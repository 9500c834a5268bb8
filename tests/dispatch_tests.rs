//! Dispatcher Tests
//!
//! Tests for:
//! - FIFO ordering of posted tasks
//! - Deadline ordering and cancellation of timed wakeups
//! - Manual-clock advancement semantics

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use prism::dispatch::Dispatcher;

// ============================================================================
// Posted tasks
// ============================================================================

#[test]
fn posted_tasks_run_in_fifo_order() {
    let dispatcher = Dispatcher::new_manual();
    let log = Rc::new(RefCell::new(Vec::new()));
    for i in 0..3 {
        let log = Rc::clone(&log);
        dispatcher.post(move || log.borrow_mut().push(i));
    }
    dispatcher.run_until_idle();
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
}

#[test]
fn tasks_posted_from_tasks_run_in_the_same_turn() {
    let dispatcher = Dispatcher::new_manual();
    let count = Rc::new(Cell::new(0));
    {
        let inner_dispatcher = dispatcher.clone();
        let count = Rc::clone(&count);
        dispatcher.post(move || {
            let count = Rc::clone(&count);
            inner_dispatcher.post(move || count.set(count.get() + 1));
        });
    }
    assert_eq!(dispatcher.run_until_idle(), 2);
    assert_eq!(count.get(), 1);
}

// ============================================================================
// Timed wakeups
// ============================================================================

#[test]
fn wakeups_fire_in_deadline_order() {
    let dispatcher = Dispatcher::new_manual();
    let log = Rc::new(RefCell::new(Vec::new()));
    for (deadline, tag) in [(300, 'c'), (100, 'a'), (200, 'b')] {
        let log = Rc::clone(&log);
        drop(dispatcher.schedule_wakeup(deadline, move || log.borrow_mut().push(tag)));
    }
    dispatcher.advance_to(250);
    assert_eq!(*log.borrow(), vec!['a', 'b']);
    dispatcher.advance_to(300);
    assert_eq!(*log.borrow(), vec!['a', 'b', 'c']);
}

#[test]
fn wakeup_does_not_fire_before_its_deadline() {
    let dispatcher = Dispatcher::new_manual();
    let fired = Rc::new(Cell::new(false));
    let handle = {
        let fired = Rc::clone(&fired);
        dispatcher.schedule_wakeup(1_000, move || fired.set(true))
    };
    dispatcher.advance_to(999);
    assert!(!fired.get());
    assert!(handle.is_pending());
    dispatcher.advance_to(1_000);
    assert!(fired.get());
    assert!(!handle.is_pending());
}

#[test]
fn cancelled_wakeup_never_fires() {
    let dispatcher = Dispatcher::new_manual();
    let fired = Rc::new(Cell::new(false));
    let handle = {
        let fired = Rc::clone(&fired);
        dispatcher.schedule_wakeup(100, move || fired.set(true))
    };
    handle.cancel();
    dispatcher.advance_to(200);
    assert!(!fired.get());
}

#[test]
fn clock_lands_exactly_on_each_deadline() {
    let dispatcher = Dispatcher::new_manual();
    let observed = Rc::new(RefCell::new(Vec::new()));
    for deadline in [100i64, 250, 400] {
        let observed = Rc::clone(&observed);
        let clock = dispatcher.clone();
        drop(dispatcher.schedule_wakeup(deadline, move || observed.borrow_mut().push(clock.now())));
    }
    dispatcher.advance_to(1_000);
    assert_eq!(*observed.borrow(), vec![100, 250, 400]);
    assert_eq!(dispatcher.now(), 1_000);
}

#[test]
fn past_deadline_fires_on_next_turn() {
    let dispatcher = Dispatcher::new_manual();
    dispatcher.advance_to(500);
    let fired = Rc::new(Cell::new(false));
    {
        let fired = Rc::clone(&fired);
        drop(dispatcher.schedule_wakeup(100, move || fired.set(true)));
    }
    assert!(!fired.get());
    dispatcher.run_until_idle();
    assert!(fired.get());
}
