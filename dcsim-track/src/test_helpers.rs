// Copyright (c) 2020 Graphcore Ltd. All rights reserved.

//! This module provides helper functions for testing logging output
//!
//! The aim of this module is to provide commonly-used functions that enable the
//! testing of the output that should appear from logging macros.

use std::cell::{Cell, RefCell};

use regex::Regex;

use crate::{Id, Track};

/// A tracker that keeps track events.
pub struct TestTracker {
    events: RefCell<Vec<String>>,

    unique_id: Cell<u64>,
}

impl TestTracker {
    /// Create a new [`Tracker`](crate::Tracker) for the tests.
    ///
    /// This keeps the track events in memory for checking later.
    #[must_use]
    pub fn new(initial_id: u64) -> Self {
        Self {
            events: RefCell::new(Vec::new()),
            unique_id: Cell::new(initial_id),
        }
    }

    fn add_event(&self, event: String) {
        println!("{event}");
        self.events.borrow_mut().push(event);
    }
}

impl Track for TestTracker {
    fn unique_id(&self) -> Id {
        let id = self.unique_id.get();
        self.unique_id.set(id + 1);
        Id(id)
    }

    fn is_entity_enabled(&self, _id: Id, _level: log::Level) -> bool {
        true
    }

    fn add_entity(&self, _id: Id, _entity_name: &str) {}

    fn enter(&self, id: Id, item: Id) {
        self.add_event(format!("{id}: {item} entered"));
    }

    fn exit(&self, id: Id, item: Id) {
        self.add_event(format!("{id}: {item} exited"));
    }

    fn value(&self, id: Id, value: f64) {
        self.add_event(format!("{id}: value {value}"));
    }

    fn create(&self, created_by: Id, id: Id, num_bytes: usize, name: &str) {
        self.add_event(format!(
            "{created_by}: created {id}, {name}, {num_bytes} bytes"
        ));
    }

    fn destroy(&self, destroyed_by: Id, id: Id) {
        self.add_event(format!("{destroyed_by}: destroyed {id}"));
    }

    fn log(&self, id: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.add_event(format!("{id}:{level}: {msg}"));
    }

    fn time(&self, set_by: Id, time_ns: u64) {
        self.add_event(format!("{set_by}: set time {time_ns}ns"));
    }

    fn shutdown(&self) {}
}

/// Initialise a [`TestTracker`] for tests
///
/// Returns both the concrete [`TestTracker`] (to check events with
/// [`check_and_clear`]) and the same object as a [`Tracker`](crate::Tracker).
///
/// *Note*: this is called `test_init` because macros are exported at the root
/// of the crate.
///
/// # Arguments
///
/// * `start_id` - The ID value to be set as the starting value
///
/// # Examples
///
/// ```
/// use dcsim_track::test_helpers;
///
/// let (test_tracker, tracker) = dcsim_track::test_init!(10);
/// let top = dcsim_track::entity::toplevel(&tracker, "top");
/// test_helpers::check_and_clear(&test_tracker, &["0: created 10, top, 0 bytes"]);
/// ```
#[macro_export]
macro_rules! test_init {
    ($start_id:expr) => {{
        let test_tracker = std::rc::Rc::new($crate::test_helpers::TestTracker::new($start_id));
        let tracker: $crate::Tracker = test_tracker.clone();
        (test_tracker, tracker)
    }};
}

/// Check and clear the _trace_ and _log_ output
///
/// This function asserts that the logging output lines seen since the start or
/// the last time this function was called are expected. It then clears the
/// output recorded so far.
///
/// # Arguments
///
/// * `tracker`  - A reference to the [`TestTracker`] being used in the test.
/// * `expected` - An array of expected regular expressions that the logging
///   output will be matched against.
pub fn check_and_clear(tracker: &TestTracker, expected: &[&str]) {
    let mut events = tracker.events.borrow_mut();

    println!("Checking {:?} matches {:?}", expected, *events);

    assert_eq!(expected.len(), events.len());

    for (i, (log_expect, actual)) in expected.iter().zip(events.iter()).enumerate() {
        let re = Regex::new(log_expect).unwrap();
        println!("Checking {i}: {log_expect:?} matches {actual:?}");
        assert!(re.is_match(actual), "{actual:?} does not match {log_expect:?}");
    }

    events.clear();
}
