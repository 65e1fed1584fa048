// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Single-threaded callback executor.
//!
//! Callbacks are kept in a priority queue ordered by the time at which they
//! should run. Callbacks scheduled for the same time run in the order in which
//! they were scheduled.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use dcsim_track::entity::Entity;
use dcsim_track::trace;

use crate::time::SimTime;
use crate::types::{Callback, SimResult};

struct Scheduled {
    time_ns: u64,
    seq: u64,
    callback: Callback,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time_ns == other.time_ns && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so that the `BinaryHeap` pops the earliest callback first
    fn cmp(&self, other: &Self) -> Ordering {
        (other.time_ns, other.seq).cmp(&(self.time_ns, self.seq))
    }
}

struct ExecutorState {
    queue: RefCell<BinaryHeap<Scheduled>>,
    next_seq: Cell<u64>,
    time: RefCell<SimTime>,
}

impl ExecutorState {
    fn new(top: &Rc<Entity>) -> Self {
        Self {
            queue: RefCell::new(BinaryHeap::new()),
            next_seq: Cell::new(0),
            time: RefCell::new(SimTime::new(top)),
        }
    }

    fn time_now_ns(&self) -> u64 {
        self.time.borrow().time_now_ns()
    }

    fn push(&self, time_ns: u64, callback: Callback) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.queue.borrow_mut().push(Scheduled {
            time_ns,
            seq,
            callback,
        });
    }

    fn pop_due(&self, until_ns: Option<u64>) -> Option<Scheduled> {
        let mut queue = self.queue.borrow_mut();
        match (queue.peek(), until_ns) {
            (None, _) => None,
            (Some(next), Some(until_ns)) if next.time_ns > until_ns => None,
            _ => queue.pop(),
        }
    }
}

/// A cloneable handle used by models to read the time and schedule callbacks.
#[derive(Clone)]
pub struct Scheduler {
    state: Rc<ExecutorState>,
}

impl Scheduler {
    /// The current virtual time.
    #[must_use]
    pub fn time_now_ns(&self) -> u64 {
        self.state.time_now_ns()
    }

    /// Schedule `callback` to run `delay_ns` after the current time.
    pub fn schedule(&self, delay_ns: u64, callback: impl FnOnce() -> SimResult + 'static) {
        let time_ns = self.state.time_now_ns().saturating_add(delay_ns);
        self.state.push(time_ns, Box::new(callback));
    }

    /// Number of callbacks waiting to run.
    #[must_use]
    pub fn num_pending(&self) -> usize {
        self.state.queue.borrow().len()
    }
}

/// Single-threaded executor
///
/// This is a thin-wrapper (using [`Rc`]) around the real executor state, so
/// that [`Scheduler`] handles can be cloned and passed around.
pub struct Executor {
    pub entity: Rc<Entity>,
    state: Rc<ExecutorState>,
}

impl Executor {
    #[must_use]
    pub fn new(parent: &Rc<Entity>) -> Self {
        let entity = Rc::new(Entity::new(parent, "executor"));
        let state = Rc::new(ExecutorState::new(&entity));
        Self { entity, state }
    }

    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        Scheduler {
            state: self.state.clone(),
        }
    }

    #[must_use]
    pub fn time_now_ns(&self) -> u64 {
        self.state.time_now_ns()
    }

    /// Run until there are no callbacks left.
    pub fn run(&self) -> SimResult {
        while self.step(None)? {}
        Ok(())
    }

    /// Run all callbacks due at or before `until_ns` and then move time to
    /// `until_ns`.
    pub fn run_until(&self, until_ns: u64) -> SimResult {
        while self.step(Some(until_ns))? {}
        if until_ns > self.time_now_ns() {
            self.state.time.borrow_mut().advance_to(until_ns);
        }
        Ok(())
    }

    /// Run the next callback. Returns whether a callback was run.
    fn step(&self, until_ns: Option<u64>) -> Result<bool, crate::types::SimError> {
        // The queue borrow must be released before the callback runs as it will
        // typically schedule further callbacks.
        let Some(next) = self.state.pop_due(until_ns) else {
            return Ok(false);
        };
        self.state.time.borrow_mut().advance_to(next.time_ns);
        trace!(self.entity ; "run callback {} @{}ns", next.seq, next.time_ns);
        (next.callback)()?;
        Ok(true)
    }
}
