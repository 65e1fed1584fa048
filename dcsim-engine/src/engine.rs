// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The top-level simulation object.

use std::rc::Rc;

use dcsim_track::Tracker;
use dcsim_track::entity::{Entity, toplevel};
use dcsim_track::tracker::stdout_tracker;

use crate::executor::{Executor, Scheduler};
use crate::types::SimResult;

pub struct Engine {
    executor: Executor,
    toplevel: Rc<Entity>,
    tracker: Tracker,
}

impl Engine {
    /// Create a standalone engine.
    #[must_use]
    pub fn new(tracker: &Tracker) -> Self {
        let toplevel = toplevel(tracker, "top");
        let executor = Executor::new(&toplevel);
        Self {
            executor,
            toplevel,
            tracker: tracker.clone(),
        }
    }

    /// Run until no callbacks remain.
    pub fn run(&mut self) -> SimResult {
        self.executor.run()
    }

    /// Run until the given time. Callbacks due later stay pending.
    pub fn run_until(&mut self, time_ns: u64) -> SimResult {
        self.executor.run_until(time_ns)
    }

    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        self.executor.scheduler()
    }

    #[must_use]
    pub fn time_now_ns(&self) -> u64 {
        self.executor.time_now_ns()
    }

    #[must_use]
    pub fn top(&self) -> &Rc<Entity> {
        &self.toplevel
    }

    #[must_use]
    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }
}

/// Create a default engine that sends [`Track`](dcsim_track::Track) events to
/// stdout.
///
/// This is provided to keep documentation examples simple.
impl Default for Engine {
    fn default() -> Self {
        let tracker = stdout_tracker(log::Level::Warn);
        Self::new(&tracker)
    }
}
