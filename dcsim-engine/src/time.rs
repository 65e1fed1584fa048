// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! This module represents the time during a simulation.
//!
//! Time is an integer number of nanoseconds that never moves backwards.

use std::rc::Rc;

use dcsim_track::entity::Entity;
use dcsim_track::set_time;

/// The overall owner of time within a simulation.
pub struct SimTime {
    pub entity: Rc<Entity>,

    current_ns: u64,
}

impl SimTime {
    #[must_use]
    pub fn new(parent: &Rc<Entity>) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "time")),
            current_ns: 0,
        }
    }

    /// Move time forward to `time_ns`.
    ///
    /// # Panics
    ///
    /// Time moving backwards is a fatal error.
    pub fn advance_to(&mut self, time_ns: u64) {
        if time_ns < self.current_ns {
            panic!(
                "Time moving backwards from {}ns to {time_ns}ns",
                self.current_ns
            );
        }
        if time_ns != self.current_ns {
            set_time!(self.entity ; time_ns);
            self.current_ns = time_ns;
        }
    }

    #[must_use]
    pub fn time_now_ns(&self) -> u64 {
        self.current_ns
    }
}
