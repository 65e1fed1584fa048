// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

//! Forward _log_ events to the [`log`] facade.
//!
//! This allows a model to be embedded in an application that has installed its
//! own logger (for example a `simplelog` terminal logger). Messages are
//! prefixed with the simulation time and the full name of the entity so that
//! they stay meaningful once interleaved with other output.

use crate::Id;
use crate::tracker::{EntityManager, Track};

/// A tracker that turns _log_ events into [`log`] records.
///
/// _Trace_ events are only emitted at `Trace` level.
pub struct LogTracker {
    entity_manager: EntityManager,
}

impl LogTracker {
    /// Create a new [`LogTracker`] with an [`EntityManager`].
    #[must_use]
    pub fn new(entity_manager: EntityManager) -> Self {
        Self { entity_manager }
    }

    fn name(&self, id: Id) -> String {
        self.entity_manager
            .name_of(id)
            .unwrap_or_else(|| id.to_string())
    }
}

impl Track for LogTracker {
    fn unique_id(&self) -> Id {
        self.entity_manager.unique_id()
    }

    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool {
        self.entity_manager.is_log_enabled_at_level(id, level) && level <= log::max_level()
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        self.entity_manager.add_entity(id, entity_name);
    }

    fn enter(&self, id: Id, object: Id) {
        log::trace!("@{}ns {}: enter {object}", self.entity_manager.time_ns(), self.name(id));
    }

    fn exit(&self, id: Id, object: Id) {
        log::trace!("@{}ns {}: exit {object}", self.entity_manager.time_ns(), self.name(id));
    }

    fn value(&self, id: Id, value: f64) {
        log::trace!("@{}ns {}: value {value}", self.entity_manager.time_ns(), self.name(id));
    }

    fn create(&self, created_by: Id, id: Id, num_bytes: usize, name: &str) {
        log::trace!(
            "@{}ns {}: created {id}, {name}, {num_bytes} bytes",
            self.entity_manager.time_ns(),
            self.name(created_by)
        );
    }

    fn destroy(&self, destroyed_by: Id, id: Id) {
        log::trace!(
            "@{}ns {}: destroyed {id}",
            self.entity_manager.time_ns(),
            self.name(destroyed_by)
        );
    }

    fn log(&self, id: Id, level: log::Level, msg: std::fmt::Arguments) {
        log::log!(
            level,
            "@{}ns {}: {msg}",
            self.entity_manager.time_ns(),
            self.name(id)
        );
    }

    fn time(&self, _set_by: Id, time_ns: u64) {
        self.entity_manager.set_time_ns(time_ns);
    }

    fn shutdown(&self) {
        log::logger().flush();
    }
}
